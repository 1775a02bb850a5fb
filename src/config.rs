//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};

/// Product code sold as a Nostr handle claim when none is configured.
pub const DEFAULT_CLAIM_CODE: &str = "2d36c00264";

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for derived file locations.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:8787`.
    pub bind_http: String,
    /// NIP-05 directory document served by the web host.
    pub names_file: PathBuf,
    /// Relay supporter allow-list, one pubkey per line.
    pub supporters_file: PathBuf,
    /// Append-only NDJSON audit log of received webhooks.
    pub audit_log: PathBuf,
    /// Shared verification token; `None` disables token checking.
    pub webhook_token: Option<String>,
    /// Shop product codes that grant a handle claim.
    pub claim_codes: Vec<String>,
    /// Shop product codes that grant supporter relay access.
    pub supporter_codes: Vec<String>,
}

/// Action granted by a purchased product code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductAction {
    /// Map the buyer's handle to their pubkey in the directory.
    HandleClaim,
    /// Add the buyer's pubkey to the supporter allow-list.
    Supporter,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP")?;
        let names_file = env_path("NAMES_FILE")
            .unwrap_or_else(|| store_root.join("site/.well-known/nostr.json"));
        let supporters_file =
            env_path("SUPPORTERS_FILE").unwrap_or_else(|| store_root.join("relay/supporters.txt"));
        let audit_log =
            env_path("AUDIT_LOG").unwrap_or_else(|| store_root.join("log/webhooks.ndjson"));
        let webhook_token = env::var("KOFI_WEBHOOK_TOKEN").ok().filter(|s| !s.is_empty());
        let claim_codes = match env::var("CLAIM_PRODUCT_CODES") {
            Ok(s) => csv_strings(s),
            Err(_) => vec![DEFAULT_CLAIM_CODE.to_string()],
        };
        let supporter_codes = csv_strings(env::var("SUPPORTER_PRODUCT_CODES").unwrap_or_default());
        Ok(Self {
            store_root,
            bind_http,
            names_file,
            supporters_file,
            audit_log,
            webhook_token,
            claim_codes,
            supporter_codes,
        })
    }

    /// Look up the action granted by a product code, if any.
    ///
    /// Claim codes win when a code appears in both lists.
    pub fn product_action(&self, code: &str) -> Option<ProductAction> {
        if self.claim_codes.iter().any(|c| c == code) {
            Some(ProductAction::HandleClaim)
        } else if self.supporter_codes.iter().any(|c| c == code) {
            Some(ProductAction::Supporter)
        } else {
            None
        }
    }
}

/// Read an optional path-valued variable, treating empty as unset.
fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

/// Serializes tests across modules that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Every variable read by [`Settings::from_env`], for test cleanup.
#[cfg(test)]
pub(crate) const ENV_VARS: [&str; 8] = [
    "STORE_ROOT",
    "BIND_HTTP",
    "NAMES_FILE",
    "SUPPORTERS_FILE",
    "AUDIT_LOG",
    "KOFI_WEBHOOK_TOKEN",
    "CLAIM_PRODUCT_CODES",
    "SUPPORTER_PRODUCT_CODES",
];
