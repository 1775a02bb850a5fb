//! Webhook processing pipeline: token check, classification, product
//! routing, and the audit trail.

use tracing::{debug, error, info, warn};

use crate::audit::{self, AuditLog, AuditRecord};
use crate::claim::{self, Claim};
use crate::config::{ProductAction, Settings};
use crate::event::{Event, EventKind};
use crate::extract;
use crate::registry::{AddOutcome, NameDirectory, RegistryError, SupporterSet};

/// Transport-level details recorded alongside each event.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub remote_addr: String,
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    /// All request headers, values decoded lossily.
    pub headers: Vec<(String, String)>,
    /// Value of the platform's `X-Ko-Fi-Token` header, if sent.
    pub token_header: Option<String>,
}

/// Final status and per-item outcomes for one webhook call.
#[derive(Debug)]
pub struct Outcome {
    pub status: u16,
    pub actions: Vec<String>,
}

/// Decision for a manual claim request.
#[derive(Debug, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Mapping stored (or already present); carries the normalized pair.
    Granted { handle: String, hexpub: String },
    /// Handle, pubkey, or email failed validation.
    Invalid(String),
    /// No accepted claim-product purchase on record for the email.
    NoPurchase,
    /// The directory or audit log could not be used.
    StoreFailed,
}

/// Shared processing state, constructed once at startup.
#[derive(Clone)]
pub struct Dispatcher {
    settings: Settings,
    names: NameDirectory,
    supporters: SupporterSet,
    audit: AuditLog,
}

impl Dispatcher {
    pub fn new(settings: Settings) -> Self {
        let names = NameDirectory::new(settings.names_file.clone());
        let supporters = SupporterSet::new(settings.supporters_file.clone());
        let audit = AuditLog::new(settings.audit_log.clone());
        Self {
            settings,
            names,
            supporters,
            audit,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one event through the pipeline and record the outcome.
    ///
    /// Only a token mismatch changes the status: every other request is
    /// answered 200 no matter how its actions fare, so the platform never
    /// retries or disables the webhook over a local failure.
    pub fn handle_webhook(&self, meta: &RequestMeta, event: &Event) -> Outcome {
        let mut actions = Vec::new();
        let status = if self.token_ok(meta, event) {
            self.run_actions(event, &mut actions);
            200
        } else {
            warn!(remote = %meta.remote_addr, "verification token mismatch");
            actions.push("rejected: verification token mismatch".to_string());
            403
        };
        self.record(meta, event, status, &actions);
        Outcome { status, actions }
    }

    /// Check the shared verification token when one is configured.
    ///
    /// Sources in precedence order: the parsed payload, the
    /// `X-Ko-Fi-Token` header, then a `verification_token` form field.
    fn token_ok(&self, meta: &RequestMeta, event: &Event) -> bool {
        let Some(expected) = self.settings.webhook_token.as_deref() else {
            return true;
        };
        let provided = event
            .verification_token
            .clone()
            .or_else(|| meta.token_header.clone())
            .or_else(|| extract::form_field(&event.raw.bytes, "verification_token"));
        provided.as_deref() == Some(expected)
    }

    /// Route each purchased item through the product table.
    fn run_actions(&self, event: &Event, actions: &mut Vec<String>) {
        if event.kind != EventKind::ShopOrder {
            debug!(kind = ?event.kind, "event kind routes to no action");
            return;
        }
        let claim = event.message.as_deref().and_then(claim::parse_claim);
        for item in &event.shop_items {
            let code = item.direct_link_code.as_str();
            match self.settings.product_action(code) {
                Some(ProductAction::HandleClaim) => {
                    self.grant_claim(code, claim.as_ref(), actions)
                }
                Some(ProductAction::Supporter) => self.grant_supporter(code, event, actions),
                None => {
                    info!(code, "no action mapped for product code");
                    actions.push(format!("skipped {code}: unmapped product code"));
                }
            }
        }
    }

    fn grant_claim(&self, code: &str, claim: Option<&Claim>, actions: &mut Vec<String>) {
        let Some(claim) = claim else {
            warn!(code, "claim purchase without handle and pubkey in message");
            actions.push(format!("skipped {code}: no handle/pubkey claim in message"));
            return;
        };
        match self.names.add(&claim.handle, &claim.pubkey) {
            Ok(AddOutcome::Inserted) => {
                info!(handle = %claim.handle, pubkey = %claim.pubkey, "handle claim stored");
                actions.push(format!("claimed {} -> {}", claim.handle, claim.pubkey));
            }
            Ok(AddOutcome::AlreadyPresent) => {
                info!(handle = %claim.handle, "handle claim already stored");
                actions.push(format!("already claimed {} -> {}", claim.handle, claim.pubkey));
            }
            Err(RegistryError::Validation(msg)) => {
                warn!(code, %msg, "claim failed validation");
                actions.push(format!("skipped {code}: {msg}"));
            }
            Err(RegistryError::Io(err)) => {
                error!(code, err = format!("{err:#}"), "handle claim lost, directory not writable");
                actions.push(format!("failed {code}: directory not writable"));
            }
        }
    }

    fn grant_supporter(&self, code: &str, event: &Event, actions: &mut Vec<String>) {
        let Some(pubkey) = event.message.as_deref().and_then(claim::find_pubkey) else {
            warn!(code, "supporter purchase without a pubkey in message");
            actions.push(format!("skipped {code}: no pubkey in message"));
            return;
        };
        match self.supporters.add(&pubkey) {
            Ok(AddOutcome::Inserted) => {
                info!(%pubkey, "supporter added");
                actions.push(format!("supporter added {pubkey}"));
            }
            Ok(AddOutcome::AlreadyPresent) => {
                info!(%pubkey, "supporter already present");
                actions.push(format!("supporter already present {pubkey}"));
            }
            Err(RegistryError::Validation(msg)) => {
                warn!(code, %msg, "supporter pubkey failed validation");
                actions.push(format!("skipped {code}: {msg}"));
            }
            Err(RegistryError::Io(err)) => {
                error!(code, err = format!("{err:#}"), "supporter lost, allow-list not writable");
                actions.push(format!("failed {code}: allow-list not writable"));
            }
        }
    }

    /// Resolve a manual claim request against the purchase history.
    pub fn claim_for_email(&self, email: &str, handle: &str, hexpub: &str) -> ClaimDecision {
        let (handle, hexpub) = match (
            crate::registry::normalize_handle(handle),
            crate::registry::normalize_pubkey(hexpub),
        ) {
            (Ok(h), Ok(p)) => (h, p),
            (Err(err), _) | (_, Err(err)) => return ClaimDecision::Invalid(err.to_string()),
        };
        if email.trim().is_empty() {
            return ClaimDecision::Invalid("email must be non-empty".into());
        }
        match self
            .audit
            .qualifying_purchase(email, &self.settings.claim_codes)
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(email, "claim denied, no qualifying purchase on record");
                return ClaimDecision::NoPurchase;
            }
            Err(err) => {
                error!(err = format!("{err:#}"), "purchase history scan failed");
                return ClaimDecision::StoreFailed;
            }
        }
        match self.names.add(&handle, &hexpub) {
            Ok(_) => {
                info!(%handle, %hexpub, "manual claim stored");
                ClaimDecision::Granted { handle, hexpub }
            }
            Err(RegistryError::Validation(msg)) => ClaimDecision::Invalid(msg),
            Err(RegistryError::Io(err)) => {
                error!(err = format!("{err:#}"), "directory update failed during claim");
                ClaimDecision::StoreFailed
            }
        }
    }

    /// Append the audit record; a failed append never changes the response.
    fn record(&self, meta: &RequestMeta, event: &Event, status: u16, actions: &[String]) {
        let record = AuditRecord {
            ts: audit::unix_ts(),
            remote_addr: meta.remote_addr.clone(),
            method: meta.method.clone(),
            path: meta.path.clone(),
            content_type: meta.content_type.clone(),
            headers: meta.headers.clone(),
            event: event.clone(),
            status,
            actions: actions.to_vec(),
        };
        if let Err(err) = self.audit.append(&record) {
            error!(err = format!("{err:#}"), "audit append failed, mapping state may be ahead of the log");
        }
    }
}
