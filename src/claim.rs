//! Lexical extraction of handle/pubkey claims from buyer messages.
//!
//! Buyers paste something like `handle: alice` plus their hex pubkey
//! anywhere in the free-text message; surrounding chatter is ignored.

use std::sync::OnceLock;

use regex::Regex;

/// Handle and pubkey pulled out of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub handle: String,
    pub pubkey: String,
}

static HANDLE_RE: OnceLock<Regex> = OnceLock::new();
static PUBKEY_RE: OnceLock<Regex> = OnceLock::new();

/// Find the token following the first case-insensitive `handle:` marker.
pub fn find_handle(text: &str) -> Option<String> {
    let re = HANDLE_RE
        .get_or_init(|| Regex::new(r"(?i)handle:\s*([A-Za-z0-9_.-]+)").expect("invalid regex"));
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Find the first standalone run of exactly 64 hex digits.
///
/// The run must be delimited by non-hex characters or the ends of the text,
/// so a longer hex blob never yields a truncated key.
pub fn find_pubkey(text: &str) -> Option<String> {
    let re = PUBKEY_RE.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9A-Fa-f])([0-9A-Fa-f]{64})(?:[^0-9A-Fa-f]|$)")
            .expect("invalid regex")
    });
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Extract a claim only when the message carries both parts.
pub fn parse_claim(text: &str) -> Option<Claim> {
    match (find_handle(text), find_pubkey(text)) {
        (Some(handle), Some(pubkey)) => Some(Claim { handle, pubkey }),
        _ => None,
    }
}
