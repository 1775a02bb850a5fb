//! Append-only NDJSON audit trail of every received webhook.
//!
//! The log doubles as the purchase history consulted by manual claims, so
//! records must stay parseable; unreadable lines are skipped, not fatal.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::{Event, EventKind};

/// One processed request, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Seconds since the Unix epoch when the request was handled.
    pub ts: u64,
    pub remote_addr: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub event: Event,
    /// HTTP status returned for the request.
    pub status: u16,
    /// Human-readable outcome per attempted action.
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Current time as seconds since the Unix epoch.
pub fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Handle to the audit log file.
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append one record as a JSON line.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        serde_json::to_writer(&mut file, record).context("encoding audit record")?;
        file.write_all(b"\n")
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }

    /// Visit every parseable record in file order.
    pub fn for_each(&self, mut visit: impl FnMut(&AuditRecord)) -> Result<()> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        for (idx, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => visit(&record),
                Err(err) => {
                    warn!(path = %self.path.display(), line = idx + 1, %err, "skipping unreadable audit line")
                }
            }
        }
        Ok(())
    }

    /// Whether a prior accepted shop order for `email` bought one of the
    /// given product codes.
    pub fn qualifying_purchase(&self, email: &str, codes: &[String]) -> Result<bool> {
        let mut found = false;
        self.for_each(|record| {
            if found || record.status != 200 || record.event.kind != EventKind::ShopOrder {
                return;
            }
            let email_matches = record
                .event
                .email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email));
            if !email_matches {
                return;
            }
            if record
                .event
                .shop_items
                .iter()
                .any(|item| codes.iter().any(|c| c == &item.direct_link_code))
            {
                found = true;
            }
        })?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BodySource, RawBody, ShopItem};
    use tempfile::TempDir;

    fn order_record(email: &str, code: &str, status: u16) -> AuditRecord {
        let mut event = Event::unparsed(b"data=...".to_vec());
        event.kind = EventKind::ShopOrder;
        event.email = Some(email.to_string());
        event.shop_items = vec![ShopItem {
            direct_link_code: code.to_string(),
            item_name: None,
            variation_name: None,
            quantity: None,
        }];
        event.raw = RawBody::new(BodySource::FormField, b"data=...".to_vec());
        AuditRecord {
            ts: unix_ts(),
            remote_addr: "203.0.113.9:4242".into(),
            method: "POST".into(),
            path: "/kofi-webhook".into(),
            content_type: Some("application/x-www-form-urlencoded".into()),
            headers: vec![("user-agent".into(), "Kofi.Webhooks".into())],
            event,
            status,
            actions: vec![],
        }
    }

    #[test]
    fn append_then_scan_round_trips() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("log/webhooks.ndjson"));
        log.append(&order_record("a@example.org", "c1", 200)).unwrap();
        log.append(&order_record("b@example.org", "c2", 403)).unwrap();
        let mut seen = Vec::new();
        log.for_each(|r| seen.push((r.status, r.event.email.clone())))
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 200);
        assert_eq!(seen[1].1.as_deref(), Some("b@example.org"));
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks.ndjson");
        let log = AuditLog::new(path.clone());
        log.append(&order_record("a@example.org", "c1", 200)).unwrap();
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("{torn line\n");
        fs::write(&path, text).unwrap();
        log.append(&order_record("b@example.org", "c2", 200)).unwrap();
        let mut count = 0;
        log.for_each(|_| count += 1).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn scan_of_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("webhooks.ndjson"));
        let mut count = 0;
        log.for_each(|_| count += 1).unwrap();
        assert_eq!(count, 0);
        assert!(!log
            .qualifying_purchase("a@example.org", &["c1".to_string()])
            .unwrap());
    }

    #[test]
    fn qualifying_purchase_filters_correctly() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("webhooks.ndjson"));
        log.append(&order_record("buyer@example.org", "claimcode", 200))
            .unwrap();
        log.append(&order_record("rejected@example.org", "claimcode", 403))
            .unwrap();
        log.append(&order_record("other@example.org", "unrelated", 200))
            .unwrap();
        let codes = vec!["claimcode".to_string()];
        assert!(log.qualifying_purchase("buyer@example.org", &codes).unwrap());
        assert!(log.qualifying_purchase("BUYER@example.org", &codes).unwrap());
        assert!(!log
            .qualifying_purchase("rejected@example.org", &codes)
            .unwrap());
        assert!(!log.qualifying_purchase("other@example.org", &codes).unwrap());
        assert!(!log.qualifying_purchase("nobody@example.org", &codes).unwrap());
    }

    #[test]
    fn non_shop_records_never_qualify() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("webhooks.ndjson"));
        let mut record = order_record("buyer@example.org", "claimcode", 200);
        record.event.kind = EventKind::Donation;
        log.append(&record).unwrap();
        assert!(!log
            .qualifying_purchase("buyer@example.org", &["claimcode".to_string()])
            .unwrap());
    }
}
