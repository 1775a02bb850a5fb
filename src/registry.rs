//! Repositories over the two files consumed by the Nostr deployment: the
//! NIP-05 `names` document and the relay supporter allow-list.
//!
//! All writes are idempotent. Re-adding an existing entry leaves the file
//! byte-for-byte untouched, so downstream file watchers see no spurious
//! changes.

use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::{JsonFile, LineFile};

/// Errors surfaced by the mapping repositories.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handle or pubkey failed syntactic validation.
    #[error("{0}")]
    Validation(String),
    /// The backing file could not be read or rewritten.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Outcome of an idempotent add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The entry was written to the backing file.
    Inserted,
    /// The entry was already present; the file was left untouched.
    AlreadyPresent,
}

/// Normalize a handle to lowercase, rejecting anything outside
/// `[A-Za-z0-9_.-]`.
pub fn normalize_handle(handle: &str) -> Result<String, RegistryError> {
    let handle = handle.trim().to_ascii_lowercase();
    if handle.is_empty() {
        return Err(RegistryError::Validation("handle must be non-empty".into()));
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(RegistryError::Validation(format!(
            "handle '{handle}' contains characters outside [A-Za-z0-9_.-]"
        )));
    }
    Ok(handle)
}

/// Normalize a pubkey to lowercase, rejecting anything that is not exactly
/// 64 hex digits.
pub fn normalize_pubkey(pubkey: &str) -> Result<String, RegistryError> {
    let pubkey = pubkey.trim().to_ascii_lowercase();
    if pubkey.len() != 64 || !pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RegistryError::Validation(
            "pubkey must be exactly 64 hexadecimal characters".into(),
        ));
    }
    Ok(pubkey)
}

/// Pull the `names` object out of a directory document, replacing a missing
/// or malformed value with an empty map.
fn take_names(doc: &mut Map<String, Value>) -> Map<String, Value> {
    match doc.remove("names") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Repository over the NIP-05 directory document.
///
/// The document maps lowercase handles to lowercase pubkeys under a `names`
/// key; sibling keys such as `relays` are preserved across rewrites.
#[derive(Clone)]
pub struct NameDirectory {
    file: JsonFile,
}

impl NameDirectory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    /// Create or update a handle mapping.
    pub fn add(&self, handle: &str, pubkey: &str) -> Result<AddOutcome, RegistryError> {
        let handle = normalize_handle(handle)?;
        let pubkey = normalize_pubkey(pubkey)?;
        let _guard = self.file.lock();
        let mut doc = self.file.load()?;
        let mut names = take_names(&mut doc);
        if names.get(&handle).and_then(Value::as_str) == Some(pubkey.as_str()) {
            return Ok(AddOutcome::AlreadyPresent);
        }
        names.insert(handle, Value::String(pubkey));
        doc.insert("names".into(), Value::Object(names));
        self.file.save(&doc)?;
        Ok(AddOutcome::Inserted)
    }

    /// Remove a handle mapping, reporting whether it existed.
    pub fn remove(&self, handle: &str) -> Result<bool, RegistryError> {
        let handle = normalize_handle(handle)?;
        let _guard = self.file.lock();
        let mut doc = self.file.load()?;
        let mut names = take_names(&mut doc);
        let removed = names.remove(&handle).is_some();
        doc.insert("names".into(), Value::Object(names));
        if removed {
            self.file.save(&doc)?;
        }
        Ok(removed)
    }

    /// Look up the pubkey mapped to a handle.
    pub fn get(&self, handle: &str) -> Result<Option<String>, RegistryError> {
        let handle = normalize_handle(handle)?;
        let doc = self.file.load()?;
        Ok(doc
            .get("names")
            .and_then(Value::as_object)
            .and_then(|names| names.get(&handle))
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    /// Whether a handle is mapped. Invalid syntax is simply "not mapped".
    pub fn contains(&self, handle: &str) -> bool {
        matches!(self.get(handle), Ok(Some(_)))
    }

    /// All mappings, sorted by handle.
    pub fn list(&self) -> Result<Vec<(String, String)>, RegistryError> {
        let doc = self.file.load()?;
        let mut entries: Vec<(String, String)> = doc
            .get("names")
            .and_then(Value::as_object)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|pk| (k.clone(), pk.to_owned())))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        Ok(entries)
    }
}

/// Whether a stored line counts as a member entry rather than a comment or
/// blank spacer.
fn is_member_line(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && !t.starts_with('#')
}

/// Repository over the relay supporter allow-list, one pubkey per line.
///
/// Comment (`#`) and blank lines are ignored for membership but survive
/// every rewrite, so hand-maintained annotations are never lost.
#[derive(Clone)]
pub struct SupporterSet {
    file: LineFile,
}

impl SupporterSet {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: LineFile::new(path),
        }
    }

    /// Add a pubkey to the allow-list.
    pub fn add(&self, pubkey: &str) -> Result<AddOutcome, RegistryError> {
        let pubkey = normalize_pubkey(pubkey)?;
        let _guard = self.file.lock();
        let mut lines = self.file.load()?;
        if lines
            .iter()
            .any(|l| is_member_line(l) && l.trim().eq_ignore_ascii_case(&pubkey))
        {
            return Ok(AddOutcome::AlreadyPresent);
        }
        lines.push(pubkey);
        self.file.save(&lines)?;
        Ok(AddOutcome::Inserted)
    }

    /// Remove a pubkey, reporting whether it was present.
    pub fn remove(&self, pubkey: &str) -> Result<bool, RegistryError> {
        let pubkey = normalize_pubkey(pubkey)?;
        let _guard = self.file.lock();
        let mut lines = self.file.load()?;
        let before = lines.len();
        lines.retain(|l| !is_member_line(l) || !l.trim().eq_ignore_ascii_case(&pubkey));
        if lines.len() == before {
            return Ok(false);
        }
        self.file.save(&lines)?;
        Ok(true)
    }

    /// Whether a pubkey is on the allow-list.
    pub fn contains(&self, pubkey: &str) -> bool {
        let Ok(pubkey) = normalize_pubkey(pubkey) else {
            return false;
        };
        match self.file.load() {
            Ok(lines) => lines
                .iter()
                .any(|l| is_member_line(l) && l.trim().eq_ignore_ascii_case(&pubkey)),
            Err(_) => false,
        }
    }

    /// All member pubkeys, lowercased and sorted.
    pub fn list(&self) -> Result<Vec<String>, RegistryError> {
        let lines = self.file.load()?;
        let mut members: Vec<String> = lines
            .iter()
            .filter(|l| is_member_line(l))
            .map(|l| l.trim().to_ascii_lowercase())
            .collect();
        members.sort();
        Ok(members)
    }
}
