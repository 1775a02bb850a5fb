//! Atomic load/replace primitives for the files the bridge maintains.
//!
//! Readers (the relay, the web host) open these files directly, so every
//! rewrite goes through a temp file in the same directory followed by a
//! rename. A reader sees either the old content or the new, never a torn
//! write.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

/// Write `bytes` to `path` via a sibling temp file, fsync, and rename.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).with_context(|| format!("creating {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("creating temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("writing temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// JSON object document with atomic replace semantics.
///
/// Clones share one write lock, so concurrent read-modify-write cycles
/// against the same handle serialize instead of losing updates.
#[derive(Clone)]
pub struct JsonFile {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the write lock for a read-modify-write cycle.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the document, treating absent, empty, or unreadable content as
    /// an empty object.
    pub fn load(&self) -> Result<Map<String, Value>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        if data.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!(path = %self.path.display(), "top-level JSON is not an object, starting fresh");
                Ok(Map::new())
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "unreadable JSON, starting fresh");
                Ok(Map::new())
            }
        }
    }

    /// Replace the document atomically, pretty-printed with sorted keys.
    pub fn save(&self, doc: &Map<String, Value>) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(doc).context("encoding JSON document")?;
        bytes.push(b'\n');
        replace_file(&self.path, &bytes)
    }
}

/// Plain text file holding one entry per line, with atomic replace
/// semantics. Lines are kept verbatim; interpretation is the caller's.
#[derive(Clone)]
pub struct LineFile {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LineFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the write lock for a read-modify-write cycle.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Load all lines; an absent file yields an empty list.
    pub fn load(&self) -> Result<Vec<String>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        Ok(data.lines().map(|s| s.to_string()).collect())
    }

    /// Replace the file atomically with the given lines.
    pub fn save(&self, lines: &[String]) -> Result<()> {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        replace_file(&self.path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn json_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::new(dir.path().join("nostr.json"));
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn json_load_tolerates_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nostr.json");
        fs::write(&path, "{not json").unwrap();
        let file = JsonFile::new(path.clone());
        assert!(file.load().unwrap().is_empty());
        fs::write(&path, "   \n").unwrap();
        assert!(file.load().unwrap().is_empty());
        fs::write(&path, "[1,2,3]").unwrap();
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn json_save_is_pretty_with_sorted_keys() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::new(dir.path().join("deep/nostr.json"));
        let mut doc = Map::new();
        doc.insert("zeta".into(), Value::from(1));
        doc.insert("alpha".into(), Value::from(2));
        file.save(&doc).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert!(text.starts_with("{\n"));
        assert!(text.ends_with("}\n"));
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert_eq!(file.load().unwrap(), doc);
    }

    #[test]
    fn json_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::new(dir.path().join("nostr.json"));
        file.save(&Map::new()).unwrap();
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn line_file_round_trips_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let file = LineFile::new(dir.path().join("supporters.txt"));
        assert!(file.load().unwrap().is_empty());
        let lines = vec!["# comment".to_string(), "abc".to_string()];
        file.save(&lines).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert_eq!(text, "# comment\nabc\n");
        assert_eq!(file.load().unwrap(), lines);
    }

    #[test]
    fn line_file_save_empty_truncates() {
        let dir = TempDir::new().unwrap();
        let file = LineFile::new(dir.path().join("supporters.txt"));
        file.save(&["one".to_string()]).unwrap();
        file.save(&[]).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "");
    }
}
