//! Allowlisted runtime key/value store.
//!
//! Only the NLP tuning knobs may be written; everything else is refused
//! with the permitted list so an operator typo never lands in state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use rk_domain::error::{Error, Result};

/// Keys that may be written through `kv.set` / `kv.unset`.
pub const ALLOWED_KEYS: &[&str] = &["nlp.model", "nlp.endpoint", "nlp.rate-limit"];

/// JSON-file-backed allowlisted KV store.
pub struct KvStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl KvStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("kv.json");

        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    fn check_key(key: &str) -> Result<()> {
        if ALLOWED_KEYS.contains(&key) {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "key {key:?} is not tunable; permitted keys: {}",
                ALLOWED_KEYS.join(", ")
            )))
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::check_key(key)?;
        let mut values = self.values.write();
        values.insert(key.to_owned(), value.to_owned());
        self.persist(&values)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// All set keys with their values, sorted by key.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = self
            .values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort();
        all
    }

    pub fn unset(&self, key: &str) -> Result<bool> {
        Self::check_key(key)?;
        let mut values = self.values.write();
        let removed = values.remove(key).is_some();
        if removed {
            self.persist(&values)?;
        }
        Ok(removed)
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(values).map_err(Error::Json)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn allowlisted_keys_round_trip() {
        let (_dir, store) = store();
        store.set("nlp.model", "gpt-4o").unwrap();
        assert_eq!(store.get("nlp.model").as_deref(), Some("gpt-4o"));
        assert!(store.unset("nlp.model").unwrap());
        assert!(store.get("nlp.model").is_none());
        assert!(!store.unset("nlp.model").unwrap());
    }

    #[test]
    fn unknown_key_refused_with_permitted_list() {
        let (_dir, store) = store();
        let err = store.set("server.port", "1").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nlp.model"));
        assert!(msg.contains("nlp.rate-limit"));
        assert!(store.list().is_empty());

        assert!(store.unset("anything.else").is_err());
    }

    #[test]
    fn list_is_sorted() {
        let (_dir, store) = store();
        store.set("nlp.rate-limit", "5").unwrap();
        store.set("nlp.endpoint", "http://localhost:11434").unwrap();
        let keys: Vec<String> = store.list().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["nlp.endpoint", "nlp.rate-limit"]);
    }
}
