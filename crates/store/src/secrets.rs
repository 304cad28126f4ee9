//! Secret metadata and agent bindings.
//!
//! Secret *values* never pass through the control plane: entry happens
//! over one-time HTTPS links and storage lives in the external vault.
//! This store tracks only names, lifecycle timestamps, and which agents
//! each secret is bound to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rk_domain::error::{Error, Result};

/// Metadata for one named secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub rotated_at: Option<DateTime<Utc>>,
    /// Agents this secret is distributed to.
    #[serde(default)]
    pub bound_agents: Vec<String>,
}

/// JSON-file-backed secret metadata store.
pub struct SecretStore {
    path: PathBuf,
    secrets: RwLock<HashMap<String, SecretRecord>>,
}

impl SecretStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("secrets.json");

        let secrets = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            secrets: RwLock::new(secrets),
        })
    }

    pub fn create(&self, name: &str) -> Result<SecretRecord> {
        let mut secrets = self.secrets.write();
        if secrets.contains_key(name) {
            return Err(Error::Conflict(format!("secret {name:?} already exists")));
        }
        let record = SecretRecord {
            name: name.to_owned(),
            created_at: Utc::now(),
            rotated_at: None,
            bound_agents: Vec::new(),
        };
        secrets.insert(name.to_owned(), record.clone());
        self.persist(&secrets)?;
        Ok(record)
    }

    pub fn rotate(&self, name: &str) -> Result<SecretRecord> {
        let mut secrets = self.secrets.write();
        let record = secrets
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;
        record.rotated_at = Some(Utc::now());
        let snapshot = record.clone();
        self.persist(&secrets)?;
        Ok(snapshot)
    }

    pub fn delete(&self, name: &str) -> Result<SecretRecord> {
        let mut secrets = self.secrets.write();
        let record = secrets
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;
        self.persist(&secrets)?;
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Option<SecretRecord> {
        self.secrets.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<SecretRecord> {
        let mut all: Vec<SecretRecord> = self.secrets.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn bind(&self, name: &str, agent_id: &str) -> Result<SecretRecord> {
        let mut secrets = self.secrets.write();
        let record = secrets
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;
        if !record.bound_agents.iter().any(|a| a == agent_id) {
            record.bound_agents.push(agent_id.to_owned());
            record.bound_agents.sort();
        }
        let snapshot = record.clone();
        self.persist(&secrets)?;
        Ok(snapshot)
    }

    pub fn unbind(&self, name: &str, agent_id: &str) -> Result<SecretRecord> {
        let mut secrets = self.secrets.write();
        let record = secrets
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;
        record.bound_agents.retain(|a| a != agent_id);
        let snapshot = record.clone();
        self.persist(&secrets)?;
        Ok(snapshot)
    }

    /// All secrets bound to an agent, sorted by name.
    pub fn bound_to(&self, agent_id: &str) -> Vec<SecretRecord> {
        self.list()
            .into_iter()
            .filter(|s| s.bound_agents.iter().any(|a| a == agent_id))
            .collect()
    }

    fn persist(&self, secrets: &HashMap<String, SecretRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(secrets).map_err(Error::Json)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SecretStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_rotate_delete() {
        let (_dir, store) = store();
        let created = store.create("openai-key").unwrap();
        assert!(created.rotated_at.is_none());

        let rotated = store.rotate("openai-key").unwrap();
        assert!(rotated.rotated_at.is_some());

        store.delete("openai-key").unwrap();
        assert!(store.get("openai-key").is_none());
    }

    #[test]
    fn duplicate_create_conflicts() {
        let (_dir, store) = store();
        store.create("k").unwrap();
        assert!(matches!(store.create("k"), Err(Error::Conflict(_))));
    }

    #[test]
    fn missing_secret_operations_are_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.rotate("k"), Err(Error::NotFound(_))));
        assert!(matches!(store.delete("k"), Err(Error::NotFound(_))));
        assert!(matches!(store.bind("k", "warren"), Err(Error::NotFound(_))));
    }

    #[test]
    fn bind_is_idempotent_and_unbind_removes() {
        let (_dir, store) = store();
        store.create("k").unwrap();
        store.bind("k", "warren").unwrap();
        let again = store.bind("k", "warren").unwrap();
        assert_eq!(again.bound_agents, vec!["warren"]);

        store.bind("k", "saito").unwrap();
        assert_eq!(store.bound_to("warren").len(), 1);
        assert_eq!(store.bound_to("saito").len(), 1);

        let after = store.unbind("k", "warren").unwrap();
        assert_eq!(after.bound_agents, vec!["saito"]);
        assert!(store.bound_to("warren").is_empty());
    }
}
