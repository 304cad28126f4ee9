//! Append-only, content-addressed, per-agent config version log.
//!
//! Each write validates the document, canonically re-marshals it, and
//! hashes the canonical bytes. A write whose hash equals the current
//! latest is refused as a no-op; otherwise the next monotonic version
//! number is allocated under the write lock and older versions beyond
//! the retention bound are pruned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use rk_domain::doc::AgentConfigDoc;
use rk_domain::error::{Error, Result};
use rk_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Version row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One stored configuration version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub agent_id: String,
    /// Per-agent monotonic counter starting at 1, no gaps at write time.
    pub version: u64,
    /// SHA-256 hex of the canonical YAML bytes.
    pub hash: String,
    pub yaml: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Result of a write: the surviving version plus whether the write was
/// refused as a hash-identical no-op.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub version: ConfigVersion,
    pub unchanged: bool,
}

/// SHA-256 hex digest of a canonical YAML document.
pub fn config_hash(yaml: &str) -> String {
    hex::encode(Sha256::digest(yaml.as_bytes()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Version store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed per-agent version log.
pub struct VersionStore {
    path: PathBuf,
    /// agent ID → versions, ascending by `version`.
    versions: RwLock<HashMap<String, Vec<ConfigVersion>>>,
    retained: usize,
}

impl VersionStore {
    /// Load or create the store at `state_path/config_versions.json`.
    pub fn new(state_path: &Path, retained: usize) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("config_versions.json");

        let versions: HashMap<String, Vec<ConfigVersion>> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            agents = versions.len(),
            retained,
            path = %path.display(),
            "config version store loaded"
        );

        Ok(Self {
            path,
            versions: RwLock::new(versions),
            retained,
        })
    }

    /// Validate, canonicalise, hash, and append a new version.
    ///
    /// Returns `unchanged = true` (with the existing latest) when the
    /// canonical hash equals the current latest's hash.
    pub fn write(&self, agent_id: &str, yaml: &str, created_by: &str) -> Result<WriteOutcome> {
        let doc = AgentConfigDoc::from_yaml(yaml)?;
        self.write_doc(agent_id, &doc, created_by)
    }

    /// Write an already-parsed document (the pipeline and section-patch
    /// paths land here so canonicalisation happens exactly once).
    pub fn write_doc(
        &self,
        agent_id: &str,
        doc: &AgentConfigDoc,
        created_by: &str,
    ) -> Result<WriteOutcome> {
        doc.validate()?;
        let canonical = doc.canonical_yaml()?;
        let hash = config_hash(&canonical);

        let mut versions = self.versions.write();
        let log = versions.entry(agent_id.to_owned()).or_default();

        if let Some(latest) = log.last() {
            if latest.hash == hash {
                let existing = latest.clone();
                TraceEvent::ConfigVersionWritten {
                    agent_id: agent_id.to_owned(),
                    version: existing.version,
                    hash_prefix: hash[..16].to_owned(),
                    unchanged: true,
                }
                .emit();
                return Ok(WriteOutcome {
                    version: existing,
                    unchanged: true,
                });
            }
        }

        let next = log.last().map(|v| v.version + 1).unwrap_or(1);
        let row = ConfigVersion {
            agent_id: agent_id.to_owned(),
            version: next,
            hash: hash.clone(),
            yaml: canonical,
            created_at: Utc::now(),
            created_by: created_by.to_owned(),
        };
        log.push(row.clone());

        // Retention: keep the newest `retained` versions.
        if log.len() > self.retained {
            let excess = log.len() - self.retained;
            log.drain(..excess);
        }

        self.persist(&versions)?;

        TraceEvent::ConfigVersionWritten {
            agent_id: agent_id.to_owned(),
            version: next,
            hash_prefix: hash[..16].to_owned(),
            unchanged: false,
        }
        .emit();

        Ok(WriteOutcome {
            version: row,
            unchanged: false,
        })
    }

    /// Load the latest version, apply a section mutator, re-validate,
    /// and delegate to the write path. A mutation whose canonical bytes
    /// equal the current latest is a no-op.
    pub fn patch_current(
        &self,
        agent_id: &str,
        created_by: &str,
        mutate: impl FnOnce(&mut AgentConfigDoc) -> Result<()>,
    ) -> Result<WriteOutcome> {
        let latest = self
            .latest(agent_id)
            .ok_or_else(|| Error::NotFound(format!("no config versions for agent {agent_id:?}")))?;
        let mut doc = AgentConfigDoc::from_yaml(&latest.yaml)?;
        mutate(&mut doc)?;
        self.write_doc(agent_id, &doc, created_by)
    }

    /// Create a new version whose content is a copy of `target_version`.
    ///
    /// No-op when the target's hash equals the current latest's hash;
    /// the history stays linear either way.
    pub fn rollback(
        &self,
        agent_id: &str,
        target_version: u64,
        created_by: &str,
    ) -> Result<WriteOutcome> {
        let mut versions = self.versions.write();
        let log = versions
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("no config versions for agent {agent_id:?}")))?;

        let target = log
            .iter()
            .find(|v| v.version == target_version)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "config version {target_version} for agent {agent_id:?}"
                ))
            })?
            .clone();

        let latest = log.last().cloned();
        if let Some(latest) = latest {
            if latest.hash == target.hash {
                return Ok(WriteOutcome {
                    version: latest,
                    unchanged: true,
                });
            }
        }

        let next = log.last().map(|v| v.version + 1).unwrap_or(1);
        let row = ConfigVersion {
            agent_id: agent_id.to_owned(),
            version: next,
            hash: target.hash.clone(),
            yaml: target.yaml.clone(),
            created_at: Utc::now(),
            created_by: created_by.to_owned(),
        };
        log.push(row.clone());
        if log.len() > self.retained {
            let excess = log.len() - self.retained;
            log.drain(..excess);
        }
        self.persist(&versions)?;

        Ok(WriteOutcome {
            version: row,
            unchanged: false,
        })
    }

    pub fn latest(&self, agent_id: &str) -> Option<ConfigVersion> {
        self.versions
            .read()
            .get(agent_id)
            .and_then(|log| log.last().cloned())
    }

    pub fn get(&self, agent_id: &str, version: u64) -> Option<ConfigVersion> {
        self.versions
            .read()
            .get(agent_id)
            .and_then(|log| log.iter().find(|v| v.version == version).cloned())
    }

    /// All retained versions for an agent, newest first.
    pub fn list(&self, agent_id: &str) -> Vec<ConfigVersion> {
        self.versions
            .read()
            .get(agent_id)
            .map(|log| log.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every version for an agent (called on agent delete).
    pub fn purge(&self, agent_id: &str) -> Result<()> {
        let mut versions = self.versions.write();
        if versions.remove(agent_id).is_some() {
            self.persist(&versions)?;
        }
        Ok(())
    }

    fn persist(&self, versions: &HashMap<String, Vec<ConfigVersion>>) -> Result<()> {
        let json = serde_json::to_string_pretty(versions).map_err(Error::Json)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
