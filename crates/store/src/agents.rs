//! Durable agent rows.
//!
//! Persists the fleet in `agents.json` under the configured state path.
//! Mutations run through closures under the write lock, so read-then-write
//! sequences are atomic with respect to other callers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use rk_domain::error::{Error, Result};
use rk_domain::fleet::Agent;

/// JSON-file-backed store of agent rows, keyed by agent ID.
pub struct AgentStore {
    path: PathBuf,
    agents: RwLock<HashMap<String, Agent>>,
}

impl AgentStore {
    /// Load or create the store at `state_path/agents.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("agents.json");

        let agents = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            agents = agents.len(),
            path = %path.display(),
            "agent store loaded"
        );

        Ok(Self {
            path,
            agents: RwLock::new(agents),
        })
    }

    /// Insert a new agent. Refused when the ID is already taken.
    pub fn insert(&self, agent: Agent) -> Result<()> {
        let mut agents = self.agents.write();
        if agents.contains_key(&agent.id) {
            return Err(Error::Conflict(format!(
                "agent {:?} already exists",
                agent.id
            )));
        }
        agents.insert(agent.id.clone(), agent);
        self.persist(&agents)
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().get(id).cloned()
    }

    /// Fetch an agent or fail with `NotFound`.
    pub fn require(&self, id: &str) -> Result<Agent> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("agent {id:?}")))
    }

    /// All agents, sorted by ID.
    pub fn list(&self) -> Vec<Agent> {
        let mut all: Vec<Agent> = self.agents.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Mutate one agent under the write lock. Bumps `updated_at`.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut Agent)) -> Result<Agent> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("agent {id:?}")))?;
        f(agent);
        agent.updated_at = Utc::now();
        let snapshot = agent.clone();
        self.persist(&agents)?;
        Ok(snapshot)
    }

    /// Remove an agent row, returning it.
    pub fn remove(&self, id: &str) -> Result<Agent> {
        let mut agents = self.agents.write();
        let agent = agents
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("agent {id:?}")))?;
        self.persist(&agents)?;
        Ok(agent)
    }

    pub fn count(&self) -> usize {
        self.agents.read().len()
    }

    fn persist(&self, agents: &HashMap<String, Agent>) -> Result<()> {
        let json = serde_json::to_string_pretty(agents).map_err(Error::Json)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rk_domain::fleet::AgentStatus;

    fn store() -> (tempfile::TempDir, AgentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_get_list() {
        let (_dir, store) = store();
        store
            .insert(Agent::new("warren", "Warren", "cron-agent", None))
            .unwrap();
        store
            .insert(Agent::new("saito", "Saito", "chat-agent", None))
            .unwrap();

        assert_eq!(store.get("warren").unwrap().display_name, "Warren");
        let ids: Vec<_> = store.list().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["saito", "warren"]);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let (_dir, store) = store();
        store
            .insert(Agent::new("warren", "Warren", "cron-agent", None))
            .unwrap();
        let err = store
            .insert(Agent::new("warren", "Other", "cron-agent", None))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn update_bumps_timestamp() {
        let (_dir, store) = store();
        store
            .insert(Agent::new("warren", "Warren", "cron-agent", None))
            .unwrap();
        let before = store.get("warren").unwrap().updated_at;

        let after = store
            .update("warren", |a| a.status = AgentStatus::Running)
            .unwrap();
        assert_eq!(after.status, AgentStatus::Running);
        assert!(after.updated_at >= before);
    }

    #[test]
    fn update_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.update("ghost", |_| {}).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn remove_then_get_is_none() {
        let (_dir, store) = store();
        store
            .insert(Agent::new("warren", "Warren", "cron-agent", None))
            .unwrap();
        store.remove("warren").unwrap();
        assert!(store.get("warren").is_none());
        assert!(matches!(store.remove("warren"), Err(Error::NotFound(_))));
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = AgentStore::new(dir.path()).unwrap();
            store
                .insert(Agent::new("warren", "Warren", "cron-agent", None))
                .unwrap();
        }
        let reloaded = AgentStore::new(dir.path()).unwrap();
        assert_eq!(reloaded.get("warren").unwrap().template, "cron-agent");
    }
}
