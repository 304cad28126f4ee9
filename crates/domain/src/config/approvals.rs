use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approvals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// How long a pending approval stays actionable.
    #[serde(default = "d_ttl_minutes")]
    pub ttl_minutes: u64,
    /// Dotted action keys requiring four-eyes approval.
    #[serde(default = "d_gated_actions")]
    pub gated_actions: Vec<String>,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: d_ttl_minutes(),
            gated_actions: d_gated_actions(),
        }
    }
}

impl ApprovalsConfig {
    pub fn is_gated(&self, action: &str) -> bool {
        self.gated_actions.iter().any(|a| a == action)
    }
}

fn d_ttl_minutes() -> u64 {
    15
}

fn d_gated_actions() -> Vec<String> {
    [
        "agents.delete",
        "secrets.rotate",
        "secrets.delete",
        "config.set",
        "config.set-persona",
        "config.set-instructions",
        "config.rollback",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_actions_gated_by_default() {
        let cfg = ApprovalsConfig::default();
        assert!(cfg.is_gated("agents.delete"));
        assert!(cfg.is_gated("config.rollback"));
        assert!(!cfg.is_gated("agents.list"));
        assert!(!cfg.is_gated("agents.create"));
    }
}
