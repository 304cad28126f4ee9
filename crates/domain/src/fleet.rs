//! Fleet entities: the agent row and its status machinery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Operator-visible lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Creating,
    Running,
    Stopped,
    Error,
    Disabled,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Creating => "creating",
            AgentStatus::Running => "running",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Error => "error",
            AgentStatus::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Where a freshly spawned agent sits in the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningState {
    Pending,
    Creating,
    Configuring,
    Healthy,
    Error,
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningState::Pending => "pending",
            ProvisioningState::Creating => "creating",
            ProvisioningState::Configuring => "configuring",
            ProvisioningState::Healthy => "healthy",
            ProvisioningState::Error => "error",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A long-lived worker process tracked by the control plane.
///
/// `id` is immutable after creation. `container_id` is set before
/// `provisioning` leaves `Creating`; `applied_config_version` exists iff
/// a config push succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub template: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Homeserver account ID, when the account provisioner ran.
    #[serde(default)]
    pub mxid: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub control_url: Option<String>,
    /// 128-bit random hex bearer token for the control protocol.
    #[serde(default)]
    pub acp_token: Option<String>,
    pub status: AgentStatus,
    #[serde(default)]
    pub provisioning: Option<ProvisioningState>,
    #[serde(default)]
    pub desired_config_hash: Option<String>,
    #[serde(default)]
    pub actual_config_hash: Option<String>,
    #[serde(default)]
    pub applied_config_version: Option<u64>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Build a new agent row in the pre-pipeline state.
    pub fn new(id: &str, display_name: &str, template: &str, image: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            template: template.to_owned(),
            image,
            mxid: None,
            container_id: None,
            control_url: None,
            acp_token: None,
            status: AgentStatus::Creating,
            provisioning: Some(ProvisioningState::Pending),
            desired_config_hash: None,
            actual_config_hash: None,
            applied_config_version: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent ID sanitising
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum agent ID length (DNS-label sized).
pub const MAX_AGENT_ID_LEN: usize = 63;

/// Validate an agent ID against `^[a-z0-9][a-z0-9-]{0,62}$`.
pub fn validate_agent_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_AGENT_ID_LEN {
        return Err(Error::Validation(format!(
            "agent id must be 1-{MAX_AGENT_ID_LEN} characters, got {}",
            id.len()
        )));
    }
    let mut chars = id.chars();
    let first = chars.next().unwrap_or('-');
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(Error::Validation(format!(
            "agent id must start with a lowercase letter or digit: {id:?}"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::Validation(format!(
            "agent id may only contain [a-z0-9-]: {id:?}"
        )));
    }
    Ok(())
}

/// Coerce free-form input into a valid agent ID.
///
/// Lowercases, maps disallowed characters to `-`, collapses runs,
/// trims leading/trailing dashes, and truncates to the length cap.
/// Returns `None` when nothing valid is left.
pub fn sanitize_agent_id(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true; // swallow leading dashes
    for c in raw.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(MAX_AGENT_ID_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Mint a fresh 128-bit random hex token for the control protocol.
pub fn new_acp_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids_pass() {
        for id in ["warren", "a", "agent-7", "0cool", "x".repeat(63).as_str()] {
            assert!(validate_agent_id(id).is_ok(), "{id:?} should be valid");
        }
    }

    #[test]
    fn invalid_ids_fail() {
        for id in ["", "-warren", "Warren", "war_ren", "war ren", "x".repeat(64).as_str()] {
            assert!(validate_agent_id(id).is_err(), "{id:?} should be invalid");
        }
    }

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(sanitize_agent_id("Warren"), Some("warren".into()));
        assert_eq!(sanitize_agent_id("My  Agent!"), Some("my-agent".into()));
        assert_eq!(sanitize_agent_id("--warren--"), Some("warren".into()));
        assert_eq!(sanitize_agent_id("saito_2"), Some("saito-2".into()));
    }

    #[test]
    fn sanitize_rejects_garbage() {
        assert_eq!(sanitize_agent_id("!!!"), None);
        assert_eq!(sanitize_agent_id(""), None);
    }

    #[test]
    fn sanitize_output_always_validates() {
        for raw in ["Warren", "a b c", "UPPER-case", "--x--", "日本語-agent"] {
            if let Some(id) = sanitize_agent_id(raw) {
                validate_agent_id(&id).unwrap();
            }
        }
    }

    #[test]
    fn acp_token_is_128_bit_hex() {
        let t = new_acp_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn new_agent_starts_pending() {
        let a = Agent::new("warren", "Warren", "cron-agent", Some("img:1".into()));
        assert_eq!(a.status, AgentStatus::Creating);
        assert_eq!(a.provisioning, Some(ProvisioningState::Pending));
        assert!(a.container_id.is_none());
        assert!(a.applied_config_version.is_none());
    }
}
