use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provisioning pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Seconds between runtime / health polls.
    #[serde(default = "d_poll_interval")]
    pub poll_interval_secs: u64,
    /// Deadline for the container to reach `running`.
    #[serde(default = "d_running_deadline")]
    pub running_deadline_secs: u64,
    /// Deadline for the agent's control plane to answer `Health`.
    #[serde(default = "d_health_deadline")]
    pub health_deadline_secs: u64,
    /// Deadline for the single post-push `Status` verification call.
    #[serde(default = "d_status_deadline")]
    pub status_deadline_secs: u64,
    /// Bounded attempts for `ApplyConfig` on transient errors.
    #[serde(default = "d_apply_retries")]
    pub apply_retries: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: d_poll_interval(),
            running_deadline_secs: d_running_deadline(),
            health_deadline_secs: d_health_deadline(),
            status_deadline_secs: d_status_deadline(),
            apply_retries: d_apply_retries(),
        }
    }
}

fn d_poll_interval() -> u64 {
    2
}
fn d_running_deadline() -> u64 {
    60
}
fn d_health_deadline() -> u64 {
    90
}
fn d_status_deadline() -> u64 {
    15
}
fn d_apply_retries() -> u32 {
    3
}
