use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Endpoints for the external services the control plane drives. Each is
/// optional: an empty URL means the corresponding feature degrades with
/// an operator-visible message instead of failing at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntegrationsConfig {
    /// Container runtime driver (spawn/start/stop/restart/remove/status).
    #[serde(default)]
    pub runtime_url: String,
    /// Outbound room-notice webhook (the chat connector).
    #[serde(default)]
    pub rooms_url: String,
    /// Homeserver account provisioner.
    #[serde(default)]
    pub accounts_url: String,
    /// One-time secret-entry link issuer.
    #[serde(default)]
    pub links_url: String,
    /// Encrypted vault / secret distributor.
    #[serde(default)]
    pub vault_url: String,
    /// Bearer token env var shared by the integration endpoints.
    #[serde(default = "d_token_env")]
    pub token_env: String,
}

fn d_token_env() -> String {
    "RURIKO_INTEGRATIONS_TOKEN".into()
}
