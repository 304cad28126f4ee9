use std::sync::Arc;
use std::time::Duration;

use rk_acp::AcpClient;
use rk_domain::audit::AuditEntry;
use rk_domain::config::Config;
use rk_domain::error::{Error, Result};
use rk_domain::fleet::Agent;
use rk_providers::NlpHealthState;
use rk_store::{AgentStore, ApprovalStore, AuditLog, KvStore, SecretStore, VersionStore};

use crate::approvals::ApprovalGate;
use crate::guardrail::Guardrail;
use crate::ports::{
    AccountProvisioner, AuditNotifier, ContainerRuntime, LinkIssuer, RoomSender, SecretDistributor,
};

/// Default timeout for operator-triggered ad-hoc control-protocol calls.
/// The pipeline derives its own per-step timeouts from its deadlines.
const ACP_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to every handler.
///
/// Fields are grouped by concern:
/// - **Config** — the immutable control-plane configuration
/// - **Stores** — the persistence driver (single source of truth)
/// - **Gate** — the four-eyes approval gate
/// - **Ports** — external collaborator clients
/// - **NLP & security** — classifier health, guardrail, inbound auth
#[derive(Clone)]
pub struct AppState {
    // ── Config ────────────────────────────────────────────────────────
    pub config: Arc<Config>,

    // ── Stores ────────────────────────────────────────────────────────
    pub agents: Arc<AgentStore>,
    pub versions: Arc<VersionStore>,
    pub approvals: Arc<ApprovalStore>,
    pub audit: Arc<AuditLog>,
    pub kv: Arc<KvStore>,
    pub secrets: Arc<SecretStore>,

    // ── Gate ──────────────────────────────────────────────────────────
    pub gate: Arc<ApprovalGate>,

    // ── Ports ─────────────────────────────────────────────────────────
    /// Container runtime driver. `None` = not configured.
    pub runtime: Option<Arc<dyn ContainerRuntime>>,
    pub rooms: Arc<dyn RoomSender>,
    pub accounts: Option<Arc<dyn AccountProvisioner>>,
    pub links: Option<Arc<dyn LinkIssuer>>,
    pub distributor: Option<Arc<dyn SecretDistributor>>,
    pub notifier: Arc<dyn AuditNotifier>,

    // ── NLP & security ────────────────────────────────────────────────
    pub guardrail: Arc<Guardrail>,
    pub nlp_health: Arc<NlpHealthState>,
    /// SHA-256 hash of the inbound API bearer token (read once at
    /// startup). `None` = dev mode, no auth enforced.
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// The runtime driver, or a validation error naming the gap.
    pub fn require_runtime(&self) -> Result<Arc<dyn ContainerRuntime>> {
        self.runtime.clone().ok_or_else(|| {
            Error::Validation(
                "no container runtime configured (integrations.runtime_url)".into(),
            )
        })
    }

    /// Build a control-protocol client for an agent with the default
    /// ad-hoc timeout.
    pub fn acp(&self, agent: &Agent) -> Result<AcpClient> {
        self.acp_with_timeout(agent, ACP_CALL_TIMEOUT)
    }

    /// Write an audit row and fan it out to the notifier.
    ///
    /// The primary operation has already committed by the time a row is
    /// written, so a failing audit write is logged and swallowed.
    pub async fn record_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry) {
            tracing::warn!(error = %e, action = %entry.action, "audit write failed");
        }
        self.notifier.notify(&entry).await;
    }

    pub fn acp_with_timeout(&self, agent: &Agent, timeout: Duration) -> Result<AcpClient> {
        let control_url = agent.control_url.as_deref().ok_or_else(|| {
            Error::Validation(format!("agent {:?} has no control URL yet", agent.id))
        })?;
        let token = agent.acp_token.as_deref().ok_or_else(|| {
            Error::Validation(format!("agent {:?} has no control token", agent.id))
        })?;
        AcpClient::new(&agent.id, control_url, token, timeout)
    }
}
