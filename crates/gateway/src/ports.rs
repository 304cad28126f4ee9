//! External collaborator ports.
//!
//! The chat transport, container runtime, homeserver provisioner,
//! secret vault, link issuer, and audit sink are separate services.
//! The control plane drives each through a narrow trait; the default
//! implementations here speak JSON over HTTP to the configured
//! endpoints, and tests substitute in-process fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use rk_domain::audit::AuditEntry;
use rk_domain::config::IntegrationsConfig;
use rk_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Container runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the runtime reports about a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Starting,
    Running,
    Exited,
    Removing,
    Unknown,
}

/// Inputs for spawning an agent container.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub agent_id: String,
    pub template: String,
    pub image: Option<String>,
    /// The bearer token the agent's control plane will require.
    pub acp_token: String,
}

/// Handle returned by a successful spawn.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerHandle {
    pub container_id: String,
    pub control_url: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ContainerHandle>;
    async fn start(&self, container_id: &str) -> Result<()>;
    async fn stop(&self, container_id: &str) -> Result<()>;
    async fn restart(&self, container_id: &str) -> Result<()>;
    async fn remove(&self, container_id: &str) -> Result<()>;
    async fn status(&self, container_id: &str) -> Result<ContainerState>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Room sender
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One-shot outbound notice into a chat room.
#[async_trait]
pub trait RoomSender: Send + Sync {
    async fn send_notice(&self, room_id: &str, message: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Account provisioner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionedAccount {
    pub mxid: String,
}

/// Creates a homeserver account for a new agent.
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    async fn provision(&self, agent_id: &str) -> Result<ProvisionedAccount>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secret link issuer + distributor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Issues one-time HTTPS links for entering secret values out of band.
#[async_trait]
pub trait LinkIssuer: Send + Sync {
    async fn issue(&self, secret_name: &str, rotate: bool) -> Result<String>;
}

/// Pushes stored secret values from the vault to a running agent.
#[async_trait]
pub trait SecretDistributor: Send + Sync {
    async fn push(&self, agent_id: &str, secret_name: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit notifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Best-effort fan-out of audit rows to an external sink. Failures are
/// the sink's problem, never the handler's.
#[async_trait]
pub trait AuditNotifier: Send + Sync {
    async fn notify(&self, entry: &AuditEntry);
}

/// Default notifier: structured log line only.
pub struct TracingAuditNotifier;

#[async_trait]
impl AuditNotifier for TracingAuditNotifier {
    async fn notify(&self, entry: &AuditEntry) {
        tracing::info!(
            trace_id = %entry.trace_id,
            actor = %entry.actor,
            action = %entry.action,
            result = %entry.result,
            "audit"
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const INTEGRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared plumbing for the JSON-over-HTTP integrations.
#[derive(Clone)]
struct HttpEndpoint {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpEndpoint {
    fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(INTEGRATION_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let mut rb = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&body);
        if let Some(token) = &self.token {
            rb = rb.bearer_auth(token);
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| Error::Transient(format!("{path}: {e}")))?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(Error::Transient(format!("{path} returned {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{path} returned {status}: {text}")));
        }
        Ok(resp)
    }
}

/// Runtime driver speaking to the container-runtime shim.
pub struct HttpContainerRuntime {
    endpoint: HttpEndpoint,
}

impl HttpContainerRuntime {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: HttpEndpoint::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl ContainerRuntime for HttpContainerRuntime {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ContainerHandle> {
        let resp = self
            .endpoint
            .post(
                "/v1/containers/spawn",
                serde_json::json!({
                    "agent_id": spec.agent_id,
                    "template": spec.template,
                    "image": spec.image,
                    "acp_token": spec.acp_token,
                }),
            )
            .await?;
        resp.json()
            .await
            .map_err(|e| Error::Http(format!("spawn: decoding body: {e}")))
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.endpoint
            .post(
                "/v1/containers/start",
                serde_json::json!({"container_id": container_id}),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.endpoint
            .post(
                "/v1/containers/stop",
                serde_json::json!({"container_id": container_id}),
            )
            .await?;
        Ok(())
    }

    async fn restart(&self, container_id: &str) -> Result<()> {
        self.endpoint
            .post(
                "/v1/containers/restart",
                serde_json::json!({"container_id": container_id}),
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.endpoint
            .post(
                "/v1/containers/remove",
                serde_json::json!({"container_id": container_id}),
            )
            .await?;
        Ok(())
    }

    async fn status(&self, container_id: &str) -> Result<ContainerState> {
        #[derive(Deserialize)]
        struct StatusBody {
            state: ContainerState,
        }
        let resp = self
            .endpoint
            .post(
                "/v1/containers/status",
                serde_json::json!({"container_id": container_id}),
            )
            .await?;
        let body: StatusBody = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("status: decoding body: {e}")))?;
        Ok(body.state)
    }
}

/// Room sender posting notices through the chat connector's webhook.
pub struct WebhookRoomSender {
    endpoint: HttpEndpoint,
}

impl WebhookRoomSender {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: HttpEndpoint::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl RoomSender for WebhookRoomSender {
    async fn send_notice(&self, room_id: &str, message: &str) -> Result<()> {
        self.endpoint
            .post(
                "/v1/notices",
                serde_json::json!({"room_id": room_id, "message": message}),
            )
            .await?;
        Ok(())
    }
}

/// Fallback sender when no connector webhook is configured: notices
/// land in the log instead of a room.
pub struct LoggingRoomSender;

#[async_trait]
impl RoomSender for LoggingRoomSender {
    async fn send_notice(&self, room_id: &str, message: &str) -> Result<()> {
        tracing::info!(room_id, message, "room notice (no connector configured)");
        Ok(())
    }
}

/// Homeserver account provisioner over HTTP.
pub struct HttpAccountProvisioner {
    endpoint: HttpEndpoint,
}

impl HttpAccountProvisioner {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: HttpEndpoint::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl AccountProvisioner for HttpAccountProvisioner {
    async fn provision(&self, agent_id: &str) -> Result<ProvisionedAccount> {
        let resp = self
            .endpoint
            .post("/v1/accounts", serde_json::json!({"agent_id": agent_id}))
            .await?;
        resp.json()
            .await
            .map_err(|e| Error::Http(format!("provision: decoding body: {e}")))
    }
}

/// One-time-link issuer over HTTP.
pub struct HttpLinkIssuer {
    endpoint: HttpEndpoint,
}

impl HttpLinkIssuer {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: HttpEndpoint::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl LinkIssuer for HttpLinkIssuer {
    async fn issue(&self, secret_name: &str, rotate: bool) -> Result<String> {
        #[derive(Deserialize)]
        struct LinkBody {
            url: String,
        }
        let resp = self
            .endpoint
            .post(
                "/v1/links",
                serde_json::json!({"secret": secret_name, "rotate": rotate}),
            )
            .await?;
        let body: LinkBody = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("issue: decoding body: {e}")))?;
        Ok(body.url)
    }
}

/// Vault-backed secret distributor over HTTP.
pub struct HttpSecretDistributor {
    endpoint: HttpEndpoint,
}

impl HttpSecretDistributor {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: HttpEndpoint::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl SecretDistributor for HttpSecretDistributor {
    async fn push(&self, agent_id: &str, secret_name: &str) -> Result<()> {
        self.endpoint
            .post(
                "/v1/push",
                serde_json::json!({"agent_id": agent_id, "secret": secret_name}),
            )
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The assembled set of collaborator ports.
pub struct Integrations {
    pub runtime: Option<Arc<dyn ContainerRuntime>>,
    pub rooms: Arc<dyn RoomSender>,
    pub accounts: Option<Arc<dyn AccountProvisioner>>,
    pub links: Option<Arc<dyn LinkIssuer>>,
    pub distributor: Option<Arc<dyn SecretDistributor>>,
}

/// Build the port set from configuration. Empty URLs leave the
/// corresponding port unset (features degrade with operator-visible
/// messages); the room sender always exists, falling back to the log.
pub fn build_integrations(cfg: &IntegrationsConfig) -> Result<Integrations> {
    let token = std::env::var(&cfg.token_env).ok().filter(|t| !t.is_empty());

    let runtime: Option<Arc<dyn ContainerRuntime>> = if cfg.runtime_url.is_empty() {
        None
    } else {
        Some(Arc::new(HttpContainerRuntime::new(
            &cfg.runtime_url,
            token.clone(),
        )?))
    };

    let rooms: Arc<dyn RoomSender> = if cfg.rooms_url.is_empty() {
        Arc::new(LoggingRoomSender)
    } else {
        Arc::new(WebhookRoomSender::new(&cfg.rooms_url, token.clone())?)
    };

    let accounts: Option<Arc<dyn AccountProvisioner>> = if cfg.accounts_url.is_empty() {
        None
    } else {
        Some(Arc::new(HttpAccountProvisioner::new(
            &cfg.accounts_url,
            token.clone(),
        )?))
    };

    let links: Option<Arc<dyn LinkIssuer>> = if cfg.links_url.is_empty() {
        None
    } else {
        Some(Arc::new(HttpLinkIssuer::new(&cfg.links_url, token.clone())?))
    };

    let distributor: Option<Arc<dyn SecretDistributor>> = if cfg.vault_url.is_empty() {
        None
    } else {
        Some(Arc::new(HttpSecretDistributor::new(&cfg.vault_url, token)?))
    };

    Ok(Integrations {
        runtime,
        rooms,
        accounts,
        links,
        distributor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_state_parses_lowercase() {
        let s: ContainerState = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(s, ContainerState::Running);
        let s: ContainerState = serde_json::from_str("\"exited\"").unwrap();
        assert_eq!(s, ContainerState::Exited);
    }

    #[test]
    fn empty_config_builds_degraded_ports() {
        let ports = build_integrations(&IntegrationsConfig::default()).unwrap();
        assert!(ports.runtime.is_none());
        assert!(ports.accounts.is_none());
        assert!(ports.links.is_none());
        assert!(ports.distributor.is_none());
    }

    #[tokio::test]
    async fn logging_room_sender_never_fails() {
        LoggingRoomSender
            .send_notice("!ops:hs", "hello")
            .await
            .unwrap();
    }
}
