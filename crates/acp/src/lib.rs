//! Agent Control Protocol client.
//!
//! A stateless HTTP client for the per-agent control plane. Four calls,
//! all authenticated with the agent's bearer token:
//!
//! | Call          | Method / path          | Notes                          |
//! |---------------|------------------------|--------------------------------|
//! | `health`      | `GET  /v1/health`      | liveness polling               |
//! | `status`      | `GET  /v1/status`      | echoes the applied config hash |
//! | `apply_config`| `POST /v1/config`      | idempotent, safe to retry      |
//! | `cancel`      | `POST /v1/cancel`      | best-effort                    |

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use rk_domain::error::{Error, Result};
use rk_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    /// SHA-256 hex of the config the agent currently runs. Older agents
    /// may omit it.
    #[serde(default, rename = "configHash")]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub gateways: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApplyConfigRequest<'a> {
    yaml: &'a str,
    hash: &'a str,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Control-protocol client bound to one agent's `control_url` + token.
#[derive(Debug, Clone)]
pub struct AcpClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    agent_id: String,
}

impl AcpClient {
    /// Build a client with a per-call timeout.
    pub fn new(agent_id: &str, control_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: control_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            agent_id: agent_id.to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, call: &str, rb: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let start = Instant::now();
        let result = rb.bearer_auth(&self.token).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(resp) => {
                let status = resp.status();
                TraceEvent::AcpCall {
                    agent_id: self.agent_id.clone(),
                    call: call.to_owned(),
                    status: status.as_u16(),
                    duration_ms,
                }
                .emit();

                if status.is_server_error() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Transient(format!(
                        "{call} returned {status}: {body}"
                    )));
                }
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Http(format!("{call} returned {status}: {body}")));
                }
                Ok(resp)
            }
            Err(e) => {
                TraceEvent::AcpCall {
                    agent_id: self.agent_id.clone(),
                    call: call.to_owned(),
                    status: 0,
                    duration_ms,
                }
                .emit();
                // Connection refused / timeout — worth another attempt.
                Err(Error::Transient(format!("{call}: {e}")))
            }
        }
    }

    /// Liveness probe.
    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .execute("health", self.http.get(self.url("/v1/health")))
            .await?;
        resp.json()
            .await
            .map_err(|e| Error::Http(format!("health: decoding body: {e}")))
    }

    /// Status snapshot, including the echoed config hash when supported.
    pub async fn status(&self) -> Result<StatusResponse> {
        let resp = self
            .execute("status", self.http.get(self.url("/v1/status")))
            .await?;
        resp.json()
            .await
            .map_err(|e| Error::Http(format!("status: decoding body: {e}")))
    }

    /// Push a config document. Idempotent on the agent side.
    pub async fn apply_config(&self, yaml: &str, hash: &str) -> Result<()> {
        let body = ApplyConfigRequest { yaml, hash };
        self.execute(
            "apply_config",
            self.http.post(self.url("/v1/config")).json(&body),
        )
        .await?;
        Ok(())
    }

    /// Ask the agent to stop in-flight work. Best-effort.
    pub async fn cancel(&self) -> Result<()> {
        self.execute("cancel", self.http.post(self.url("/v1/cancel")))
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run an async operation up to `attempts` times, backing off 250ms,
/// 500ms, 1s, … between tries. Only transient errors are retried;
/// anything else surfaces immediately.
pub async fn with_retry<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = Error::Transient("no attempts made".into());
    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = Duration::from_millis(250 * 2u64.pow(attempt - 1));
            tokio::time::sleep(backoff).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                tracing::warn!(attempt = attempt + 1, error = %e, "transient error, retrying");
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
