//! Shared test harness: an engine wired to in-process fakes plus tiny
//! HTTP servers standing in for the agent control plane and the
//! classifier endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use parking_lot::Mutex;
use tempfile::TempDir;

use rk_domain::config::Config;
use rk_domain::error::{Error, Result};
use rk_providers::{NlpHealth, NlpHealthState};
use rk_store::{AgentStore, ApprovalStore, AuditLog, KvStore, SecretStore, VersionStore};

use rk_gateway::approvals::ApprovalGate;
use rk_gateway::commands::ChatEvent;
use rk_gateway::engine::Engine;
use rk_gateway::guardrail::Guardrail;
use rk_gateway::ports::{
    AccountProvisioner, AuditNotifier, ContainerHandle, ContainerRuntime, ContainerState,
    LinkIssuer, ProvisionedAccount, RoomSender, SecretDistributor, SpawnSpec,
};
use rk_gateway::state::AppState;

pub const ROOM: &str = "!ops:example.org";
pub const ALICE: &str = "@alice:example.org";
pub const BOB: &str = "@bob:example.org";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake ports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FakeRuntime {
    pub control_url: Mutex<String>,
    pub states: Mutex<HashMap<String, ContainerState>>,
    pub spawned: Mutex<Vec<String>>,
    pub fail_spawn: AtomicBool,
    /// State containers land in right after spawn.
    pub spawn_state: Mutex<ContainerState>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            control_url: Mutex::new(String::new()),
            states: Mutex::new(HashMap::new()),
            spawned: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            spawn_state: Mutex::new(ContainerState::Running),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ContainerHandle> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(Error::Transient("runtime driver down".into()));
        }
        let container_id = format!("ctr-{}", spec.agent_id);
        self.spawned.lock().push(spec.agent_id.clone());
        let initial = *self.spawn_state.lock();
        self.states.lock().insert(container_id.clone(), initial);
        Ok(ContainerHandle {
            container_id,
            control_url: self.control_url.lock().clone(),
        })
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.states
            .lock()
            .insert(container_id.to_owned(), ContainerState::Running);
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.states
            .lock()
            .insert(container_id.to_owned(), ContainerState::Exited);
        Ok(())
    }

    async fn restart(&self, container_id: &str) -> Result<()> {
        self.states
            .lock()
            .insert(container_id.to_owned(), ContainerState::Running);
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.states.lock().remove(container_id);
        Ok(())
    }

    async fn status(&self, container_id: &str) -> Result<ContainerState> {
        Ok(self
            .states
            .lock()
            .get(container_id)
            .copied()
            .unwrap_or(ContainerState::Unknown))
    }
}

#[derive(Default)]
pub struct RecordingRooms {
    pub notices: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl RoomSender for RecordingRooms {
    async fn send_notice(&self, room_id: &str, message: &str) -> Result<()> {
        self.notices
            .lock()
            .push((room_id.to_owned(), message.to_owned()));
        Ok(())
    }
}

pub struct FakeAccounts;

#[async_trait]
impl AccountProvisioner for FakeAccounts {
    async fn provision(&self, agent_id: &str) -> Result<ProvisionedAccount> {
        Ok(ProvisionedAccount {
            mxid: format!("@{agent_id}:example.org"),
        })
    }
}

pub struct FakeLinks;

#[async_trait]
impl LinkIssuer for FakeLinks {
    async fn issue(&self, secret_name: &str, rotate: bool) -> Result<String> {
        Ok(format!(
            "https://kuze.example.org/enter/{secret_name}?rotate={rotate}"
        ))
    }
}

#[derive(Default)]
pub struct RecordingDistributor {
    pub pushes: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SecretDistributor for RecordingDistributor {
    async fn push(&self, agent_id: &str, secret_name: &str) -> Result<()> {
        self.pushes
            .lock()
            .push((agent_id.to_owned(), secret_name.to_owned()));
        Ok(())
    }
}

pub struct NullNotifier;

#[async_trait]
impl AuditNotifier for NullNotifier {
    async fn notify(&self, _entry: &rk_domain::audit::AuditEntry) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake agent control plane (real HTTP, echoes applied hashes)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct FakeAgentPlane {
    pub applied_hash: Mutex<Option<String>>,
    pub cancels: Mutex<usize>,
    /// When set, Status echoes this instead of the applied hash.
    pub echo_override: Mutex<Option<String>>,
}

pub async fn spawn_agent_plane() -> (String, Arc<FakeAgentPlane>) {
    let plane = Arc::new(FakeAgentPlane::default());

    async fn health() -> Json<serde_json::Value> {
        Json(serde_json::json!({"status": "ok"}))
    }
    async fn status(State(plane): State<Arc<FakeAgentPlane>>) -> Json<serde_json::Value> {
        let hash = plane
            .echo_override
            .lock()
            .clone()
            .or_else(|| plane.applied_hash.lock().clone());
        Json(serde_json::json!({"configHash": hash, "gateways": []}))
    }
    async fn apply(
        State(plane): State<Arc<FakeAgentPlane>>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let hash = body["hash"].as_str().unwrap_or_default().to_owned();
        *plane.applied_hash.lock() = Some(hash);
        Json(serde_json::json!({}))
    }
    async fn cancel(State(plane): State<Arc<FakeAgentPlane>>) -> Json<serde_json::Value> {
        *plane.cancels.lock() += 1;
        Json(serde_json::json!({}))
    }

    let app = axum::Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/config", post(apply))
        .route("/v1/cancel", post(cancel))
        .with_state(plane.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), plane)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake classifier endpoint (OpenAI-compatible)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct FakeClassifier {
    /// Envelope JSON strings handed out in order; the last one repeats.
    pub replies: Mutex<VecDeque<String>>,
}

impl FakeClassifier {
    pub fn push(&self, envelope: serde_json::Value) {
        self.replies.lock().push_back(envelope.to_string());
    }
}

pub async fn spawn_classifier() -> (String, Arc<FakeClassifier>) {
    let classifier = Arc::new(FakeClassifier::default());

    async fn completions(
        State(classifier): State<Arc<FakeClassifier>>,
    ) -> Json<serde_json::Value> {
        let content = {
            let mut replies = classifier.replies.lock();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        }
        .unwrap_or_else(|| {
            serde_json::json!({
                "intent": "unknown",
                "explanation": "Could you rephrase that?",
                "confidence": 0.1,
            })
            .to_string()
        });

        Json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 50, "completion_tokens": 20},
        }))
    }

    let app = axum::Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(classifier.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}/v1"), classifier)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The assembled world
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TestWorld {
    pub _dir: TempDir,
    pub state: AppState,
    pub engine: Arc<Engine>,
    pub runtime: Arc<FakeRuntime>,
    pub rooms: Arc<RecordingRooms>,
    pub distributor: Arc<RecordingDistributor>,
    pub agent_plane: Arc<FakeAgentPlane>,
    pub classifier: Arc<FakeClassifier>,
}

impl TestWorld {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build a world; the closure tweaks the config before wiring.
    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (plane_url, agent_plane) = spawn_agent_plane().await;
        let (classifier_url, classifier) = spawn_classifier().await;

        let mut config = Config::default();
        config.storage.state_path = dir.path().to_path_buf();
        config.nlp.endpoint = classifier_url;
        config.nlp.rate_limit_per_minute = 0;
        config.nlp.daily_token_budget = 0;
        // Keep failed pipelines fast in tests.
        config.provisioning.poll_interval_secs = 1;
        tweak(&mut config);
        let config = Arc::new(config);

        let runtime = Arc::new(FakeRuntime::default());
        *runtime.control_url.lock() = plane_url;
        let rooms = Arc::new(RecordingRooms::default());
        let distributor = Arc::new(RecordingDistributor::default());

        let approvals = Arc::new(ApprovalStore::new(dir.path()).unwrap());
        let audit = Arc::new(AuditLog::new(dir.path()).unwrap());
        let notifier = Arc::new(NullNotifier);
        let gate = Arc::new(ApprovalGate::new(
            approvals.clone(),
            audit.clone(),
            notifier.clone(),
            config.approvals.clone(),
        ));

        let state = AppState {
            config: config.clone(),
            agents: Arc::new(AgentStore::new(dir.path()).unwrap()),
            versions: Arc::new(
                VersionStore::new(dir.path(), config.storage.retained_versions).unwrap(),
            ),
            approvals,
            audit,
            kv: Arc::new(KvStore::new(dir.path()).unwrap()),
            secrets: Arc::new(SecretStore::new(dir.path()).unwrap()),
            gate,
            runtime: Some(runtime.clone()),
            rooms: rooms.clone(),
            accounts: Some(Arc::new(FakeAccounts)),
            links: Some(Arc::new(FakeLinks)),
            distributor: Some(distributor.clone()),
            notifier,
            guardrail: Arc::new(Guardrail::new()),
            nlp_health: Arc::new(NlpHealthState::new(NlpHealth::Ok)),
            api_token_hash: None,
        };
        let engine = Engine::new(state.clone());

        Self {
            _dir: dir,
            state,
            engine,
            runtime,
            rooms,
            distributor,
            agent_plane,
            classifier,
        }
    }

    pub fn event(&self, sender: &str, body: &str) -> ChatEvent {
        ChatEvent {
            room_id: ROOM.to_owned(),
            sender: sender.to_owned(),
            body: body.to_owned(),
            event_id: None,
        }
    }

    /// Send one chat line and collect the reply.
    pub async fn say(&self, sender: &str, body: &str) -> Option<String> {
        self.engine.handle(&self.event(sender, body)).await
    }

    /// Wait until the agent's provisioning state settles.
    pub async fn wait_for_provisioning(
        &self,
        agent_id: &str,
        wanted: rk_domain::fleet::ProvisioningState,
    ) {
        for _ in 0..200 {
            if let Some(agent) = self.state.agents.get(agent_id) {
                if agent.provisioning == Some(wanted) {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("agent {agent_id} never reached {wanted:?}");
    }
}

/// Pull the 8-hex-char approval ID out of an approval prompt.
pub fn extract_approval_id(reply: &str) -> String {
    let marker = "Approval ID: `";
    let start = reply
        .find(marker)
        .unwrap_or_else(|| panic!("no approval id in: {reply}"))
        + marker.len();
    reply[start..start + 8].to_owned()
}
