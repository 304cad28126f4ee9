//! The provisioning pipeline.
//!
//! Drives a freshly spawned agent to `healthy` through five strictly
//! sequential steps, then pushes bound secrets best-effort. Runs on a
//! detached task: the chat event that triggered the create is answered
//! long before the pipeline finishes, and cancelling it must not abort
//! provisioning. The trace ID is carried through so audit rows,
//! breadcrumbs, and the final reply correlate.

use std::time::Duration;

use tokio::time::Instant;

use rk_domain::audit::{AuditEntry, AuditResult};
use rk_domain::doc::AgentConfigDoc;
use rk_domain::error::{Error, Result};
use rk_domain::fleet::{Agent, AgentStatus, ProvisioningState};
use rk_domain::trace::TraceEvent;

use crate::ports::ContainerState;
use crate::state::AppState;
use crate::templates::{self, TemplateParams};

/// Per-call timeout while polling inside a step deadline.
const POLL_CALL_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-attempt timeout for the config push.
const APPLY_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Launch the pipeline for an agent on a detached task.
///
/// `operator` is the MXID that issued the create (audit attribution)
/// and `room_id` is where breadcrumbs go.
pub fn spawn(
    state: AppState,
    agent_id: String,
    operator: String,
    room_id: String,
    trace_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(state, agent_id, operator, room_id, trace_id).await;
    })
}

async fn run(state: AppState, agent_id: String, operator: String, room_id: String, trace_id: String) {
    let outcome = drive(&state, &agent_id, &operator, &room_id, &trace_id).await;
    match outcome {
        Ok((version, hash)) => {
            TraceEvent::ProvisionFinished {
                trace_id: trace_id.clone(),
                agent_id: agent_id.clone(),
                ok: true,
                failed_step: None,
            }
            .emit();
            state
                .record_audit(
                    AuditEntry::new(&trace_id, &operator, "agents.provision", AuditResult::Success)
                        .with_target(&agent_id)
                        .with_payload(serde_json::json!({
                            "configVersion": version,
                            "configHash": hash16(&hash),
                        })),
                )
                .await;
            breadcrumb(
                &state,
                &room_id,
                &format!("✅ {agent_id} is healthy (config v{version}, trace {trace_id})"),
            )
            .await;
        }
        Err((step, e)) => {
            TraceEvent::ProvisionFinished {
                trace_id: trace_id.clone(),
                agent_id: agent_id.clone(),
                ok: false,
                failed_step: Some(step),
            }
            .emit();
            if let Err(update_err) = state.agents.update(&agent_id, |a| {
                a.provisioning = Some(ProvisioningState::Error);
                a.status = AgentStatus::Error;
            }) {
                tracing::error!(agent_id, error = %update_err, "failed to mark agent errored");
            }
            state
                .record_audit(
                    AuditEntry::new(&trace_id, &operator, "agents.provision", AuditResult::Error)
                        .with_target(&agent_id)
                        .with_payload(serde_json::json!({ "step": step }))
                        .with_error(&e.to_string()),
                )
                .await;
            breadcrumb(
                &state,
                &room_id,
                &format!("⚠️ {agent_id}: provisioning failed at step {step}: {e} (trace {trace_id})"),
            )
            .await;
        }
    }
}

/// The five fatal steps. Returns `(config_version, config_hash)` on
/// success; failures carry the step number for the audit payload.
async fn drive(
    state: &AppState,
    agent_id: &str,
    operator: &str,
    room_id: &str,
    trace_id: &str,
) -> std::result::Result<(u64, String), (u8, Error)> {
    let cfg = state.config.provisioning.clone();
    let poll = Duration::from_secs(cfg.poll_interval_secs);

    // ── Step 1: container reaches `running` ──────────────────────────
    step_state(state, agent_id, trace_id, 1, ProvisioningState::Creating).map_err(|e| (1, e))?;
    breadcrumb(state, room_id, &format!("⏳ {agent_id}: waiting for container to start…")).await;

    let agent = state.agents.require(agent_id).map_err(|e| (1, e))?;
    let container_id = agent
        .container_id
        .clone()
        .ok_or_else(|| (1, Error::Other("agent has no container handle".into())))?;
    let runtime = state.require_runtime().map_err(|e| (1, e))?;

    let deadline = Instant::now() + Duration::from_secs(cfg.running_deadline_secs);
    loop {
        match runtime.status(&container_id).await {
            Ok(ContainerState::Running) => break,
            Ok(ContainerState::Exited) | Ok(ContainerState::Removing) => {
                return Err((1, Error::Other("container exited during startup".into())));
            }
            Ok(_) => {}
            // Transient driver hiccups ride the deadline out.
            Err(e) => tracing::debug!(agent_id, error = %e, "runtime status poll failed"),
        }
        if Instant::now() >= deadline {
            return Err((
                1,
                Error::Other(format!(
                    "container never reached running within {}s",
                    cfg.running_deadline_secs
                )),
            ));
        }
        tokio::time::sleep(poll).await;
    }
    breadcrumb(state, room_id, &format!("✅ {agent_id}: container running")).await;

    // ── Step 2: agent control plane answers Health ───────────────────
    step_state(state, agent_id, trace_id, 2, ProvisioningState::Configuring)
        .map_err(|e| (2, e))?;
    breadcrumb(state, room_id, &format!("⏳ {agent_id}: waiting for control plane…")).await;

    let agent = state.agents.require(agent_id).map_err(|e| (2, e))?;
    let acp = state
        .acp_with_timeout(&agent, POLL_CALL_TIMEOUT)
        .map_err(|e| (2, e))?;

    let deadline = Instant::now() + Duration::from_secs(cfg.health_deadline_secs);
    loop {
        match acp.health().await {
            Ok(_) => break,
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err((2, e));
                }
                tokio::time::sleep(poll).await;
            }
        }
    }
    breadcrumb(state, room_id, &format!("✅ {agent_id}: control plane healthy")).await;

    // ── Step 3: render + store versioned config ──────────────────────
    let doc = render_config(state, &agent, operator).map_err(|e| (3, e))?;
    let outcome = state
        .versions
        .write_doc(agent_id, &doc, operator)
        .map_err(|e| (3, e))?;
    let version = outcome.version.version;
    let yaml = outcome.version.yaml.clone();
    let hash = outcome.version.hash.clone();
    TraceEvent::ProvisionStep {
        trace_id: trace_id.to_owned(),
        agent_id: agent_id.to_owned(),
        step: 3,
        state: ProvisioningState::Configuring.to_string(),
    }
    .emit();

    // ── Step 4: push the config, bounded retry ───────────────────────
    breadcrumb(state, room_id, &format!("⏳ {agent_id}: pushing config v{version}…")).await;
    let push_acp = state
        .acp_with_timeout(&agent, APPLY_CALL_TIMEOUT)
        .map_err(|e| (4, e))?;
    rk_acp::with_retry(cfg.apply_retries, || push_acp.apply_config(&yaml, &hash))
        .await
        .map_err(|e| (4, e))?;
    state
        .agents
        .update(agent_id, |a| {
            a.applied_config_version = Some(version);
            a.desired_config_hash = Some(hash.clone());
        })
        .map_err(|e| (4, e))?;

    // ── Step 5: verify the echoed hash ───────────────────────────────
    let verify_acp = state
        .acp_with_timeout(&agent, Duration::from_secs(cfg.status_deadline_secs))
        .map_err(|e| (5, e))?;
    let status = verify_acp.status().await.map_err(|e| (5, e))?;
    if let Some(echoed) = &status.config_hash {
        if echoed != &hash {
            return Err((
                5,
                Error::Conflict(format!(
                    "agent reports config hash {} but {} was pushed",
                    hash16(echoed),
                    hash16(&hash)
                )),
            ));
        }
    }
    // Older agents omit the hash; fall back to what we pushed.
    let actual = status.config_hash.clone().unwrap_or_else(|| hash.clone());
    state
        .agents
        .update(agent_id, |a| {
            a.actual_config_hash = Some(actual.clone());
            a.last_seen = Some(chrono::Utc::now());
            a.provisioning = Some(ProvisioningState::Healthy);
            a.status = AgentStatus::Running;
        })
        .map_err(|e| (5, e))?;

    // ── Step 6: push bound secrets (non-fatal) ───────────────────────
    push_secrets(state, agent_id, room_id).await;

    Ok((version, hash))
}

/// Render the agent's template and inject the mesh topology.
fn render_config(state: &AppState, agent: &Agent, operator: &str) -> Result<AgentConfigDoc> {
    let mut doc = templates::render(
        &agent.template,
        &TemplateParams {
            agent_name: &agent.id,
            display_name: &agent.display_name,
            operator_mxid: operator,
        },
    )?;
    let injected = templates::inject_mesh_topology(&mut doc, &state.versions);
    if injected > 0 {
        tracing::info!(agent_id = %agent.id, injected, "mesh topology injected");
    }
    Ok(doc)
}

/// Best-effort secret distribution once the agent is healthy.
async fn push_secrets(state: &AppState, agent_id: &str, room_id: &str) {
    let Some(distributor) = &state.distributor else {
        return;
    };
    for secret in state.secrets.bound_to(agent_id) {
        if let Err(e) = distributor.push(agent_id, &secret.name).await {
            tracing::warn!(agent_id, secret = %secret.name, error = %e, "secret push failed");
            breadcrumb(
                state,
                room_id,
                &format!("⚠️ {agent_id}: secret push failed for {}: {e}", secret.name),
            )
            .await;
        }
    }
}

fn step_state(
    state: &AppState,
    agent_id: &str,
    trace_id: &str,
    step: u8,
    provisioning: ProvisioningState,
) -> Result<()> {
    state.agents.update(agent_id, |a| {
        a.provisioning = Some(provisioning);
    })?;
    TraceEvent::ProvisionStep {
        trace_id: trace_id.to_owned(),
        agent_id: agent_id.to_owned(),
        step,
        state: provisioning.to_string(),
    }
    .emit();
    Ok(())
}

/// Post a progress notice; failures are logged and ignored.
async fn breadcrumb(state: &AppState, room_id: &str, message: &str) {
    if let Err(e) = state.rooms.send_notice(room_id, message).await {
        tracing::debug!(room_id, error = %e, "breadcrumb send failed");
    }
}

fn hash16(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}
