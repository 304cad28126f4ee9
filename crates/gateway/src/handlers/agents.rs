//! Agent lifecycle handlers.

use rk_domain::error::{Error, Result};
use rk_domain::fleet::{new_acp_token, sanitize_agent_id, Agent, AgentStatus, ProvisioningState};

use crate::commands::{ChatEvent, Command};
use crate::pipeline;
use crate::ports::SpawnSpec;
use crate::state::AppState;
use crate::templates;

use super::{audit_success, gate_check, target_agent, unconfigured};

pub async fn list(
    state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agents = state.agents.list();
    if agents.is_empty() {
        return Ok(format!("No agents yet. (trace {trace_id})"));
    }

    let mut out = vec![format!("{} agent(s):", agents.len())];
    for a in agents {
        out.push(format!(
            "  • {} — {}{}{}",
            a.id,
            a.status,
            a.provisioning
                .map(|p| format!(" / {p}"))
                .unwrap_or_default(),
            a.applied_config_version
                .map(|v| format!(" (config v{v})"))
                .unwrap_or_default(),
        ));
    }
    out.push(format!("trace: {trace_id}"));
    Ok(out.join("\n"))
}

pub async fn show(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let a = target_agent(&state, &cmd)?;
    Ok(format!(
        "**{}** ({})\n\
         status: {} / provisioning: {}\n\
         template: {} · image: {}\n\
         container: {} · control: {}\n\
         mxid: {}\n\
         config: desired {} · actual {} · applied v{}\n\
         last seen: {} · created: {}\n\
         trace: {trace_id}",
        a.id,
        a.display_name,
        a.status,
        a.provisioning
            .map(|p| p.to_string())
            .unwrap_or_else(|| "—".into()),
        a.template,
        a.image.as_deref().unwrap_or("—"),
        a.container_id.as_deref().unwrap_or("—"),
        a.control_url.as_deref().unwrap_or("—"),
        a.mxid.as_deref().unwrap_or("—"),
        a.desired_config_hash
            .as_deref()
            .map(short_hash)
            .unwrap_or("—"),
        a.actual_config_hash
            .as_deref()
            .map(short_hash)
            .unwrap_or("—"),
        a.applied_config_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "—".into()),
        a.last_seen
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into()),
        a.created_at.to_rfc3339(),
    ))
}

/// `agents create --name <id> --template <t> [--image <img>]`
///
/// Inserts the agent row, optionally provisions a homeserver account,
/// spawns the container, and hands off to the detached provisioning
/// pipeline. The reply lands long before the agent is healthy.
pub async fn create(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let raw_name = cmd
        .flag("name")
        .or_else(|| cmd.args.first().map(String::as_str))
        .ok_or_else(|| Error::Validation("missing required flag --name".into()))?;
    let name = sanitize_agent_id(raw_name).ok_or_else(|| {
        Error::Validation(format!("{raw_name:?} cannot be made into a valid agent name"))
    })?;

    let template = cmd.flag("template").unwrap_or("default").to_owned();
    if !templates::is_known(&template) {
        return Err(Error::Validation(format!(
            "unknown template {template:?}; known templates: {}",
            templates::KNOWN_TEMPLATES.join(", ")
        )));
    }
    let image = cmd.flag("image").map(str::to_owned);
    let display_name = cmd.flag("display-name").unwrap_or(&name).to_owned();

    let runtime = state.require_runtime()?;

    // Reserve the ID first: a duplicate create must not spawn anything.
    let mut agent = Agent::new(&name, &display_name, &template, image.clone());
    let acp_token = new_acp_token();
    agent.acp_token = Some(acp_token.clone());
    state.agents.insert(agent)?;

    // Optional homeserver account.
    if let Some(accounts) = &state.accounts {
        match accounts.provision(&name).await {
            Ok(account) => {
                state.agents.update(&name, |a| a.mxid = Some(account.mxid.clone()))?;
            }
            Err(e) => {
                tracing::warn!(agent_id = %name, error = %e, "account provisioning failed, continuing");
            }
        }
    }

    // Spawn the container and persist the handle.
    let spec = SpawnSpec {
        agent_id: name.clone(),
        template: template.clone(),
        image: image.clone(),
        acp_token,
    };
    let handle = match runtime.spawn(&spec).await {
        Ok(handle) => handle,
        Err(e) => {
            state.agents.update(&name, |a| {
                a.status = AgentStatus::Error;
                a.provisioning = Some(ProvisioningState::Error);
            })?;
            return Err(e);
        }
    };
    state.agents.update(&name, |a| {
        a.container_id = Some(handle.container_id.clone());
        a.control_url = Some(handle.control_url.clone());
    })?;

    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "agents.create",
        &name,
        Some(serde_json::json!({ "template": template, "image": image })),
    )
    .await;

    // Detached: the chat event's lifetime must not bound provisioning.
    pipeline::spawn(
        state.clone(),
        name.clone(),
        event.sender.clone(),
        event.room_id.clone(),
        trace_id.clone(),
    );

    let mut reply = format!(
        "⏳ Creating agent `{name}` from template `{template}` — provisioning \
         continues in the background.\ntrace: {trace_id}"
    );
    if name != raw_name {
        reply = format!("(using sanitised name `{name}` for {raw_name:?})\n{reply}");
    }
    Ok(reply)
}

pub async fn start(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let container = require_container(&agent)?;
    state.require_runtime()?.start(&container).await?;
    state
        .agents
        .update(&agent.id, |a| a.status = AgentStatus::Running)?;
    audit_success(&state, &trace_id, &event.sender, "agents.start", &agent.id, None).await;
    Ok(format!("▶️ {} started (trace {trace_id})", agent.id))
}

pub async fn stop(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let container = require_container(&agent)?;
    state.require_runtime()?.stop(&container).await?;
    state
        .agents
        .update(&agent.id, |a| a.status = AgentStatus::Stopped)?;
    audit_success(&state, &trace_id, &event.sender, "agents.stop", &agent.id, None).await;
    Ok(format!("⏹️ {} stopped (trace {trace_id})", agent.id))
}

pub async fn respawn(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let container = require_container(&agent)?;
    state.require_runtime()?.restart(&container).await?;
    state
        .agents
        .update(&agent.id, |a| a.status = AgentStatus::Running)?;
    audit_success(&state, &trace_id, &event.sender, "agents.respawn", &agent.id, None).await;
    Ok(format!("🔄 {} respawned (trace {trace_id})", agent.id))
}

/// Gated. Tears down the container, the row, stored config versions,
/// and secret bindings.
pub async fn delete(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;

    if let Some(prompt) =
        gate_check(&state, "agents.delete", &agent.id, &cmd, &event, &trace_id).await?
    {
        return Ok(prompt);
    }

    // Container teardown is best-effort: a half-dead container must not
    // leave the row undeletable.
    if let (Some(container), Some(runtime)) = (&agent.container_id, &state.runtime) {
        if let Err(e) = runtime.stop(container).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "stop before delete failed");
        }
        if let Err(e) = runtime.remove(container).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "container remove failed");
        }
    }

    state.agents.remove(&agent.id)?;
    state.versions.purge(&agent.id)?;
    for secret in state.secrets.bound_to(&agent.id) {
        if let Err(e) = state.secrets.unbind(&secret.name, &agent.id) {
            tracing::warn!(secret = %secret.name, error = %e, "unbind during delete failed");
        }
    }

    audit_success(&state, &trace_id, &event.sender, "agents.delete", &agent.id, None).await;
    Ok(format!("🗑️ Agent `{}` deleted. (trace {trace_id})", agent.id))
}

/// Live status: the stored row, the runtime's view, and the agent's own
/// control-plane report (best effort).
pub async fn status(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;

    let runtime_state = match (&agent.container_id, &state.runtime) {
        (Some(container), Some(runtime)) => match runtime.status(container).await {
            Ok(s) => format!("{s:?}").to_lowercase(),
            Err(e) => format!("unreachable ({e})"),
        },
        _ => "no container".into(),
    };

    let acp_line = match state.acp(&agent) {
        Ok(acp) => match acp.status().await {
            Ok(s) => {
                let hash = s
                    .config_hash
                    .as_deref()
                    .map(short_hash)
                    .unwrap_or("not reported");
                let drift = match (&s.config_hash, &agent.desired_config_hash) {
                    (Some(actual), Some(desired)) if actual != desired => " ⚠️ drift",
                    _ => "",
                };
                format!(
                    "config {hash}{drift} · gateways: {}",
                    if s.gateways.is_empty() {
                        "none".into()
                    } else {
                        s.gateways.join(", ")
                    }
                )
            }
            Err(e) => format!("unreachable ({e})"),
        },
        Err(_) => "not provisioned".into(),
    };

    Ok(format!(
        "**{}**: {} / {}\ncontainer: {runtime_state}\ncontrol plane: {acp_line}\ntrace: {trace_id}",
        agent.id,
        agent.status,
        agent
            .provisioning
            .map(|p| p.to_string())
            .unwrap_or_else(|| "—".into()),
    ))
}

/// Best-effort cancellation of the agent's in-flight work.
pub async fn cancel(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    state.acp(&agent)?.cancel().await?;
    audit_success(&state, &trace_id, &event.sender, "agents.cancel", &agent.id, None).await;
    Ok(format!("🛑 Cancellation sent to {} (trace {trace_id})", agent.id))
}

pub async fn matrix_register(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    if let Some(existing) = &agent.mxid {
        return Err(Error::Conflict(format!(
            "agent {} already has account {existing}",
            agent.id
        )));
    }
    let accounts = state
        .accounts
        .as_ref()
        .ok_or_else(|| unconfigured("account provisioner", "accounts_url"))?;

    let account = accounts.provision(&agent.id).await?;
    state
        .agents
        .update(&agent.id, |a| a.mxid = Some(account.mxid.clone()))?;
    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "agents.matrix-register",
        &agent.id,
        Some(serde_json::json!({ "mxid": account.mxid })),
    )
    .await;
    Ok(format!(
        "🪪 {} registered as {} (trace {trace_id})",
        agent.id, account.mxid
    ))
}

pub async fn disable(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    if let (Some(container), Some(runtime)) = (&agent.container_id, &state.runtime) {
        if let Err(e) = runtime.stop(container).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "stop during disable failed");
        }
    }
    state
        .agents
        .update(&agent.id, |a| a.status = AgentStatus::Disabled)?;
    audit_success(&state, &trace_id, &event.sender, "agents.disable", &agent.id, None).await;
    Ok(format!("⏸️ {} disabled (trace {trace_id})", agent.id))
}

fn require_container(agent: &Agent) -> Result<String> {
    agent
        .container_id
        .clone()
        .ok_or_else(|| Error::Validation(format!("agent {:?} has no container", agent.id)))
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
