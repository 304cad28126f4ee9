//! Secret metadata handlers.
//!
//! Secret values never touch the chat surface: `set` and `rotate` hand
//! back a one-time HTTPS link from the external issuer, and
//! distribution to agents goes through the vault.

use rk_domain::error::{Error, Result};

use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

use super::{audit_success, gate_check, unconfigured};

pub async fn list(
    state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let secrets = state.secrets.list();
    if secrets.is_empty() {
        return Ok(format!("No secrets registered. (trace {trace_id})"));
    }
    let mut out = vec![format!("{} secret(s):", secrets.len())];
    for s in secrets {
        out.push(format!(
            "  • {} — bound to {} agent(s){}",
            s.name,
            s.bound_agents.len(),
            s.rotated_at
                .map(|t| format!(", rotated {}", t.format("%Y-%m-%d")))
                .unwrap_or_default(),
        ));
    }
    out.push(format!("trace: {trace_id}"));
    Ok(out.join("\n"))
}

pub async fn info(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let name = cmd.target("name")?;
    let s = state
        .secrets
        .get(name)
        .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;
    Ok(format!(
        "**{}**\ncreated: {}\nrotated: {}\nbound agents: {}\ntrace: {trace_id}",
        s.name,
        s.created_at.to_rfc3339(),
        s.rotated_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into()),
        if s.bound_agents.is_empty() {
            "none".into()
        } else {
            s.bound_agents.join(", ")
        },
    ))
}

/// Register a secret and mint the one-time entry link.
pub async fn set(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let name = cmd.target("name")?.to_owned();
    let links = state
        .links
        .as_ref()
        .ok_or_else(|| unconfigured("secret link issuer", "links_url"))?;

    if state.secrets.get(&name).is_some() {
        return Err(Error::Conflict(format!(
            "secret {name:?} already exists — use `secrets rotate {name}` to replace its value"
        )));
    }

    state.secrets.create(&name)?;
    let url = links.issue(&name, false).await?;

    audit_success(&state, &trace_id, &event.sender, "secrets.set", &name, None).await;
    Ok(format!(
        "🔑 Secret `{name}` registered. Enter its value here (one-time link, \
         expires soon):\n{url}\ntrace: {trace_id}"
    ))
}

/// Gated. Mint a fresh one-time link for an existing secret.
pub async fn rotate(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let name = cmd.target("name")?.to_owned();
    state
        .secrets
        .get(&name)
        .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;

    if let Some(prompt) =
        gate_check(&state, "secrets.rotate", &name, &cmd, &event, &trace_id).await?
    {
        return Ok(prompt);
    }

    let links = state
        .links
        .as_ref()
        .ok_or_else(|| unconfigured("secret link issuer", "links_url"))?;
    state.secrets.rotate(&name)?;
    let url = links.issue(&name, true).await?;

    audit_success(&state, &trace_id, &event.sender, "secrets.rotate", &name, None).await;
    Ok(format!(
        "♻️ Rotating `{name}`. Enter the new value here (one-time link):\n{url}\ntrace: {trace_id}"
    ))
}

/// Gated.
pub async fn delete(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let name = cmd.target("name")?.to_owned();
    state
        .secrets
        .get(&name)
        .ok_or_else(|| Error::NotFound(format!("secret {name:?}")))?;

    if let Some(prompt) =
        gate_check(&state, "secrets.delete", &name, &cmd, &event, &trace_id).await?
    {
        return Ok(prompt);
    }

    let removed = state.secrets.delete(&name)?;
    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "secrets.delete",
        &name,
        Some(serde_json::json!({ "was_bound_to": removed.bound_agents })),
    )
    .await;
    Ok(format!("🗑️ Secret `{name}` deleted. (trace {trace_id})"))
}

/// `secrets bind <name> --agent <id>`
pub async fn bind(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let name = cmd.target("name")?.to_owned();
    let agent_id = cmd.require_flag("agent")?.to_owned();
    state.agents.require(&agent_id)?;

    let record = state.secrets.bind(&name, &agent_id)?;
    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "secrets.bind",
        &name,
        Some(serde_json::json!({ "agent": agent_id })),
    )
    .await;
    Ok(format!(
        "🔗 `{name}` bound to `{agent_id}` (now {} binding(s)). Use \
         `secrets push {agent_id}` to distribute. (trace {trace_id})",
        record.bound_agents.len(),
    ))
}

pub async fn unbind(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let name = cmd.target("name")?.to_owned();
    let agent_id = cmd.require_flag("agent")?.to_owned();

    state.secrets.unbind(&name, &agent_id)?;
    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "secrets.unbind",
        &name,
        Some(serde_json::json!({ "agent": agent_id })),
    )
    .await;
    Ok(format!(
        "⛓️ `{name}` unbound from `{agent_id}`. (trace {trace_id})"
    ))
}

/// `secrets push <agent>` — distribute every bound secret.
pub async fn push(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = super::target_agent(&state, &cmd)?;
    let distributor = state
        .distributor
        .as_ref()
        .ok_or_else(|| unconfigured("secret distributor", "vault_url"))?;

    let bound = state.secrets.bound_to(&agent.id);
    if bound.is_empty() {
        return Ok(format!(
            "No secrets bound to `{}`. (trace {trace_id})",
            agent.id
        ));
    }

    let mut pushed = 0usize;
    let mut failures = Vec::new();
    for secret in &bound {
        match distributor.push(&agent.id, &secret.name).await {
            Ok(()) => pushed += 1,
            Err(e) => failures.push(format!("{}: {e}", secret.name)),
        }
    }

    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "secrets.push",
        &agent.id,
        Some(serde_json::json!({ "pushed": pushed, "failed": failures.len() })),
    )
    .await;

    if failures.is_empty() {
        Ok(format!(
            "📦 {pushed} secret(s) pushed to `{}`. (trace {trace_id})",
            agent.id
        ))
    } else {
        Ok(format!(
            "📦 {pushed} pushed to `{}`, {} failed:\n  {}\ntrace: {trace_id}",
            agent.id,
            failures.len(),
            failures.join("\n  "),
        ))
    }
}
