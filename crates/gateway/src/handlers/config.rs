//! Agent configuration document handlers.
//!
//! "config" here is the versioned YAML pushed to agents, not the
//! runtime KV (`kv.*`).

use base64::Engine as _;

use rk_domain::doc::AgentConfigDoc;
use rk_domain::error::{Error, Result};
use rk_store::diff;

use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

use super::{audit_success, gate_check, target_agent};

/// Section-aware rendering with a raw-YAML fallback so legacy or
/// malformed documents stay observable.
pub async fn show(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let latest = state.versions.latest(&agent.id).ok_or_else(|| {
        Error::NotFound(format!("no config versions for agent {:?}", agent.id))
    })?;

    let header = format!(
        "Config for `{}` — v{} ({}) by {}",
        agent.id,
        latest.version,
        &latest.hash[..12],
        latest.created_by
    );

    match AgentConfigDoc::from_yaml(&latest.yaml) {
        Ok(doc) => Ok(format!(
            "{header}\n\n**persona** ({} / {}):\n{}\n\n**instructions** ({}):\n{} workflow step(s), {} peer(s)\n\n```yaml\n{}```\ntrace: {trace_id}",
            doc.persona.llm_provider,
            doc.persona.model,
            doc.persona.system_prompt,
            doc.instructions.role,
            doc.instructions.workflow.len(),
            doc.instructions.context.peers.len(),
            latest.yaml,
        )),
        Err(e) => Ok(format!(
            "{header}\n(unparseable as a config document: {e})\n\n```yaml\n{}```\ntrace: {trace_id}",
            latest.yaml,
        )),
    }
}

pub async fn versions(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let versions = state.versions.list(&agent.id);
    if versions.is_empty() {
        return Ok(format!(
            "No config versions for `{}` yet. (trace {trace_id})",
            agent.id
        ));
    }

    let mut out = vec![format!("Config versions for `{}`:", agent.id)];
    for v in versions {
        out.push(format!(
            "  v{} — {} — {} by {}",
            v.version,
            &v.hash[..12],
            v.created_at.format("%Y-%m-%d %H:%M:%S"),
            v.created_by,
        ));
    }
    out.push(format!("trace: {trace_id}"));
    Ok(out.join("\n"))
}

/// `config diff <agent> [--from N] [--to M]` — defaults to the previous
/// version against the latest.
pub async fn diff(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let latest = state.versions.latest(&agent.id).ok_or_else(|| {
        Error::NotFound(format!("no config versions for agent {:?}", agent.id))
    })?;

    let to = parse_version_flag(&cmd, "to")?.unwrap_or(latest.version);
    let from = match parse_version_flag(&cmd, "from")? {
        Some(v) => v,
        None if to > 1 => to - 1,
        None => {
            return Err(Error::Validation(
                "only one version exists; nothing to diff against".into(),
            ))
        }
    };

    let a = state
        .versions
        .get(&agent.id, from)
        .ok_or_else(|| Error::NotFound(format!("config version {from} for {:?}", agent.id)))?;
    let b = state
        .versions
        .get(&agent.id, to)
        .ok_or_else(|| Error::NotFound(format!("config version {to} for {:?}", agent.id)))?;

    let sections = match diff::section_changes(&a.yaml, &b.yaml) {
        Ok(changed) if changed.is_empty() => "no section changes".to_owned(),
        Ok(changed) => format!("changed sections: {}", changed.join(", ")),
        Err(_) => "(section annotation unavailable)".to_owned(),
    };

    let body = diff::diff_lines(&a.yaml, &b.yaml, state.config.storage.max_diff_lines);
    Ok(format!(
        "Diff `{}` v{from} → v{to} — {sections}\n```diff\n{body}\n```\ntrace: {trace_id}",
        agent.id
    ))
}

/// Gated. `config set <agent> --content <base64-yaml>` — values with
/// spaces can't ride the chat surface, hence the encoding.
pub async fn set(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    // Validate the payload is present before parking an approval.
    let content = cmd.require_flag("content")?.to_owned();

    if let Some(prompt) =
        gate_check(&state, "config.set", &agent.id, &cmd, &event, &trace_id).await?
    {
        return Ok(prompt);
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content.as_bytes())
        .map_err(|e| Error::Validation(format!("--content is not valid base64: {e}")))?;
    let yaml = String::from_utf8(bytes)
        .map_err(|_| Error::Validation("--content is not valid UTF-8".into()))?;

    let outcome = state.versions.write(&agent.id, &yaml, &event.sender)?;
    if outcome.unchanged {
        return Ok(format!(
            "Config for `{}` unchanged — hash matches v{}. (trace {trace_id})",
            agent.id, outcome.version.version
        ));
    }

    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "config.set",
        &agent.id,
        Some(serde_json::json!({
            "version": outcome.version.version,
            "hash": &outcome.version.hash[..16],
        })),
    )
    .await;
    Ok(format!(
        "📝 Config for `{}` now v{} ({}). Run `config push {}` to apply. (trace {trace_id})",
        agent.id,
        outcome.version.version,
        &outcome.version.hash[..12],
        agent.id,
    ))
}

/// Gated. `config set-persona <agent> <prompt text…>`
pub async fn set_persona(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    patch_section(
        state,
        cmd,
        event,
        trace_id,
        "config.set-persona",
        |doc, text| {
            doc.persona.system_prompt = text;
            Ok(())
        },
    )
    .await
}

/// Gated. `config set-instructions <agent> <role text…>`
pub async fn set_instructions(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    patch_section(
        state,
        cmd,
        event,
        trace_id,
        "config.set-instructions",
        |doc, text| {
            doc.instructions.role = text;
            Ok(())
        },
    )
    .await
}

async fn patch_section(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
    action: &str,
    apply: impl FnOnce(&mut AgentConfigDoc, String) -> Result<()>,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    // Everything after the agent name is the new text.
    let text = if cmd.flag("name").is_some() {
        cmd.args.join(" ")
    } else {
        cmd.args.get(1..).unwrap_or(&[]).join(" ")
    };
    if text.is_empty() {
        return Err(Error::Validation(format!(
            "usage: {action} <agent> <text…>"
        )));
    }

    if let Some(prompt) = gate_check(&state, action, &agent.id, &cmd, &event, &trace_id).await? {
        return Ok(prompt);
    }

    let outcome = state
        .versions
        .patch_current(&agent.id, &event.sender, |doc| apply(doc, text))?;
    if outcome.unchanged {
        return Ok(format!(
            "Config for `{}` unchanged — same content as v{}. (trace {trace_id})",
            agent.id, outcome.version.version
        ));
    }

    audit_success(
        &state,
        &trace_id,
        &event.sender,
        action,
        &agent.id,
        Some(serde_json::json!({ "version": outcome.version.version })),
    )
    .await;
    Ok(format!(
        "📝 `{}` updated to config v{}. Run `config push {}` to apply. (trace {trace_id})",
        agent.id, outcome.version.version, agent.id,
    ))
}

/// Gated. `config rollback <agent> --to N` — creates a new version
/// copying the target, keeping history linear.
pub async fn rollback(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let to = parse_version_flag(&cmd, "to")?
        .ok_or_else(|| Error::Validation("missing required flag --to <version>".into()))?;

    if let Some(prompt) =
        gate_check(&state, "config.rollback", &agent.id, &cmd, &event, &trace_id).await?
    {
        return Ok(prompt);
    }

    let outcome = state.versions.rollback(&agent.id, to, &event.sender)?;
    if outcome.unchanged {
        return Ok(format!(
            "Config for `{}` unchanged — v{to} has the same hash as the current \
             latest (v{}). (trace {trace_id})",
            agent.id, outcome.version.version
        ));
    }

    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "config.rollback",
        &agent.id,
        Some(serde_json::json!({
            "restored": to,
            "version": outcome.version.version,
        })),
    )
    .await;
    Ok(format!(
        "⏪ `{}` rolled back: v{to} content is now v{}. Run `config push {}` to \
         apply. (trace {trace_id})",
        agent.id, outcome.version.version, agent.id,
    ))
}

/// Push the latest stored version over the control protocol and verify
/// the echoed hash.
pub async fn push(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let agent = target_agent(&state, &cmd)?;
    let latest = state.versions.latest(&agent.id).ok_or_else(|| {
        Error::NotFound(format!("no config versions for agent {:?}", agent.id))
    })?;

    let acp = state.acp(&agent)?;
    rk_acp::with_retry(state.config.provisioning.apply_retries, || {
        acp.apply_config(&latest.yaml, &latest.hash)
    })
    .await?;

    let status = acp.status().await?;
    if let Some(echoed) = &status.config_hash {
        if echoed != &latest.hash {
            return Err(Error::Conflict(format!(
                "agent echoed config hash {} but {} was pushed",
                &echoed[..12.min(echoed.len())],
                &latest.hash[..12]
            )));
        }
    }
    let actual = status.config_hash.clone().unwrap_or_else(|| latest.hash.clone());
    state.agents.update(&agent.id, |a| {
        a.desired_config_hash = Some(latest.hash.clone());
        a.actual_config_hash = Some(actual.clone());
        a.applied_config_version = Some(latest.version);
        a.last_seen = Some(chrono::Utc::now());
    })?;

    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "config.push",
        &agent.id,
        Some(serde_json::json!({
            "version": latest.version,
            "hash": &latest.hash[..16],
        })),
    )
    .await;
    Ok(format!(
        "🚀 Config v{} pushed to `{}` and verified. (trace {trace_id})",
        latest.version, agent.id,
    ))
}

fn parse_version_flag(cmd: &Command, name: &str) -> Result<Option<u64>> {
    match cmd.flag(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| {
            Error::Validation(format!("--{name} must be a version number, got {raw:?}"))
        }),
    }
}
