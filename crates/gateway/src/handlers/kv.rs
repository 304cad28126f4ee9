//! Runtime KV handlers — the allowlisted NLP tuning knobs.

use rk_domain::error::{Error, Result};
use rk_store::kv::ALLOWED_KEYS;

use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

use super::audit_success;

/// `kv set <key> <value>`
pub async fn set(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let (key, value) = match cmd.args.as_slice() {
        [key, value] => (key.clone(), value.clone()),
        _ => {
            return Err(Error::Validation(
                "usage: kv set <key> <value> (single-token value)".into(),
            ))
        }
    };

    state.kv.set(&key, &value)?;
    audit_success(
        &state,
        &trace_id,
        &event.sender,
        "kv.set",
        &key,
        Some(serde_json::json!({ "value": value })),
    )
    .await;
    Ok(format!("⚙️ {key} = {value} (trace {trace_id})"))
}

pub async fn get(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let key = cmd.target("key")?;
    match state.kv.get(key) {
        Some(value) => Ok(format!("{key} = {value} (trace {trace_id})")),
        None => Ok(format!("{key} is not set (trace {trace_id})")),
    }
}

pub async fn list(
    state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let values = state.kv.list();
    let mut out = vec![format!(
        "Tunable keys: {}",
        ALLOWED_KEYS.join(", ")
    )];
    if values.is_empty() {
        out.push("Nothing set — config file defaults apply.".into());
    } else {
        for (key, value) in values {
            out.push(format!("  {key} = {value}"));
        }
    }
    out.push(format!("trace: {trace_id}"));
    Ok(out.join("\n"))
}

pub async fn unset(
    state: AppState,
    cmd: Command,
    event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let key = cmd.target("key")?.to_owned();
    let removed = state.kv.unset(&key)?;
    if !removed {
        return Ok(format!("{key} was not set (trace {trace_id})"));
    }
    audit_success(&state, &trace_id, &event.sender, "kv.unset", &key, None).await;
    Ok(format!("⚙️ {key} unset — config file default applies (trace {trace_id})"))
}
