//! Meta commands: help, version, ping, trace.

use rk_domain::error::Result;

use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

pub async fn help(
    state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    _trace_id: String,
) -> Result<String> {
    let prefix = &state.config.chat.prefix;
    Ok(format!(
        "**Ruriko — fleet control plane**\n\
         \n\
         `{prefix} agents list|show|create|start|stop|respawn|delete|status|cancel|matrix-register|disable`\n\
         `{prefix} config show|versions|diff|set|set-persona|set-instructions|rollback|push`\n\
         `{prefix} secrets list|info|set|rotate|delete|bind|unbind|push`\n\
         `{prefix} kv set|get|list|unset` — runtime NLP knobs\n\
         `{prefix} approvals list|show` · `{prefix} audit tail` · `{prefix} trace <id>`\n\
         `{prefix} help|version|ping`\n\
         \n\
         Destructive actions need a second operator: reply `approve <id>` \
         or `deny <id> reason=\"…\"` to a pending approval.\n\
         Free-form requests work too — I'll ask before doing anything."
    ))
}

pub async fn version(
    _state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    Ok(format!(
        "ruriko {} (trace {trace_id})",
        env!("CARGO_PKG_VERSION")
    ))
}

pub async fn ping(
    _state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    Ok(format!("🏓 pong (trace {trace_id})"))
}

/// Replay every audit row carrying a trace ID.
pub async fn trace(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let wanted = cmd.target("id")?;
    let rows = state.audit.find_by_trace(wanted)?;
    if rows.is_empty() {
        return Ok(format!("No audit rows for trace `{wanted}` (trace {trace_id})"));
    }

    let mut out = vec![format!("Audit trail for trace `{wanted}`:")];
    for row in rows {
        out.push(format!(
            "  {} {} by {} → {}{}{}",
            row.timestamp.format("%Y-%m-%d %H:%M:%S"),
            row.action,
            row.actor,
            row.result,
            row.target
                .as_deref()
                .map(|t| format!(" [{t}]"))
                .unwrap_or_default(),
            row.error_message
                .as_deref()
                .map(|e| format!(" — {e}"))
                .unwrap_or_default(),
        ));
    }
    Ok(out.join("\n"))
}
