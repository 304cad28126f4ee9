//! Audit log reading.

use rk_domain::error::{Error, Result};

use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

const DEFAULT_TAIL: usize = 20;

/// `audit tail [--n N]`
pub async fn tail(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    let n = match cmd.flag("n") {
        None => DEFAULT_TAIL,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| Error::Validation(format!("--n must be a number, got {raw:?}")))?,
    };

    let rows = state.audit.tail(n)?;
    if rows.is_empty() {
        return Ok(format!("Audit log is empty. (trace {trace_id})"));
    }

    let mut out = vec![format!("Last {} audit row(s):", rows.len())];
    for row in rows {
        out.push(format!(
            "  {} [{}] {} by {} → {}{}",
            row.timestamp.format("%m-%d %H:%M:%S"),
            row.trace_id,
            row.action,
            row.actor,
            row.result,
            row.target
                .as_deref()
                .map(|t| format!(" ({t})"))
                .unwrap_or_default(),
        ));
    }
    out.push(format!("trace: {trace_id}"));
    Ok(out.join("\n"))
}
