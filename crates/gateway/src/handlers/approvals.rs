//! Approval introspection handlers. Decisions themselves are plain-text
//! (`approve <id>` / `deny <id>`) and handled by the gate, not here.

use rk_domain::approval::ApprovalStatus;
use rk_domain::error::{Error, Result};

use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

pub async fn list(
    state: AppState,
    _cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    state.approvals.check_expiry()?;

    let pending = state.approvals.list_pending();
    if pending.is_empty() {
        return Ok(format!("No pending approvals. (trace {trace_id})"));
    }

    let mut out = vec![format!("{} pending approval(s):", pending.len())];
    for a in pending {
        out.push(format!(
            "  • `{}` — {} {} (by {}, expires {})",
            a.id,
            a.action,
            a.target,
            a.requested_by,
            a.expires_at.format("%H:%M:%S"),
        ));
    }
    out.push(format!(
        "Reply `approve <id>` or `deny <id> reason=\"…\"`. trace: {trace_id}"
    ));
    Ok(out.join("\n"))
}

pub async fn show(
    state: AppState,
    cmd: Command,
    _event: ChatEvent,
    trace_id: String,
) -> Result<String> {
    state.approvals.check_expiry()?;

    let id = cmd.target("id")?;
    let a = state
        .approvals
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("approval {id:?}")))?;

    let resolution = if a.status == ApprovalStatus::Pending {
        format!("expires {}", a.expires_at.to_rfc3339())
    } else {
        format!(
            "resolved {} by {}{}",
            a.resolved_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "?".into()),
            a.resolved_by.as_deref().unwrap_or("?"),
            a.resolve_reason
                .as_deref()
                .map(|r| format!(" — {r}"))
                .unwrap_or_default(),
        )
    };

    Ok(format!(
        "Approval `{}`: {} {}\nstatus: {} ({resolution})\nrequested by {} at {}\nparams: {}\ntrace: {trace_id}",
        a.id,
        a.action,
        a.target,
        a.status,
        a.requested_by,
        a.created_at.to_rfc3339(),
        a.params_json,
    ))
}
