//! The four-eyes approval gate.
//!
//! Two-phase commit on destructive intents: the first operator's command
//! is parked as a durable pending approval; a second operator's plain
//! `approve <id>` rebuilds the original command and re-dispatches it
//! with the internal markers set, attributed to the original requestor.
//!
//! The gate is constructed before the router and receives the dispatch
//! closure afterwards (`set_dispatch`), which breaks the router ↔
//! handlers ↔ gate cycle without a singleton.

use std::sync::{Arc, OnceLock};

use chrono::{Duration, Utc};
use serde::Deserialize;

use rk_domain::approval::{Approval, ApprovalStatus};
use rk_domain::audit::{AuditEntry, AuditResult};
use rk_domain::config::ApprovalsConfig;
use rk_domain::error::{Error, Result};
use rk_domain::trace::{new_trace_id, TraceEvent};
use rk_store::{ApprovalStore, AuditLog};

use crate::commands::router::{HandlerFuture, Router};
use crate::commands::{ChatEvent, Command};
use crate::ports::AuditNotifier;

/// Closure invoking `Router::dispatch`, injected post-construction.
pub type DispatchFn = Arc<dyn Fn(String, Command, ChatEvent) -> HandlerFuture + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq)]
struct Decision {
    approve: bool,
    id: String,
    reason: Option<String>,
}

/// Parse `approve <id> [reason]` / `deny <id> reason="…"`.
///
/// Anything else fails with the `NotADecision` sentinel so the engine
/// can route the line onward to the NL pipeline.
fn parse_decision(body: &str) -> Result<Decision> {
    let trimmed = body.trim();
    let mut tokens = trimmed.split_whitespace();

    let approve = match tokens.next().map(str::to_lowercase).as_deref() {
        Some("approve") => true,
        Some("deny") => false,
        _ => return Err(Error::NotADecision),
    };

    // Approval IDs are 8 hex chars; `approve the plan` and friends
    // belong to the NL pipeline.
    let id = match tokens.next() {
        Some(tok) if tok.len() == 8 && tok.chars().all(|c| c.is_ascii_hexdigit()) => {
            tok.to_owned()
        }
        _ => return Err(Error::NotADecision),
    };

    let remainder = trimmed
        .splitn(3, char::is_whitespace)
        .nth(2)
        .unwrap_or("")
        .trim();

    let reason = if let Some(quoted) = remainder
        .strip_prefix("reason=\"")
        .and_then(|r| r.strip_suffix('"'))
    {
        Some(quoted.to_owned())
    } else if remainder.is_empty() {
        None
    } else {
        Some(remainder.to_owned())
    };

    Ok(Decision {
        approve,
        id,
        reason,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serialised command parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize, serde::Serialize)]
struct CommandParams {
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    flags: std::collections::HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ApprovalGate {
    store: Arc<ApprovalStore>,
    audit: Arc<AuditLog>,
    notifier: Arc<dyn AuditNotifier>,
    config: ApprovalsConfig,
    dispatch: OnceLock<DispatchFn>,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<ApprovalStore>,
        audit: Arc<AuditLog>,
        notifier: Arc<dyn AuditNotifier>,
        config: ApprovalsConfig,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            config,
            dispatch: OnceLock::new(),
        }
    }

    /// Wire the router's dispatch in after both sides exist.
    pub fn set_dispatch(&self, router: Arc<Router>) {
        let dispatch: DispatchFn = Arc::new(move |action, cmd, event| {
            let router = router.clone();
            Box::pin(async move { router.dispatch(&action, cmd, event).await })
        });
        if self.dispatch.set(dispatch).is_err() {
            tracing::warn!("approval dispatch wired twice, keeping the first");
        }
    }

    /// Whether this action key requires approval.
    pub fn is_gated(&self, action: &str) -> bool {
        self.config.is_gated(action)
    }

    /// Park a gated command as a pending approval.
    ///
    /// Returns `None` when the command may proceed (action ungated, or
    /// this is an approved re-dispatch carrying `_approved=true`);
    /// otherwise the operator-facing approval prompt.
    pub async fn request_if_needed(
        &self,
        action: &str,
        target: &str,
        cmd: &Command,
        event: &ChatEvent,
        trace_id: &str,
    ) -> Result<Option<String>> {
        if cmd.flag("_approved") == Some("true") {
            return Ok(None);
        }
        if !self.config.is_gated(action) {
            return Ok(None);
        }

        let params = CommandParams {
            args: cmd.args.clone(),
            flags: cmd.flags.clone(),
        };
        let params_json = serde_json::to_string(&params).map_err(Error::Json)?;

        let approval = Approval::new(
            action,
            target,
            params_json,
            &event.sender,
            Duration::minutes(self.config.ttl_minutes as i64),
        );
        let approval_id = approval.id.clone();
        self.store.insert(approval)?;

        TraceEvent::ApprovalRequested {
            trace_id: trace_id.to_owned(),
            approval_id: approval_id.clone(),
            action: action.to_owned(),
            target: target.to_owned(),
            requested_by: event.sender.clone(),
        }
        .emit();

        self.record(
            AuditEntry::new(
                trace_id,
                &event.sender,
                &format!("{action}.approval_requested"),
                AuditResult::Pending,
            )
            .with_target(target)
            .with_payload(serde_json::json!({ "approval_id": approval_id })),
        )
        .await;

        Ok(Some(format!(
            "🔐 `{action} {target}` is a gated action and needs a second operator.\n\
             Approval ID: `{approval_id}` (requested by {requestor}, expires in {ttl}m)\n\
             Reply `approve {approval_id}` or `deny {approval_id} reason=\"…\"`.\n\
             trace: {trace_id}",
            requestor = event.sender,
            ttl = self.config.ttl_minutes,
        )))
    }

    /// Handle a plain-text decision line.
    ///
    /// `Err(NotADecision)` means "not ours, keep routing". Real
    /// persistence failures propagate and abort the transition; every
    /// other outcome is an operator-facing reply.
    pub async fn decide(&self, event: &ChatEvent) -> Result<String> {
        let decision = parse_decision(&event.body)?;

        self.store.check_expiry()?;

        let Some(approval) = self.store.get(&decision.id) else {
            return Ok(format!("⚠️ No approval with ID `{}`.", decision.id));
        };

        if approval.status != ApprovalStatus::Pending {
            return Ok(format!(
                "Approval `{}` is already {} — no change made.",
                approval.id, approval.status
            ));
        }

        // Expired between the sweep and now, or clock-skewed rows.
        if approval.is_expired(Utc::now()) {
            let cancelled = self.store.resolve(
                &approval.id,
                ApprovalStatus::Cancelled,
                &event.sender,
                Some("expired before decision".into()),
            )?;
            return Ok(format!(
                "⌛ Approval `{}` expired before a decision was made ({}).",
                cancelled.id, cancelled.action
            ));
        }

        if decision.approve {
            self.approve(approval, event).await
        } else {
            self.deny(approval, decision.reason, event).await
        }
    }

    async fn deny(
        &self,
        approval: Approval,
        reason: Option<String>,
        event: &ChatEvent,
    ) -> Result<String> {
        let reason = reason.unwrap_or_else(|| "no reason given".into());
        let resolved = match self.store.resolve(
            &approval.id,
            ApprovalStatus::Denied,
            &event.sender,
            Some(reason.clone()),
        ) {
            Ok(resolved) => resolved,
            Err(Error::Conflict(msg)) => return Ok(format!("{msg} — no change made.")),
            Err(e) => return Err(e),
        };

        self.record(
            AuditEntry::new(
                &new_trace_id(),
                &event.sender,
                &format!("{}.approval_denied", resolved.action),
                AuditResult::Denied,
            )
            .with_target(&resolved.target)
            .with_payload(serde_json::json!({
                "approval_id": resolved.id,
                "reason": reason,
            })),
        )
        .await;

        Ok(format!(
            "🚫 Approval `{}` denied by {}: {reason}",
            resolved.id, event.sender
        ))
    }

    async fn approve(&self, approval: Approval, event: &ChatEvent) -> Result<String> {
        // Four-eyes: the requestor cannot approve their own request.
        if event.sender == approval.requested_by {
            self.record(
                AuditEntry::new(
                    &new_trace_id(),
                    &event.sender,
                    &format!("{}.approve", approval.action),
                    AuditResult::Error,
                )
                .with_target(&approval.target)
                .with_error("self-approval refused"),
            )
            .await;
            return Ok(format!(
                "⛔ Self-approval is not allowed. `{}` must be approved by a \
                 different operator than {}.",
                approval.id, approval.requested_by
            ));
        }

        let resolved = match self.store.resolve(
            &approval.id,
            ApprovalStatus::Approved,
            &event.sender,
            None,
        ) {
            Ok(resolved) => resolved,
            Err(Error::Conflict(msg)) => return Ok(format!("{msg} — no change made.")),
            Err(e) => return Err(e),
        };

        // Rebuild the original command exactly as typed, plus markers.
        let params: CommandParams =
            serde_json::from_str(&resolved.params_json).unwrap_or_default();
        let (name, subcommand) = match resolved.action.split_once('.') {
            Some((name, sub)) => (name.to_owned(), Some(sub.to_owned())),
            None => (resolved.action.clone(), None),
        };

        let trace_id = new_trace_id();
        let mut flags = params.flags;
        flags.insert("_approved".into(), "true".into());
        flags.insert("_approval_id".into(), resolved.id.clone());
        flags.insert("_trace_id".into(), trace_id.clone());

        let cmd = Command {
            name,
            subcommand,
            args: params.args,
            flags,
            raw: format!("{} (approved re-dispatch)", resolved.action),
        };

        // Attribute the operation to the original requestor.
        let redispatch_event = event.with_sender(&resolved.requested_by);

        let Some(dispatch) = self.dispatch.get() else {
            return Err(Error::Other("approval dispatch not wired".into()));
        };

        let outcome = dispatch(resolved.action.clone(), cmd, redispatch_event).await;
        match outcome {
            Ok(reply) => Ok(format!(
                "✅ Approval `{}` granted by {} — executing for {}.\n{reply}",
                resolved.id, event.sender, resolved.requested_by
            )),
            Err(e) => Ok(format!(
                "✅ Approval `{}` granted, but execution failed: {e}",
                resolved.id
            )),
        }
    }

    /// Best-effort audit write: the decision itself has already
    /// committed, so an audit failure is logged and swallowed.
    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry) {
            tracing::warn!(error = %e, action = %entry.action, "audit write failed");
        }
        self.notifier.notify(&entry).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
