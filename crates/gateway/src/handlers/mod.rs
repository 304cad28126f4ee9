//! The orchestrating handler layer.
//!
//! Every handler follows the same shape: resolve the trace ID, validate
//! inputs, consult the approval gate for gated actions, perform the
//! operation against the leaves, write audit, and return a reply that
//! embeds the trace ID. The `entry` wrapper owns the error leg: a
//! failed handler gets its `result=error` audit row before the error
//! propagates to the caller (the engine renders it; the NL path matches
//! on it for correction retries).

pub mod agents;
pub mod approvals;
pub mod audit;
pub mod config;
pub mod kv;
pub mod misc;
pub mod secrets;

use std::future::Future;
use std::sync::Arc;

use rk_domain::audit::{AuditEntry, AuditResult};
use rk_domain::error::{Error, Result};
use rk_domain::trace::new_trace_id;

use crate::commands::router::{HandlerFn, Router};
use crate::commands::{ChatEvent, Command};
use crate::state::AppState;

/// Honour the re-dispatch marker, else mint a fresh trace ID.
pub(crate) fn trace_from(cmd: &Command) -> String {
    cmd.flag("_trace_id")
        .map(str::to_owned)
        .unwrap_or_else(new_trace_id)
}

/// Wrap a handler function with the uniform trace + error-audit shape.
fn entry<F, Fut>(state: &AppState, action: &'static str, f: F) -> HandlerFn
where
    F: Fn(AppState, Command, ChatEvent, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    let state = state.clone();
    Arc::new(move |cmd, event| {
        let state = state.clone();
        let f = f.clone();
        Box::pin(async move {
            let trace_id = trace_from(&cmd);
            match f(state.clone(), cmd, event.clone(), trace_id.clone()).await {
                Ok(reply) => Ok(reply),
                Err(e) => {
                    state
                        .record_audit(
                            AuditEntry::new(&trace_id, &event.sender, action, AuditResult::Error)
                                .with_error(&e.to_string()),
                        )
                        .await;
                    Err(e)
                }
            }
        })
    })
}

/// Register the full action catalog.
pub fn register_all(router: &mut Router, state: &AppState) {
    // Meta
    router.register("help", entry(state, "help", misc::help));
    router.register("version", entry(state, "version", misc::version));
    router.register("ping", entry(state, "ping", misc::ping));
    router.register("trace", entry(state, "trace", misc::trace));

    // Agents
    router.register("agents.list", entry(state, "agents.list", agents::list));
    router.register("agents.show", entry(state, "agents.show", agents::show));
    router.register("agents.create", entry(state, "agents.create", agents::create));
    router.register("agents.start", entry(state, "agents.start", agents::start));
    router.register("agents.stop", entry(state, "agents.stop", agents::stop));
    router.register("agents.respawn", entry(state, "agents.respawn", agents::respawn));
    router.register("agents.delete", entry(state, "agents.delete", agents::delete));
    router.register("agents.status", entry(state, "agents.status", agents::status));
    router.register("agents.cancel", entry(state, "agents.cancel", agents::cancel));
    router.register(
        "agents.matrix-register",
        entry(state, "agents.matrix-register", agents::matrix_register),
    );
    router.register("agents.disable", entry(state, "agents.disable", agents::disable));

    // Secrets
    router.register("secrets.list", entry(state, "secrets.list", secrets::list));
    router.register("secrets.info", entry(state, "secrets.info", secrets::info));
    router.register("secrets.set", entry(state, "secrets.set", secrets::set));
    router.register("secrets.rotate", entry(state, "secrets.rotate", secrets::rotate));
    router.register("secrets.delete", entry(state, "secrets.delete", secrets::delete));
    router.register("secrets.bind", entry(state, "secrets.bind", secrets::bind));
    router.register("secrets.unbind", entry(state, "secrets.unbind", secrets::unbind));
    router.register("secrets.push", entry(state, "secrets.push", secrets::push));

    // Agent config documents
    router.register("config.show", entry(state, "config.show", config::show));
    router.register("config.versions", entry(state, "config.versions", config::versions));
    router.register("config.diff", entry(state, "config.diff", config::diff));
    router.register("config.set", entry(state, "config.set", config::set));
    router.register(
        "config.set-persona",
        entry(state, "config.set-persona", config::set_persona),
    );
    router.register(
        "config.set-instructions",
        entry(state, "config.set-instructions", config::set_instructions),
    );
    router.register("config.rollback", entry(state, "config.rollback", config::rollback));
    router.register("config.push", entry(state, "config.push", config::push));

    // Runtime KV
    router.register("kv.set", entry(state, "kv.set", kv::set));
    router.register("kv.get", entry(state, "kv.get", kv::get));
    router.register("kv.list", entry(state, "kv.list", kv::list));
    router.register("kv.unset", entry(state, "kv.unset", kv::unset));

    // Approvals + audit
    router.register("approvals.list", entry(state, "approvals.list", approvals::list));
    router.register("approvals.show", entry(state, "approvals.show", approvals::show));
    router.register("audit.tail", entry(state, "audit.tail", audit::tail));
}

/// Gate helper shared by the gated handlers: returns the approval
/// prompt (already audited by the gate) when the command must park.
pub(crate) async fn gate_check(
    state: &AppState,
    action: &str,
    target: &str,
    cmd: &Command,
    event: &ChatEvent,
    trace_id: &str,
) -> Result<Option<String>> {
    state
        .gate
        .request_if_needed(action, target, cmd, event, trace_id)
        .await
}

/// Success-audit helper.
pub(crate) async fn audit_success(
    state: &AppState,
    trace_id: &str,
    actor: &str,
    action: &str,
    target: &str,
    payload: Option<serde_json::Value>,
) {
    let mut entry =
        AuditEntry::new(trace_id, actor, action, AuditResult::Success).with_target(target);
    if let Some(payload) = payload {
        entry = entry.with_payload(payload);
    }
    state.record_audit(entry).await;
}

/// Resolve the agent named by the command (positional or `--name`).
pub(crate) fn target_agent(state: &AppState, cmd: &Command) -> Result<rk_domain::fleet::Agent> {
    let name = cmd.target("name")?;
    state.agents.require(name)
}

/// Friendly wrapper for "this external service is not wired up".
pub(crate) fn unconfigured(what: &str, key: &str) -> Error {
    Error::Validation(format!("{what} is not configured (set integrations.{key})"))
}
