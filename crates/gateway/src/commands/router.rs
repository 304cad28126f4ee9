//! Action routing.
//!
//! Maps dotted action keys to registered handlers. `route` is the
//! parser-facing entry; `dispatch` is the back door that skips parsing
//! (and therefore internal-flag stripping) for the approval
//! re-execution path and NL dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rk_domain::error::{Error, Result};

use super::{parse, ChatEvent, Command};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Command, ChatEvent) -> HandlerFuture + Send + Sync>;

/// Registry of action handlers keyed by dotted action.
pub struct Router {
    prefix: String,
    handlers: HashMap<String, HandlerFn>,
}

impl Router {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            handlers: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn register(&mut self, action: &str, handler: HandlerFn) {
        if self.handlers.insert(action.to_owned(), handler).is_some() {
            tracing::warn!(action, "handler registered twice, keeping the last one");
        }
    }

    /// Registered actions, sorted (for `help`).
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }

    /// Parse a raw line and run the matching handler.
    ///
    /// Internal `_`-prefixed flags are stripped right after parsing:
    /// operators cannot inject approval markers through the chat surface.
    pub async fn route(&self, line: &str, event: &ChatEvent) -> Result<String> {
        let mut cmd = parse(&self.prefix, line)?;
        cmd.strip_internal_flags();

        // `name.subcommand` first, then `name` alone.
        let action = cmd.action();
        let handler = self.handlers.get(&action).or_else(|| {
            cmd.subcommand.as_ref()?;
            self.handlers.get(&cmd.name)
        });

        match handler {
            Some(handler) => handler(cmd, event.clone()).await,
            None => Err(Error::Validation(format!(
                "unknown command {:?} — try {} help",
                action, self.prefix
            ))),
        }
    }

    /// Dispatch an already-built command, bypassing the parser.
    ///
    /// The only path that may carry `_approved` / `_approval_id` /
    /// `_trace_id` markers into a handler.
    pub async fn dispatch(&self, action: &str, cmd: Command, event: ChatEvent) -> Result<String> {
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| Error::Validation(format!("unknown action {action:?}")))?;
        handler(cmd, event).await
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
