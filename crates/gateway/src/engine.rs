//! The chat-line engine: one inbound event in, at most one reply out.
//!
//! Interpretation order: guardrail scan, then `/`-prefixed commands,
//! then plain-text approval decisions, then natural language. The two
//! sentinels (`NotACommand`, `NotADecision`) are what let each stage
//! hand the line to the next without treating it as a failure.

use std::sync::Arc;

use rk_domain::error::Error;

use crate::commands::{ChatEvent, Router};
use crate::guardrail::GUARDRAIL_REPLY;
use crate::handlers;
use crate::nl::NlDispatcher;
use crate::state::AppState;

pub struct Engine {
    state: AppState,
    router: Arc<Router>,
    nl: NlDispatcher,
}

impl Engine {
    /// Wire the full dispatch graph: router + handlers, the approval
    /// gate's re-dispatch closure, and the NL dispatcher.
    pub fn new(state: AppState) -> Arc<Self> {
        let mut router = Router::new(&state.config.chat.prefix);
        handlers::register_all(&mut router, &state);
        let router = Arc::new(router);

        // The gate re-executes approved commands through the router;
        // injected after construction to avoid a reference cycle.
        state.gate.set_dispatch(router.clone());

        let nl = NlDispatcher::new(state.clone(), router.clone());
        Arc::new(Self { state, router, nl })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Background sweeper hook for abandoned NL sessions.
    pub fn sweep_sessions(&self) -> usize {
        self.nl.sweep_sessions()
    }

    /// Handle one chat event. `None` means "stay silent" (not an
    /// operator room, or an NL session swallowing a free-typed line).
    pub async fn handle(&self, event: &ChatEvent) -> Option<String> {
        let body = event.body.trim();
        if body.is_empty() {
            return None;
        }

        // Room allowlist: an empty list trusts the connector's routing.
        let rooms = &self.state.config.chat.operator_rooms;
        if !rooms.is_empty() && !rooms.iter().any(|r| r == &event.room_id) {
            tracing::debug!(room_id = %event.room_id, "ignoring non-operator room");
            return None;
        }

        let is_command = body.starts_with(self.router.prefix());

        // Secret filter runs before any routing.
        if self
            .state
            .guardrail
            .check(body, is_command, &event.room_id, &event.sender)
        {
            return Some(GUARDRAIL_REPLY.to_owned());
        }

        if is_command {
            return match self.router.route(body, event).await {
                Ok(reply) => Some(reply),
                Err(e) => Some(format!("⚠️ {e}")),
            };
        }

        // Plain text: approval decision, else natural language.
        match self.state.gate.decide(event).await {
            Ok(reply) => Some(reply),
            Err(Error::NotADecision) => match self.nl.handle(event).await {
                Ok(reply) => reply,
                Err(e) => Some(format!("⚠️ {e}")),
            },
            Err(e) => Some(format!("⚠️ {e}")),
        }
    }
}
