//! Shared NLP health state, surfaced through `healthz`.

use parking_lot::RwLock;
use serde::Serialize;

/// Health of the natural-language path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NlpHealth {
    /// Classifier answering normally.
    Ok,
    /// Recent rate limits or malformed output; calls still attempted.
    Degraded,
    /// No classifier configured or repeated hard failures.
    Unavailable,
}

impl std::fmt::Display for NlpHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NlpHealth::Ok => "ok",
            NlpHealth::Degraded => "degraded",
            NlpHealth::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Process-wide holder for the current NLP health.
pub struct NlpHealthState {
    inner: RwLock<NlpHealth>,
}

impl NlpHealthState {
    pub fn new(initial: NlpHealth) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> NlpHealth {
        *self.inner.read()
    }

    pub fn set(&self, health: NlpHealth) {
        let mut current = self.inner.write();
        if *current != health {
            tracing::info!(from = %*current, to = %health, "NLP health changed");
            *current = health;
        }
    }
}
