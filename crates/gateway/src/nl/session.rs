//! Conversation sessions for the natural-language confirmation flow.
//!
//! One session per `(room, sender)`, holding the pending confirmation
//! as a tagged variant. TTL eviction happens on access; a background
//! sweeper additionally clears abandoned sessions. The whole map sits
//! behind one mutex so take-then-decide sequences are atomic — two
//! parallel "yes" replies from the same sender resolve to one dispatch.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use rk_providers::{ClassifierOutput, HistoryLine, PlanStep};

/// Session lifetime.
pub const SESSION_TTL_MINUTES: i64 = 5;

/// What the sender is being asked to confirm.
///
/// Every variant carries the utterance that opened the session so the
/// eventual `nl.dispatch` audit row can quote it.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// A single mutating command awaiting "yes".
    AwaitingConfirmation {
        intent: ClassifierOutput,
        original: String,
    },
    /// A plan: confirmed and dispatched one step at a time.
    AwaitingStepConfirmation {
        steps: Vec<PlanStep>,
        index: usize,
        original: String,
    },
    /// A corrected intent after a validation failure.
    AwaitingCorrection {
        intent: ClassifierOutput,
        attempt: u32,
        original: String,
    },
}

struct SessionEntry {
    state: SessionState,
    expires_at: DateTime<Utc>,
}

type Key = (String, String);

/// In-memory conversation store keyed by `(room_id, sender)`.
#[derive(Default)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<Key, SessionEntry>>,
    history: Mutex<HashMap<Key, VecDeque<HistoryLine>>>,
    history_depth: usize,
}

impl ConversationStore {
    pub fn new(history_depth: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            history_depth,
        }
    }

    fn key(room_id: &str, sender: &str) -> Key {
        (room_id.to_owned(), sender.to_owned())
    }

    /// Remove and return the live session, if any. Expired sessions are
    /// deleted on access and reported as absent. Taking (rather than
    /// peeking) is what makes confirmations at-most-once.
    pub fn take(&self, room_id: &str, sender: &str) -> Option<SessionState> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.remove(&Self::key(room_id, sender))?;
        if Utc::now() >= entry.expires_at {
            return None;
        }
        Some(entry.state)
    }

    /// Store (or restore) a session with a fresh TTL.
    pub fn put(&self, room_id: &str, sender: &str, state: SessionState) {
        let mut sessions = self.sessions.lock();
        sessions.insert(
            Self::key(room_id, sender),
            SessionEntry {
                state,
                expires_at: Utc::now() + Duration::minutes(SESSION_TTL_MINUTES),
            },
        );
    }

    pub fn clear(&self, room_id: &str, sender: &str) {
        self.sessions.lock().remove(&Self::key(room_id, sender));
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    // ── Classifier history ──────────────────────────────────────────

    pub fn push_history(&self, room_id: &str, sender: &str, text: &str) {
        let mut history = self.history.lock();
        let lines = history.entry(Self::key(room_id, sender)).or_default();
        lines.push_back(HistoryLine {
            sender: sender.to_owned(),
            text: text.to_owned(),
        });
        while lines.len() > self.history_depth {
            lines.pop_front();
        }
    }

    pub fn history(&self, room_id: &str, sender: &str) -> Vec<HistoryLine> {
        self.history
            .lock()
            .get(&Self::key(room_id, sender))
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
