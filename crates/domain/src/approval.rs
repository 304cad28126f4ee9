//! Durable approval records for the four-eyes workflow.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Resolution status of an approval. Every non-`Pending` status is
/// terminal: a resolved approval never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A durable record requesting second-operator consent for a gated action.
///
/// `params_json` carries the original command's args and flags so an
/// approve can rebuild and re-dispatch the command exactly as typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Opaque short token (8 hex chars).
    pub id: String,
    /// Dotted action key, e.g. `agents.delete`.
    pub action: String,
    pub target: String,
    pub params_json: String,
    pub requested_by: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolve_reason: Option<String>,
}

impl Approval {
    /// Create a pending approval with the given time-to-live.
    pub fn new(
        action: &str,
        target: &str,
        params_json: String,
        requested_by: &str,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::trace::new_trace_id(),
            action: action.to_owned(),
            target: target.to_owned(),
            params_json,
            requested_by: requested_by.to_owned(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            resolved_at: None,
            resolved_by: None,
            resolve_reason: None,
        }
    }

    /// Whether the TTL has elapsed (regardless of recorded status).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_approval_is_pending_with_future_expiry() {
        let a = Approval::new(
            "agents.delete",
            "warren",
            "{}".into(),
            "@alice:example.org",
            Duration::minutes(15),
        );
        assert_eq!(a.status, ApprovalStatus::Pending);
        assert!(a.expires_at > a.created_at);
        assert_eq!(a.id.len(), 8);
        assert!(!a.is_expired(Utc::now()));
    }

    #[test]
    fn expiry_check() {
        let a = Approval::new("x.y", "t", "{}".into(), "@a:hs", Duration::minutes(15));
        assert!(a.is_expired(a.expires_at));
        assert!(a.is_expired(a.expires_at + Duration::seconds(1)));
        assert!(!a.is_expired(a.expires_at - Duration::seconds(1)));
    }

    #[test]
    fn terminal_states() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        for s in [
            ApprovalStatus::Approved,
            ApprovalStatus::Denied,
            ApprovalStatus::Expired,
            ApprovalStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
        }
    }
}
