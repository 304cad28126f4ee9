//! Append-only audit rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded on an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Error,
    Denied,
    Pending,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditResult::Success => "success",
            AuditResult::Error => "error",
            AuditResult::Denied => "denied",
            AuditResult::Pending => "pending",
        };
        f.write_str(s)
    }
}

/// One audit row. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub actor: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(trace_id: &str, actor: &str, action: &str, result: AuditResult) -> Self {
        Self {
            timestamp: Utc::now(),
            trace_id: trace_id.to_owned(),
            actor: actor.to_owned(),
            action: action.to_owned(),
            target: None,
            result,
            payload: None,
            error_message: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_owned());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_owned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trip() {
        let row = AuditEntry::new("abcd1234", "@op:hs", "agents.delete", AuditResult::Success)
            .with_target("warren")
            .with_payload(serde_json::json!({"step": 3}));

        let json = serde_json::to_string(&row).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trace_id, "abcd1234");
        assert_eq!(back.target.as_deref(), Some("warren"));
        assert_eq!(back.result, AuditResult::Success);
        assert!(back.error_message.is_none());
    }

    #[test]
    fn optional_fields_omitted_from_json() {
        let row = AuditEntry::new("t", "a", "ping", AuditResult::Success);
        let json = serde_json::to_string(&row).unwrap();
        assert!(!json.contains("target"));
        assert!(!json.contains("payload"));
        assert!(!json.contains("error_message"));
    }
}
