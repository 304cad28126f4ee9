use serde::Serialize;

/// Mint a short opaque trace ID: 8 lower-hex chars from a v4 UUID.
///
/// Minted once per handler invocation and threaded through audit rows,
/// breadcrumbs, and operator replies so a whole mutation can be pulled
/// back out of the logs with one token.
pub fn new_trace_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Structured trace events emitted across all Ruriko crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CommandDispatched {
        trace_id: String,
        action: String,
        actor: String,
        approved_redispatch: bool,
    },
    ApprovalRequested {
        trace_id: String,
        approval_id: String,
        action: String,
        target: String,
        requested_by: String,
    },
    ApprovalResolved {
        approval_id: String,
        action: String,
        status: String,
        resolved_by: String,
    },
    ProvisionStep {
        trace_id: String,
        agent_id: String,
        step: u8,
        state: String,
    },
    ProvisionFinished {
        trace_id: String,
        agent_id: String,
        ok: bool,
        failed_step: Option<u8>,
    },
    ConfigVersionWritten {
        agent_id: String,
        version: u64,
        hash_prefix: String,
        unchanged: bool,
    },
    NlClassified {
        trace_id: String,
        room_id: String,
        sender: String,
        intent: String,
        confidence: f64,
        latency_ms: u64,
    },
    NlDispatched {
        trace_id: String,
        action: String,
        sender: String,
    },
    GuardrailBlocked {
        room_id: String,
        sender: String,
        pattern: String,
    },
    AcpCall {
        agent_id: String,
        call: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "rk_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_shape() {
        let id = new_trace_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn trace_ids_unique() {
        let a = new_trace_id();
        let b = new_trace_id();
        assert_ne!(a, b);
    }

    #[test]
    fn event_serializes_with_tag() {
        let ev = TraceEvent::ProvisionStep {
            trace_id: "abcd1234".into(),
            agent_id: "warren".into(),
            step: 3,
            state: "configuring".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"ProvisionStep\""));
        assert!(json.contains("\"agent_id\":\"warren\""));
    }
}
