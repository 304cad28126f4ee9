//! The typed intent envelope returned by the classifier.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use rk_domain::error::{Error, Result};

/// What the classifier decided the utterance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Small talk or a read-only question; no mutation intended.
    Conversational,
    /// One mutating command.
    Command,
    /// A sequence of commands to confirm step by step.
    Plan,
    /// The classifier needs clarification.
    Unknown,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Conversational => "conversational",
            Intent::Command => "command",
            Intent::Plan => "plan",
            Intent::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One step of a multi-step plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Dotted action key, e.g. `agents.create`.
    pub action: String,
    #[serde(default)]
    pub flags: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The full classifier envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub intent: Intent,
    /// For `Command`: the dotted action key.
    #[serde(default)]
    pub action: Option<String>,
    /// For `Command`: flag name → value.
    #[serde(default)]
    pub flags: HashMap<String, String>,
    /// For `Plan`: the ordered steps.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Human-readable reading of the utterance (also the reply text for
    /// `Conversational` and the clarification for `Unknown`).
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub confidence: f64,
    /// For `Conversational`: read-only commands to run and summarise.
    #[serde(default)]
    pub read_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ClassifierOutput {
    /// Parse the model's reply content into an envelope.
    ///
    /// Strict: a reply that is not a JSON object with a recognised
    /// `intent` is `Error::Malformed` — the caller reports a dedicated
    /// message rather than guessing.
    pub fn parse(content: &str) -> Result<Self> {
        // Models occasionally wrap JSON in a code fence despite JSON mode.
        let trimmed = strip_code_fence(content.trim());
        let mut out: ClassifierOutput = serde_json::from_str(trimmed)
            .map_err(|e| Error::Malformed(format!("{e}: {content:?}")))?;

        match out.intent {
            Intent::Command if out.action.as_deref().unwrap_or("").is_empty() => {
                return Err(Error::Malformed(
                    "intent=command without an action".into(),
                ));
            }
            Intent::Plan if out.steps.is_empty() => {
                return Err(Error::Malformed("intent=plan without steps".into()));
            }
            _ => {}
        }
        out.confidence = out.confidence.clamp(0.0, 1.0);
        Ok(out)
    }
}

fn strip_code_fence(s: &str) -> &str {
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_envelope() {
        let out = ClassifierOutput::parse(
            r#"{"intent":"command","action":"agents.create",
                "flags":{"name":"warren","template":"cron-agent"},
                "explanation":"create agent warren","confidence":0.92}"#,
        )
        .unwrap();
        assert_eq!(out.intent, Intent::Command);
        assert_eq!(out.action.as_deref(), Some("agents.create"));
        assert_eq!(out.flags["name"], "warren");
    }

    #[test]
    fn parses_plan_envelope() {
        let out = ClassifierOutput::parse(
            r#"{"intent":"plan","steps":[
                {"action":"agents.create","flags":{"name":"saito"}},
                {"action":"agents.create","flags":{"name":"kumo"}}],
               "explanation":"set up two agents","confidence":0.8}"#,
        )
        .unwrap();
        assert_eq!(out.intent, Intent::Plan);
        assert_eq!(out.steps.len(), 2);
        assert_eq!(out.steps[1].flags["name"], "kumo");
    }

    #[test]
    fn parses_conversational_with_read_queries() {
        let out = ClassifierOutput::parse(
            r#"{"intent":"conversational","read_queries":["agents list"],
               "explanation":"here is the fleet","confidence":0.7}"#,
        )
        .unwrap();
        assert_eq!(out.intent, Intent::Conversational);
        assert_eq!(out.read_queries, vec!["agents list"]);
    }

    #[test]
    fn tolerates_code_fences() {
        let out = ClassifierOutput::parse(
            "```json\n{\"intent\":\"unknown\",\"explanation\":\"which agent?\"}\n```",
        )
        .unwrap();
        assert_eq!(out.intent, Intent::Unknown);
    }

    #[test]
    fn command_without_action_is_malformed() {
        let err = ClassifierOutput::parse(r#"{"intent":"command"}"#).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn plan_without_steps_is_malformed() {
        let err = ClassifierOutput::parse(r#"{"intent":"plan"}"#).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            ClassifierOutput::parse("sure, I can do that!"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn confidence_clamped() {
        let out = ClassifierOutput::parse(
            r#"{"intent":"unknown","explanation":"?","confidence":7.5}"#,
        )
        .unwrap();
        assert_eq!(out.confidence, 1.0);
    }
}
