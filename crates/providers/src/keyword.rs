//! Deterministic fallback matcher used when no classifier is configured.
//!
//! Recognises a small set of "create agent" phrasings and nothing else;
//! everything unrecognised stays unhandled rather than guessing.

use std::collections::HashMap;

use rk_domain::fleet::sanitize_agent_id;

use crate::intent::{ClassifierOutput, Intent};

/// Phrases that signal an agent-creation request.
const CREATE_PHRASES: &[&str] = &["create agent", "new agent", "spin up agent", "make an agent"];

/// Try to read the utterance as an agent-creation command.
///
/// Returns `None` for anything the matcher does not positively
/// recognise.
pub fn match_keywords(utterance: &str) -> Option<ClassifierOutput> {
    let lower = utterance.to_lowercase();
    let phrase = CREATE_PHRASES.iter().find(|p| lower.contains(*p))?;

    // The token after the phrase, if any, is the candidate name.
    let after = lower.split(phrase).nth(1).unwrap_or("").trim();
    let candidate = after
        .split_whitespace()
        .find(|w| !matches!(*w, "called" | "named" | "name"));

    let mut flags = HashMap::new();
    if let Some(name) = candidate.and_then(sanitize_agent_id) {
        flags.insert("name".to_owned(), name);
    }

    Some(ClassifierOutput {
        intent: Intent::Command,
        action: Some("agents.create".into()),
        flags,
        steps: Vec::new(),
        explanation: format!("create a new agent (matched {phrase:?})"),
        confidence: 0.5,
        read_queries: Vec::new(),
        usage: None,
    })
}
