//! OpenAI-compatible classifier client.
//!
//! Works with OpenAI, Ollama, vLLM, and any other endpoint following the
//! chat-completions contract. One call per utterance, JSON mode on, and
//! the reply content parsed strictly into a [`ClassifierOutput`].

use std::time::{Duration, Instant};

use serde_json::Value;

use rk_domain::error::{Error, Result};

use crate::cache::ClassifierSettings;
use crate::intent::{ClassifierOutput, Usage};

/// Per-classification request timeout.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// System prompt teaching the model the envelope it must emit.
const SYSTEM_PROMPT: &str = r#"You are the intent classifier for a fleet control plane.
Operators manage long-running AI worker agents. Classify the latest
operator utterance into exactly one JSON object, no prose:

{"intent": "conversational" | "command" | "plan" | "unknown",
 "action": "<dotted action key, for command>",
 "flags": {"<flag>": "<value>", ...},
 "steps": [{"action": "...", "flags": {...}, "description": "..."}, ...],
 "explanation": "<one sentence>",
 "confidence": 0.0-1.0,
 "read_queries": ["<read-only command line>", ...]}

Available actions: agents.list, agents.show, agents.create, agents.start,
agents.stop, agents.respawn, agents.delete, agents.status, agents.cancel,
agents.disable, secrets.list, secrets.info, secrets.bind, secrets.unbind,
config.show, config.versions, config.diff, config.rollback, kv.list.

Use "command" for a single mutation, "plan" for several, "conversational"
for questions (fill read_queries with read-only commands when the answer
needs live data), and "unknown" when you need clarification (put the
clarifying question in explanation)."#;

/// One prior utterance for classifier context.
#[derive(Debug, Clone)]
pub struct HistoryLine {
    pub sender: String,
    pub text: String,
}

/// A classifier bound to one `{endpoint, model, api_key}` triple.
pub struct NlpClient {
    http: reqwest::Client,
    settings: ClassifierSettings,
}

impl NlpClient {
    /// Build a client. No network I/O happens here — the memoising
    /// cache constructs providers outside its critical section and
    /// expects construction to be cheap.
    pub fn new(settings: ClassifierSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CLASSIFY_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Classify an utterance with recent conversation history.
    pub async fn classify(
        &self,
        utterance: &str,
        history: &[HistoryLine],
    ) -> Result<ClassifierOutput> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": SYSTEM_PROMPT,
        })];
        for line in history {
            messages.push(serde_json::json!({
                "role": "user",
                "content": format!("{}: {}", line.sender, line.text),
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": utterance,
        }));

        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
            "response_format": {"type": "json_object"},
            "temperature": 0.0,
        });

        let url = format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        );

        let start = Instant::now();
        let mut request = self.http.post(&url).json(&body);
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(&self.settings.api_key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| Error::Transient(format!("classifier request failed: {e}")))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::Transient("classifier rate limited".into()));
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "classifier returned {status}: {body_text}"
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("classifier: decoding body: {e}")))?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Malformed("response missing choices[0].message.content".into()))?;

        let mut output = ClassifierOutput::parse(content)?;
        output.usage = Some(extract_usage(&json));

        tracing::debug!(
            intent = %output.intent,
            confidence = output.confidence,
            duration_ms = start.elapsed().as_millis() as u64,
            "utterance classified"
        );

        Ok(output)
    }
}

fn extract_usage(json: &Value) -> Usage {
    Usage {
        prompt_tokens: json
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        completion_tokens: json
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}
