//! Natural-language dispatch.
//!
//! Lines that are neither `/`-prefixed commands nor approval decisions
//! land here. The classifier turns an utterance into a typed intent;
//! every mutating path then requires an explicit per-step confirmation
//! from the same `(room, sender)` before anything is dispatched.

pub mod budget;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use rk_domain::audit::{AuditEntry, AuditResult};
use rk_domain::error::{Error, Result};
use rk_domain::fleet::sanitize_agent_id;
use rk_domain::trace::{new_trace_id, TraceEvent};
use rk_providers::{
    keyword, ClassifierOutput, ClassifierSettings, Intent, NlpHealth, PlanStep, ProviderCache,
};

use crate::commands::{parse, ChatEvent, Command, Router};
use crate::state::AppState;
use budget::{BudgetCheck, NlBudget};
use session::{ConversationStore, SessionState};

/// Maximum correction round-trips after validation failures.
const MAX_CORRECTION_ATTEMPTS: u32 = 2;

/// Replies recognised as confirmation.
const POSITIVE_TOKENS: &[&str] = &["yes", "y", "ok", "okay", "proceed", "confirm", "sure", "go"];
/// Replies recognised as cancellation.
const NEGATIVE_TOKENS: &[&str] = &["no", "n", "cancel", "abort", "stop", "nevermind"];

/// Actions the conversational read-query path may dispatch.
const READ_ONLY_ACTIONS: &[&str] = &[
    "help",
    "version",
    "ping",
    "agents.list",
    "agents.show",
    "agents.status",
    "secrets.list",
    "secrets.info",
    "config.show",
    "config.versions",
    "config.diff",
    "kv.list",
    "kv.get",
    "approvals.list",
    "approvals.show",
    "audit.tail",
];

fn first_word(reply: &str) -> String {
    reply
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}

fn is_positive(reply: &str) -> bool {
    POSITIVE_TOKENS.contains(&first_word(reply).as_str())
}

fn is_negative(reply: &str) -> bool {
    NEGATIVE_TOKENS.contains(&first_word(reply).as_str())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NlDispatcher {
    state: AppState,
    router: Arc<Router>,
    sessions: ConversationStore,
    budget: NlBudget,
    cache: ProviderCache,
}

impl NlDispatcher {
    pub fn new(state: AppState, router: Arc<Router>) -> Self {
        let history_depth = state.config.nlp.history_depth;
        Self {
            state,
            router,
            sessions: ConversationStore::new(history_depth),
            budget: NlBudget::new(),
            cache: ProviderCache::new(),
        }
    }

    /// Evict expired conversation sessions (background sweeper hook).
    pub fn sweep_sessions(&self) -> usize {
        self.sessions.sweep()
    }

    /// Interpret a free-form line. `Ok(None)` means "stay silent".
    pub async fn handle(&self, event: &ChatEvent) -> Result<Option<String>> {
        if let Some(session) = self.sessions.take(&event.room_id, &event.sender) {
            return self.continue_session(session, event).await;
        }
        self.classify_idle(event).await
    }

    // ── Session continuation ────────────────────────────────────────

    async fn continue_session(
        &self,
        session: SessionState,
        event: &ChatEvent,
    ) -> Result<Option<String>> {
        match session {
            SessionState::AwaitingConfirmation { intent, original } => {
                if is_positive(&event.body) {
                    self.dispatch_confirmed(intent, 0, &original, event).await
                } else if is_negative(&event.body) {
                    Ok(Some("🚫 Cancelled — nothing was dispatched.".into()))
                } else {
                    // Let the operator keep typing; the question stands.
                    self.sessions.put(
                        &event.room_id,
                        &event.sender,
                        SessionState::AwaitingConfirmation { intent, original },
                    );
                    Ok(None)
                }
            }
            SessionState::AwaitingCorrection {
                intent,
                attempt,
                original,
            } => {
                if is_positive(&event.body) {
                    self.dispatch_confirmed(intent, attempt, &original, event).await
                } else if is_negative(&event.body) {
                    Ok(Some("🚫 Cancelled — nothing was dispatched.".into()))
                } else {
                    self.sessions.put(
                        &event.room_id,
                        &event.sender,
                        SessionState::AwaitingCorrection {
                            intent,
                            attempt,
                            original,
                        },
                    );
                    Ok(None)
                }
            }
            SessionState::AwaitingStepConfirmation {
                steps,
                index,
                original,
            } => {
                if is_negative(&event.body) {
                    return Ok(Some(format!(
                        "🚫 Plan aborted at step {} of {} — no further steps will run.",
                        index + 1,
                        steps.len()
                    )));
                }
                if !is_positive(&event.body) {
                    self.sessions.put(
                        &event.room_id,
                        &event.sender,
                        SessionState::AwaitingStepConfirmation {
                            steps,
                            index,
                            original,
                        },
                    );
                    return Ok(None);
                }

                let step = steps[index].clone();
                let step_desc = describe_step(&step);
                match self
                    .dispatch_action(&step.action, step.flags.clone(), &step_desc, 1.0, &original, event)
                    .await
                {
                    Ok(reply) => {
                        if index + 1 >= steps.len() {
                            Ok(Some(format!("{reply}\n\n✅ Plan complete.")))
                        } else {
                            let next = &steps[index + 1];
                            let prompt = format!(
                                "{reply}\n\nStep {} of {}: {} — proceed? (yes/no)",
                                index + 2,
                                steps.len(),
                                describe_step(next)
                            );
                            self.sessions.put(
                                &event.room_id,
                                &event.sender,
                                SessionState::AwaitingStepConfirmation {
                                    steps,
                                    index: index + 1,
                                    original,
                                },
                            );
                            Ok(Some(prompt))
                        }
                    }
                    Err(Error::Validation(msg)) => {
                        // The failing step goes through correction; the
                        // remaining plan steps are dropped.
                        let intent = ClassifierOutput {
                            intent: Intent::Command,
                            action: Some(step.action.clone()),
                            flags: step.flags.clone(),
                            steps: Vec::new(),
                            explanation: describe_step(&step),
                            confidence: 0.0,
                            read_queries: Vec::new(),
                            usage: None,
                        };
                        self.enter_correction(intent, 0, &msg, &original, event).await
                    }
                    Err(e) => Ok(Some(render_error(&e))),
                }
            }
        }
    }

    /// Dispatch a confirmed single-command intent.
    async fn dispatch_confirmed(
        &self,
        intent: ClassifierOutput,
        attempt: u32,
        original: &str,
        event: &ChatEvent,
    ) -> Result<Option<String>> {
        let Some(action) = intent.action.clone() else {
            return Ok(Some("⚠️ Lost track of the pending command; please rephrase.".into()));
        };
        match self
            .dispatch_action(
                &action,
                intent.flags.clone(),
                &intent.explanation,
                intent.confidence,
                original,
                event,
            )
            .await
        {
            Ok(reply) => Ok(Some(reply)),
            Err(Error::Validation(msg)) => {
                self.enter_correction(intent, attempt, &msg, original, event)
                    .await
            }
            Err(e) => Ok(Some(render_error(&e))),
        }
    }

    /// After a validation failure, ask the classifier for a corrected
    /// intent (bounded attempts) and park it for re-confirmation.
    async fn enter_correction(
        &self,
        failed: ClassifierOutput,
        attempt: u32,
        failure: &str,
        original: &str,
        event: &ChatEvent,
    ) -> Result<Option<String>> {
        if attempt >= MAX_CORRECTION_ATTEMPTS {
            return Ok(Some(format!(
                "❌ Still failing after {MAX_CORRECTION_ATTEMPTS} corrections: {failure}\n\
                 Giving up — try an explicit {} command.",
                self.router.prefix()
            )));
        }

        let Some(settings) = self.effective_settings() else {
            return Ok(Some(format!("❌ {failure}")));
        };

        let correction_query = format!(
            "The command `{}` with flags {:?} failed validation: {failure}. \
             Produce a corrected command for the original request: {original}",
            failed.action.as_deref().unwrap_or("?"),
            failed.flags,
        );
        let history = self.sessions.history(&event.room_id, &event.sender);
        let corrected = match self.classify(&settings, &correction_query, &history, event).await {
            Ok(output) if output.intent == Intent::Command => output,
            Ok(_) | Err(_) => {
                return Ok(Some(format!(
                    "❌ {failure} (and I could not come up with a correction)"
                )));
            }
        };

        let prompt = format!(
            "⚠️ That failed validation: {failure}\n\
             Corrected: `{}` with {} — proceed? (yes/no)",
            corrected.action.as_deref().unwrap_or("?"),
            render_flags(&corrected.flags),
        );
        self.sessions.put(
            &event.room_id,
            &event.sender,
            SessionState::AwaitingCorrection {
                intent: corrected,
                attempt: attempt + 1,
                original: original.to_owned(),
            },
        );
        Ok(Some(prompt))
    }

    // ── Idle classification ─────────────────────────────────────────

    async fn classify_idle(&self, event: &ChatEvent) -> Result<Option<String>> {
        let Some(settings) = self.effective_settings() else {
            // No classifier: deterministic keyword fallback only.
            return match keyword::match_keywords(&event.body) {
                Some(output) => self.prompt_for(output, event),
                None => Ok(Some(format!(
                    "I only understand {} commands right now (no language model \
                     is configured). Try `{} help`.",
                    self.router.prefix(),
                    self.router.prefix()
                ))),
            };
        };

        let rate = self.effective_rate_limit();
        match self.budget.check(
            &event.sender,
            rate,
            self.state.config.nlp.daily_token_budget,
        ) {
            BudgetCheck::RateLimited => {
                return Ok(Some(
                    "🐢 You're sending natural-language requests faster than I can \
                     classify them — give it a minute, or use explicit commands."
                        .into(),
                ));
            }
            BudgetCheck::BudgetExhausted => {
                return Ok(Some(
                    "📉 Your daily language-model budget is used up; it resets at \
                     midnight UTC. Explicit commands still work."
                        .into(),
                ));
            }
            BudgetCheck::Allowed => {}
        }

        let history = self.sessions.history(&event.room_id, &event.sender);
        self.sessions
            .push_history(&event.room_id, &event.sender, &event.body);

        let output = match self.classify(&settings, &event.body, &history, event).await {
            Ok(output) => output,
            Err(Error::Transient(_)) => {
                self.state.nlp_health.set(NlpHealth::Degraded);
                return Ok(Some(
                    "⏳ The language model is rate-limited right now; try again \
                     shortly, or use explicit commands."
                        .into(),
                ));
            }
            Err(Error::Malformed(_)) => {
                self.state.nlp_health.set(NlpHealth::Degraded);
                return Ok(Some(
                    "⚠️ The language model returned something I couldn't parse. \
                     Please rephrase, or use explicit commands."
                        .into(),
                ));
            }
            Err(e) => {
                self.state.nlp_health.set(NlpHealth::Unavailable);
                tracing::warn!(error = %e, "classifier call failed");
                return Ok(Some(
                    "⚠️ The language model is unavailable; only explicit commands \
                     work right now."
                        .into(),
                ));
            }
        };
        self.state.nlp_health.set(NlpHealth::Ok);
        if let Some(usage) = output.usage {
            self.budget.record_tokens(&event.sender, usage.total());
        }

        match output.intent {
            Intent::Conversational if output.read_queries.is_empty() => {
                Ok(Some(output.explanation))
            }
            Intent::Conversational => self.run_read_queries(&output, event).await,
            Intent::Command => self.prompt_for(output, event),
            Intent::Plan => {
                let steps = output.steps.clone();
                let overview: Vec<String> = steps
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("  {}. {}", i + 1, describe_step(s)))
                    .collect();
                let prompt = format!(
                    "📋 {}\n{}\n\nStep 1 of {}: {} — proceed? (yes/no)",
                    output.explanation,
                    overview.join("\n"),
                    steps.len(),
                    describe_step(&steps[0]),
                );
                self.sessions.put(
                    &event.room_id,
                    &event.sender,
                    SessionState::AwaitingStepConfirmation {
                        steps,
                        index: 0,
                        original: event.body.clone(),
                    },
                );
                Ok(Some(prompt))
            }
            Intent::Unknown => Ok(Some(output.explanation)),
        }
    }

    /// Park a command intent and ask for confirmation.
    fn prompt_for(&self, output: ClassifierOutput, event: &ChatEvent) -> Result<Option<String>> {
        let action = output.action.clone().unwrap_or_default();
        let prompt = format!(
            "🤖 {}\nI'll run `{action}` with {} — proceed? (yes/no)",
            output.explanation,
            render_flags(&output.flags),
        );
        self.sessions.put(
            &event.room_id,
            &event.sender,
            SessionState::AwaitingConfirmation {
                intent: output,
                original: event.body.clone(),
            },
        );
        Ok(Some(prompt))
    }

    /// Run the classifier's read-only queries through the router and
    /// concatenate the results under the explanation.
    async fn run_read_queries(
        &self,
        output: &ClassifierOutput,
        event: &ChatEvent,
    ) -> Result<Option<String>> {
        let prefix = self.router.prefix().to_owned();
        let mut sections = vec![output.explanation.clone()];
        for query in &output.read_queries {
            let line = format!("{prefix} {query}");
            let Ok(cmd) = parse(&prefix, &line) else {
                continue;
            };
            let action = cmd.action();
            if !READ_ONLY_ACTIONS.contains(&action.as_str()) {
                tracing::warn!(action, "classifier suggested a non-read-only query, skipping");
                continue;
            }
            match self.router.route(&line, event).await {
                Ok(result) => sections.push(result),
                Err(e) => sections.push(format!("({query}: {e})")),
            }
        }
        Ok(Some(sections.join("\n\n")))
    }

    // ── Dispatch plumbing ───────────────────────────────────────────

    /// Dispatch one confirmed action through the router and write the
    /// `nl.dispatch` audit row.
    async fn dispatch_action(
        &self,
        action: &str,
        mut flags: HashMap<String, String>,
        llm_intent: &str,
        confidence: f64,
        original: &str,
        event: &ChatEvent,
    ) -> Result<String> {
        // Same sanitiser as the structured surface; a changed value is
        // dispatched in its sanitised form.
        if let Some(name) = flags.get("name").cloned() {
            match sanitize_agent_id(&name) {
                Some(clean) => {
                    flags.insert("name".into(), clean);
                }
                None => {
                    return Err(Error::Validation(format!(
                        "{name:?} cannot be made into a valid agent name"
                    )));
                }
            }
        }

        let (name, subcommand) = match action.split_once('.') {
            Some((n, s)) => (n.to_owned(), Some(s.to_owned())),
            None => (action.to_owned(), None),
        };
        let trace_id = new_trace_id();
        flags.insert("_trace_id".into(), trace_id.clone());

        let cmd = Command {
            name,
            subcommand,
            args: Vec::new(),
            flags,
            raw: format!("(nl) {original}"),
        };

        let reply = self.router.dispatch(action, cmd, event.clone()).await?;

        TraceEvent::NlDispatched {
            trace_id: trace_id.clone(),
            action: action.to_owned(),
            sender: event.sender.clone(),
        }
        .emit();
        self.state
            .record_audit(
                AuditEntry::new(&trace_id, &event.sender, "nl.dispatch", AuditResult::Success)
                    .with_target(action)
                    .with_payload(serde_json::json!({
                        "source": "nl",
                        "llm_intent": llm_intent,
                        "confidence": confidence,
                        "original_message": original,
                    })),
            )
            .await;

        Ok(reply)
    }

    async fn classify(
        &self,
        settings: &ClassifierSettings,
        text: &str,
        history: &[rk_providers::HistoryLine],
        event: &ChatEvent,
    ) -> Result<ClassifierOutput> {
        let client = self.cache.get_or_build(settings)?;
        let started = std::time::Instant::now();
        let output = client.classify(text, history).await?;
        TraceEvent::NlClassified {
            trace_id: new_trace_id(),
            room_id: event.room_id.clone(),
            sender: event.sender.clone(),
            intent: output.intent.to_string(),
            confidence: output.confidence,
            latency_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        Ok(output)
    }

    /// Static config merged with the runtime KV overrides. `None` when
    /// the NL path is disabled or has no endpoint.
    fn effective_settings(&self) -> Option<ClassifierSettings> {
        let cfg = &self.state.config.nlp;
        if !cfg.enabled {
            return None;
        }
        let endpoint = self
            .state
            .kv
            .get("nlp.endpoint")
            .unwrap_or_else(|| cfg.endpoint.clone());
        if endpoint.is_empty() {
            return None;
        }
        let model = self
            .state
            .kv
            .get("nlp.model")
            .unwrap_or_else(|| cfg.model.clone());
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        Some(ClassifierSettings {
            endpoint,
            model,
            api_key,
        })
    }

    fn effective_rate_limit(&self) -> u32 {
        self.state
            .kv
            .get("nlp.rate-limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.state.config.nlp.rate_limit_per_minute)
    }
}

fn describe_step(step: &PlanStep) -> String {
    if step.description.is_empty() {
        format!("`{}` with {}", step.action, render_flags(&step.flags))
    } else {
        step.description.clone()
    }
}

fn render_flags(flags: &HashMap<String, String>) -> String {
    if flags.is_empty() {
        return "no flags".into();
    }
    let mut pairs: Vec<String> = flags.iter().map(|(k, v)| format!("--{k} {v}")).collect();
    pairs.sort();
    format!("`{}`", pairs.join(" "))
}

fn render_error(e: &Error) -> String {
    format!("⚠️ {e}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_tokens() {
        for reply in ["yes", "y", "OK", "Okay!", "proceed", "sure thing", "go ahead"] {
            assert!(is_positive(reply), "{reply:?}");
        }
        for reply in ["no", "N", "cancel", "abort that", "nevermind."] {
            assert!(is_negative(reply), "{reply:?}");
        }
        for reply in ["maybe", "what does it do?", "yesterday was fine"] {
            assert!(!is_positive(reply), "{reply:?}");
            assert!(!is_negative(reply), "{reply:?}");
        }
    }

    #[test]
    fn flag_rendering_is_stable() {
        let mut flags = HashMap::new();
        flags.insert("template".to_owned(), "cron-agent".to_owned());
        flags.insert("name".to_owned(), "warren".to_owned());
        assert_eq!(
            render_flags(&flags),
            "`--name warren --template cron-agent`"
        );
        assert_eq!(render_flags(&HashMap::new()), "no flags");
    }

    #[test]
    fn step_description_falls_back_to_action() {
        let step = PlanStep {
            action: "agents.create".into(),
            flags: HashMap::new(),
            description: String::new(),
        };
        assert!(describe_step(&step).contains("agents.create"));

        let step = PlanStep {
            description: "Create Saito".into(),
            ..step
        };
        assert_eq!(describe_step(&step), "Create Saito");
    }

    #[test]
    fn read_only_allowlist_has_no_mutations() {
        for action in READ_ONLY_ACTIONS {
            assert!(
                !action.contains("create")
                    && !action.contains("delete")
                    && !action.contains("set")
                    && !action.contains("rotate"),
                "{action} is not read-only"
            );
        }
    }
}
