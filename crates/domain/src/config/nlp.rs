use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Natural-language dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpConfig {
    /// When false, free-form lines only hit the keyword fallback.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// OpenAI-compatible chat-completions endpoint.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Environment variable holding the classifier API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Per-sender daily token budget; 0 disables the budget.
    #[serde(default = "d_daily_budget")]
    pub daily_token_budget: u64,
    /// Per-sender classify calls per minute; 0 disables the limit.
    #[serde(default = "d_rate_limit")]
    pub rate_limit_per_minute: u32,
    /// Utterances of history sent with each classification.
    #[serde(default = "d_history_depth")]
    pub history_depth: usize,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            endpoint: String::new(),
            model: d_model(),
            api_key_env: d_api_key_env(),
            daily_token_budget: d_daily_budget(),
            rate_limit_per_minute: d_rate_limit(),
            history_depth: d_history_depth(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_api_key_env() -> String {
    "RURIKO_NLP_API_KEY".into()
}
fn d_daily_budget() -> u64 {
    200_000
}
fn d_rate_limit() -> u32 {
    10
}
fn d_history_depth() -> usize {
    10
}
