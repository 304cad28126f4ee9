//! The LLM classifier behind natural-language dispatch.
//!
//! Free-form operator lines are classified into a typed intent envelope
//! by an OpenAI-compatible endpoint. The provider is memoised on its
//! settings triple and rebuilt lazily when any component changes; when
//! no endpoint is configured, a deterministic keyword matcher stands in.

pub mod cache;
pub mod client;
pub mod health;
pub mod intent;
pub mod keyword;

pub use cache::{ClassifierSettings, ProviderCache};
pub use client::{HistoryLine, NlpClient};
pub use health::{NlpHealth, NlpHealthState};
pub use intent::{ClassifierOutput, Intent, PlanStep, Usage};
