pub mod api;
pub mod approvals;
pub mod cli;
pub mod commands;
pub mod engine;
pub mod guardrail;
pub mod handlers;
pub mod nl;
pub mod pipeline;
pub mod ports;
pub mod state;
pub mod templates;
