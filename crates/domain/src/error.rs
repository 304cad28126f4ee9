/// Shared error type used across all Ruriko crates.
///
/// The first block maps the control-plane error taxonomy; the carrier
/// variants at the bottom wrap library errors. `NotACommand` and
/// `NotADecision` are routing sentinels: the chat engine matches on them
/// to fall through to the next interpreter rather than report a failure.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// User error: bad IDs, missing flags, malformed YAML.
    #[error("{0}")]
    Validation(String),

    /// No such agent / secret / version / approval.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate agent, no-op rewrite, already-resolved approval.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The action requires a second operator's approval.
    #[error("approval required: {0}")]
    Gated(String),

    /// Self-approval and similar refusals.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network-ish failures worth retrying (ACP call, LLM rate limit).
    #[error("transient: {0}")]
    Transient(String),

    /// The classifier returned output we could not parse.
    #[error("malformed classifier output: {0}")]
    Malformed(String),

    /// The line does not start with the command prefix.
    #[error("not a command")]
    NotACommand,

    /// The line is not an approve/deny decision.
    #[error("not a decision")]
    NotADecision,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("store: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is safe to retry with bounded attempts.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Transient("rate limit".into()).is_transient());
        assert!(Error::Http("connection reset".into()).is_transient());
        assert!(!Error::Validation("bad id".into()).is_transient());
        assert!(!Error::NotFound("agent warren".into()).is_transient());
    }

    #[test]
    fn sentinel_display() {
        assert_eq!(Error::NotACommand.to_string(), "not a command");
        assert_eq!(Error::NotADecision.to_string(), "not a decision");
    }
}
