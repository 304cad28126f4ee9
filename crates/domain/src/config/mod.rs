mod approvals;
mod chat;
mod integrations;
mod nlp;
mod provisioning;
mod server;
mod storage;

pub use approvals::*;
pub use chat::*;
pub use integrations::*;
pub use nlp::*;
pub use provisioning::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub nlp: NlpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Endpoints for the external collaborators (runtime driver, room
    /// sender, account provisioner, secret link issuer).
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.chat.prefix.is_empty() || !self.chat.prefix.starts_with('/') {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "chat.prefix".into(),
                message: format!(
                    "command prefix must start with '/', got {:?}",
                    self.chat.prefix
                ),
            });
        }

        if self.approvals.ttl_minutes == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "approvals.ttl_minutes".into(),
                message: "approval TTL must be at least one minute".into(),
            });
        }

        if self.storage.retained_versions == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "storage.retained_versions".into(),
                message: "must retain at least one config version".into(),
            });
        }

        if self.provisioning.apply_retries == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "provisioning.apply_retries".into(),
                message: "ApplyConfig needs at least one attempt".into(),
            });
        }

        if self.integrations.runtime_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "integrations.runtime_url".into(),
                message: "no container runtime driver configured — \
                          agents.create will fail"
                    .into(),
            });
        }

        if self.nlp.enabled && self.nlp.endpoint.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "nlp.endpoint".into(),
                message: "NLP enabled without an endpoint — \
                          falling back to the keyword matcher"
                    .into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config
            .validate()
            .iter()
            .any(|e| e.field == "server.port" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn prefix_must_be_slash_led() {
        let mut config = Config::default();
        config.chat.prefix = "ruriko".into();
        assert!(config
            .validate()
            .iter()
            .any(|e| e.field == "chat.prefix"));
    }

    #[test]
    fn display_format() {
        let e = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "nlp.endpoint".into(),
            message: "missing".into(),
        };
        assert_eq!(e.to_string(), "[WARN] nlp.endpoint: missing");
    }
}
