//! Config parsing: defaults fill in for everything a TOML file omits.

use rk_domain::config::{Config, ConfigSeverity};

#[test]
fn empty_toml_yields_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.server.port, 3310);
    assert_eq!(config.chat.prefix, "/ruriko");
    assert_eq!(config.approvals.ttl_minutes, 15);
    assert_eq!(config.storage.retained_versions, 20);
    assert_eq!(config.storage.max_diff_lines, 2000);
    assert_eq!(config.provisioning.poll_interval_secs, 2);
    assert_eq!(config.provisioning.running_deadline_secs, 60);
    assert_eq!(config.provisioning.health_deadline_secs, 90);
    assert_eq!(config.provisioning.apply_retries, 3);
    assert!(config.nlp.enabled);
}

#[test]
fn partial_section_keeps_sibling_defaults() {
    let config: Config = toml::from_str(
        r#"
[server]
port = 9000

[chat]
prefix = "/ops"
"#,
    )
    .unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.chat.prefix, "/ops");
    assert_eq!(config.approvals.ttl_minutes, 15);
}

#[test]
fn gated_actions_overridable() {
    let config: Config = toml::from_str(
        r#"
[approvals]
gated_actions = ["agents.delete"]
"#,
    )
    .unwrap();
    assert!(config.approvals.is_gated("agents.delete"));
    assert!(!config.approvals.is_gated("config.set"));
}

#[test]
fn default_config_validates_clean() {
    let issues = Config::default().validate();
    assert!(issues
        .iter()
        .all(|i| i.severity != ConfigSeverity::Error));
}

#[test]
fn unknown_runtime_is_only_a_warning() {
    let config = Config::default();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "integrations.runtime_url"
            && i.severity == ConfigSeverity::Warning));
}
