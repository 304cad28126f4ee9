//! `ruriko config validate` / `ruriko config show`.

use rk_domain::config::{Config, ConfigSeverity};

/// Print validation issues; returns `true` when there are no errors.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("✓ {config_path} is valid");
        return true;
    }

    for issue in &issues {
        println!("{issue}");
    }

    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        println!("✗ {config_path}: {errors} error(s)");
        false
    } else {
        println!("✓ {config_path} is valid ({} warning(s))", issues.len());
        true
    }
}

/// Dump the resolved configuration with all defaults applied.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => println!("failed to render config: {e}"),
    }
}
