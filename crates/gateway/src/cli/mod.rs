pub mod config;

use clap::{Parser, Subcommand};

/// Ruriko — a chat-driven control plane for AI worker fleets.
#[derive(Debug, Parser)]
#[command(name = "ruriko", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control plane (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `RURIKO_CONFIG` (or `ruriko.toml` by
/// default). Returns the parsed [`Config`] and the path that was used.
///
/// Shared by `serve` and the `config` subcommands so the logic lives in
/// one place.
pub fn load_config() -> anyhow::Result<(rk_domain::config::Config, String)> {
    let config_path =
        std::env::var("RURIKO_CONFIG").unwrap_or_else(|_| "ruriko.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        rk_domain::config::Config::default()
    };

    Ok((config, config_path))
}
