use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use rk_domain::config::{Config, ConfigSeverity};
use rk_gateway::api::{self, ApiState, DedupeStore};
use rk_gateway::approvals::ApprovalGate;
use rk_gateway::cli::{Cli, Command, ConfigCommand};
use rk_gateway::engine::Engine;
use rk_gateway::guardrail::Guardrail;
use rk_gateway::ports::{self, TracingAuditNotifier};
use rk_gateway::state::AppState;
use rk_providers::{NlpHealth, NlpHealthState};
use rk_store::{AgentStore, ApprovalStore, AuditLog, KvStore, SecretStore, VersionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = rk_gateway::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = rk_gateway::cli::load_config()?;
            let valid = rk_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = rk_gateway::cli::load_config()?;
            rk_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("ruriko {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rk_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the control plane with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Ruriko starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Stores ───────────────────────────────────────────────────────
    let state_path = &config.storage.state_path;
    let agents = Arc::new(AgentStore::new(state_path).context("initializing agent store")?);
    let versions = Arc::new(
        VersionStore::new(state_path, config.storage.retained_versions)
            .context("initializing config version store")?,
    );
    let approvals =
        Arc::new(ApprovalStore::new(state_path).context("initializing approval store")?);
    let audit = Arc::new(AuditLog::new(state_path).context("initializing audit log")?);
    let kv = Arc::new(KvStore::new(state_path).context("initializing KV store")?);
    let secrets = Arc::new(SecretStore::new(state_path).context("initializing secret store")?);
    tracing::info!(path = %state_path.display(), "stores ready");

    // ── External collaborator ports ──────────────────────────────────
    let integrations = ports::build_integrations(&config.integrations)
        .context("initializing integrations")?;
    tracing::info!(
        runtime = integrations.runtime.is_some(),
        accounts = integrations.accounts.is_some(),
        links = integrations.links.is_some(),
        vault = integrations.distributor.is_some(),
        "integration ports ready"
    );
    let notifier = Arc::new(TracingAuditNotifier);

    // ── Approval gate ────────────────────────────────────────────────
    let gate = Arc::new(ApprovalGate::new(
        approvals.clone(),
        audit.clone(),
        notifier.clone(),
        config.approvals.clone(),
    ));
    tracing::info!(
        gated_actions = config.approvals.gated_actions.len(),
        ttl_minutes = config.approvals.ttl_minutes,
        "approval gate ready"
    );

    // ── API token (read once, hash for comparison) ───────────────────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "inbound bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "inbound bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    // ── NLP health ───────────────────────────────────────────────────
    let initial_nlp = if config.nlp.enabled && !config.nlp.endpoint.is_empty() {
        NlpHealth::Ok
    } else {
        NlpHealth::Unavailable
    };
    let nlp_health = Arc::new(NlpHealthState::new(initial_nlp));

    // ── App state + engine ───────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        agents,
        versions,
        approvals: approvals.clone(),
        audit,
        kv,
        secrets,
        gate,
        runtime: integrations.runtime,
        rooms: integrations.rooms,
        accounts: integrations.accounts,
        links: integrations.links,
        distributor: integrations.distributor,
        notifier,
        guardrail: Arc::new(Guardrail::new()),
        nlp_health,
        api_token_hash,
    };
    let engine = Engine::new(state.clone());
    tracing::info!(
        actions = engine.router().actions().len(),
        prefix = %config.chat.prefix,
        "command engine ready"
    );

    // ── Periodic approval expiry sweep ───────────────────────────────
    {
        let approvals = approvals.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = approvals.check_expiry() {
                    tracing::warn!(error = %e, "approval expiry sweep failed");
                }
            }
        });
    }

    // ── Periodic conversation session sweep ──────────────────────────
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let swept = engine.sweep_sessions();
                if swept > 0 {
                    tracing::debug!(swept, "expired NL sessions removed");
                }
            }
        });
    }

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("RURIKO_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Rate-limit layer (per-IP token bucket via governor) ──────────
    let governor_layer = config.server.rate_limit.as_ref().and_then(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()?;

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );

        Some(GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        })
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    // ── Router ───────────────────────────────────────────────────────
    let dedupe = Arc::new(DedupeStore::new(std::time::Duration::from_secs(86_400)));
    let api_state = ApiState {
        app: state,
        engine,
        dedupe,
    };
    let router = api::router(api_state)
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov)
    } else {
        router
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Ruriko listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`); a literal `"*"` allows all origins.
fn build_cors_layer(cors: &rk_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // Wildcard ports must be digits only, so a prefix like
            // "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
