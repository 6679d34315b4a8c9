use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use tr_domain::config::{Config, ConfigSeverity};
use tr_gateway::api;
use tr_gateway::bootstrap;
use tr_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = tr_gateway::cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = tr_gateway::cli::load_config(&cli.config)?;
            if !tr_gateway::cli::validate(&config, &cli.config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = tr_gateway::cli::load_config(&cli.config)?;
            tr_gateway::cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("taskrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tr_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("TaskRelay starting");

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

    // ── Wire the runtime ─────────────────────────────────────────────
    let runtime = bootstrap::build(config.clone())?;
    let state = runtime.state.clone();

    let app = api::router(state.clone())
        .with_state(state.clone())
        .layer(cors_layer(&config.server.cors_origin));

    // ── Serve until shutdown (operator endpoint or SIGINT) ───────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "taskrelay listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.notified() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await
        .context("server error")?;

    // ── Wind down: cancel tasks, flush state, drain the pool ─────────
    tracing::info!("shutting down");
    let grace = config.server.shutdown_grace();
    let cancelled = state.manager.cancel_running(grace).await;
    if cancelled > 0 {
        tracing::info!(cancelled, "running tasks cancelled");
    }
    if let Err(e) = state.manager.flush() {
        tracing::error!(error = %e, "final snapshot flush failed");
    }
    runtime.pool.shutdown().await;
    runtime.cleanup.abort();
    runtime.maintenance.abort();

    tracing::info!("goodbye");
    Ok(())
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        CorsLayer::permissive()
    } else {
        match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(AllowOrigin::exact(value))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
            Err(_) => {
                tracing::warn!(origin, "invalid CORS origin; falling back to permissive");
                CorsLayer::permissive()
            }
        }
    }
}
