use anyhow::{Context, Result};
use caminando::config;
use caminando::db::{ConnectionRegistry, ModelBinder};
use caminando::model::HealthStatus;
use caminando::store::{self, Stores};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Open every database, print the health map as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let registry = Arc::new(ConnectionRegistry::open_all(&cfg).await?);

    if args.once {
        let health = registry.health_check().await;
        println!("{}", serde_json::to_string_pretty(&health)?);
        registry.close_all().await;
        return Ok(());
    }

    if let Err(err) = registry.ensure_any_connected() {
        registry.close_all().await;
        return Err(err).context("refusing to start");
    }

    let binder = Arc::new(ModelBinder::new(registry.clone()));
    let report = store::bind_all(&binder);
    for (database, err) in &report.unavailable {
        warn!(%database, error = %err, "running without database");
    }
    let stores = Stores::new(binder);
    match stores.system() {
        Ok(system) => {
            if let Err(err) = system.seed_default_settings().await {
                error!(?err, "failed to seed default settings");
            }
        }
        Err(err) => warn!(error = %err, "settings unavailable"),
    }

    let interval_secs = cfg.app.health_interval_secs.max(1);
    let monitor = registry.clone();
    let health_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let health = monitor.health_check().await;
            let up = health
                .values()
                .filter(|s| **s == HealthStatus::Connected)
                .count();
            info!(connected = up, configured = health.len(), "health check");
        }
    });

    info!(
        connected = registry.connected_count(),
        "caminando ready; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    health_task.abort();

    let closed = registry.close_all().await;
    if !closed.is_clean() {
        for (name, reason) in &closed.failed {
            error!(database = %name, %reason, "failed to close");
        }
    }
    Ok(())
}
