/**
 * VIGIL KERNEL - Point d'entrée du serveur de télémétrie
 *
 * RÔLE : Orchestration des modules : config, store, service métriques, HTTP, health.
 * Bootstrap complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : API REST (ingest/tail/hosts) + Metric Store indexé + health périodique.
 * UTILITÉ : Backend du moniteur temps réel, isolé par propriétaire.
 */

mod config;
mod health;
mod http;
mod identity;
mod models;
mod service;
mod store;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::service::MetricsService;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    // store : journal si configuré, sinon mémoire
    let store = store::open_store(cfg.store.journal_path.as_deref())
        .context("failed to open metric store")?;

    let health_tracker = HealthTracker::new();
    health_tracker.spawn_health_logger(store.clone(), Duration::from_secs(cfg.health_log_interval_secs.max(1)));

    let api_key = std::env::var("VIGIL_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("VIGIL_API_KEY not set, transport is not gated");
    }

    let app_state = AppState {
        service: MetricsService::new(store, cfg.limits.clone()),
        health_tracker,
        api_key: api_key.map(Arc::from),
    };

    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!("listening on http://{}", cfg.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;
    Ok(())
}
