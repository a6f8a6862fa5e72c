mod config;
mod dashboard;
mod db;
mod web;

use anyhow::Result;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:moist.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed plants, profiles, sensors) ─────────────────
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;
    let settings = cfg.trend.settings();

    let plants = db.load_plants().await?;
    if plants.is_empty() {
        warn!("no plants configured in the database");
    }
    let sensors = db.load_sensors().await?;
    info!(
        plants = plants.len(),
        sensors = sensors.len(),
        window_hours = settings.params.window_hours,
        lookback_hours = settings.lookback.whole_hours(),
        "db ready"
    );

    // ── HTTP API ────────────────────────────────────────────────────
    web::serve(AppState { db, settings }).await
}
