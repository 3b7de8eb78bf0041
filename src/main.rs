use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use infra_reporter::config::load_config;
use infra_reporter::state::AppState;
use infra_reporter::{alert, api};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config();
    info!(
        "Starting infra reporter: prometheus={} loki={}",
        cfg.prometheus_url, cfg.loki_url
    );

    let state = Arc::new(AppState::from_config(cfg).await?);
    if !state.cluster.is_available() {
        info!("Running without cluster API access; cluster endpoints will report errors");
    }

    tokio::spawn(alert::run_watcher(Arc::clone(&state)));
    api::serve(state).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
