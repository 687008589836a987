use std::sync::Arc;

use anyhow::Context;
use tracing::{Level, info};

use engine::challenge::run_scheduler;
use engine::config::EngineConfig;
use engine::database::init_db;
use engine::notify::TracingNotifier;
use engine::provisioning::DisabledProvisioner;
use engine::seed::seed_default_badges;
use engine::state::EngineState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = EngineConfig::load().context("Failed to load configuration")?;
    let db = init_db(&config.database)
        .await
        .context("Failed to connect to the database")?;
    seed_default_badges(&db)
        .await
        .context("Failed to seed default badges")?;

    let scheduler_enabled = config.scheduler.enabled;
    let state = EngineState::new(
        db,
        Arc::new(DisabledProvisioner),
        Arc::new(TracingNotifier),
        config,
    );

    if !scheduler_enabled {
        info!("Scheduler disabled, nothing to do");
        return Ok(());
    }

    tokio::select! {
        _ = run_scheduler(state) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
