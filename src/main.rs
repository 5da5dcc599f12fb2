use marketing_dashboard::{
    config::Config, db::Database, logging::init_logging, meta::MetaApi,
    models::InsightWindow, sync::SyncOrchestrator,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load configuration
    let config = Config::from_env()?;
    init_logging(&config);

    // Initialize database connection
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;

    let api = MetaApi::new(config.meta_api_root());
    let orchestrator = SyncOrchestrator::new(Arc::new(db), Arc::new(api));

    if config.sync_run_once {
        let summary = orchestrator.sync_all_users(InsightWindow::Yesterday).await?;
        info!(?summary, "one-shot sync finished");
        return Ok(());
    }

    orchestrator
        .run(Duration::from_secs(config.sync_interval_secs))
        .await;

    Ok(())
}
