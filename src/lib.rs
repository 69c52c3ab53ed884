//! Email-to-ticket reconciliation service
//!
//! Connects OAuth mailboxes, turns unprocessed inbound messages into
//! helpdesk tickets on a schedule, and keeps credentials fresh along the
//! way. The binary entry point wires the SQLite store, the Graph mail
//! source and the scheduler together; everything else talks through traits.

pub mod config;
pub mod graph;
pub mod oauth;
pub mod services;
pub mod store;
pub mod sync;
pub mod types;

pub use types::error::{MaildeskError, Result};

use std::sync::Arc;
use tracing::info;

/// Wire the service together and run the scheduler until interrupted
pub async fn run() -> Result<()> {
    let config = config::AppConfig::load()?;

    let db = Arc::new(store::Database::new(config.database_path())?);

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| MaildeskError::Config(format!("Failed to build HTTP client: {}", e)))?;

    let mail: Arc<dyn graph::MailSource> = Arc::new(graph::GraphMailSource::new(
        http.clone(),
        config.sync.fetch_page_size as u32,
    ));
    let endpoint = Arc::new(oauth::HttpTokenEndpoint::new(http, config.oauth.clone()));
    let guard = Arc::new(oauth::TokenGuard::new(endpoint, db.clone()));

    let reconciler = Arc::new(sync::Reconciler::new(
        mail,
        guard,
        db.clone(),
        db.clone(),
        db.clone(),
        db.clone(),
        config.sync.clone(),
    ));

    let scheduler = Arc::new(sync::SyncScheduler::new(
        reconciler,
        db.clone(),
        config.sync.clone(),
    ));

    let shutdown = scheduler.trigger_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown.send(sync::SyncTrigger::Shutdown);
        }
    });

    info!("Starting mailbox reconciliation service");
    scheduler.run().await;
    Ok(())
}
