//! MetadataCleanup: periodic retention purge over terminal `metadata` rows
//! (§4.9). Internal admin workflow names are always in the whitelist so a
//! deployment that never sets one still gets engine-housekeeping rows
//! cleaned up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coordinator_store::Store;
use tokio::sync::watch;
use tracing::{error, info, instrument};

/// Workflow names MetadataCleanup always purges, regardless of the
/// configured whitelist.
pub const ADMIN_WORKFLOW_NAMES: &[&str] = &[
    "ManifestManager",
    "JobDispatcher",
    "TaskServerExecutor",
    "MetadataCleanup",
];

pub struct MetadataCleanupConfig {
    pub cleanup_interval: Duration,
    pub retention: chrono::Duration,
    pub whitelist: Vec<String>,
}

impl Default for MetadataCleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(3600),
            retention: chrono::Duration::days(7),
            whitelist: Vec::new(),
        }
    }
}

pub struct MetadataCleanup<S: Store> {
    store: Arc<S>,
    config: MetadataCleanupConfig,
}

impl<S: Store> MetadataCleanup<S> {
    pub fn new(store: Arc<S>, config: MetadataCleanupConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("metadata cleanup starting");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                error!("metadata cleanup tick failed: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cleanup_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
        info!("metadata cleanup stopped");
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<(), coordinator_store::StoreError> {
        let whitelist: Vec<String> = ADMIN_WORKFLOW_NAMES
            .iter()
            .map(|s| s.to_string())
            .chain(self.config.whitelist.iter().cloned())
            .collect();

        let older_than = Utc::now() - self.config.retention;
        let purged = self
            .store
            .purge_terminal_metadata(&whitelist, older_than)
            .await?;
        if purged > 0 {
            info!(purged, "purged terminal metadata rows");
        }
        Ok(())
    }
}
