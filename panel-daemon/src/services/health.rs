use crate::store::SqliteStore;
use async_trait::async_trait;
use panel_core::backup::BackupManager;
use panel_core::scheduler::HealthProbe;
use panel_core::ssl::CertificateStore;
use std::sync::Arc;

/// Checks the panel database and the backup volume, then logs a summary.
pub struct DatabaseHealthProbe {
    store: SqliteStore,
    backups: Arc<BackupManager>,
}

impl DatabaseHealthProbe {
    pub fn new(store: SqliteStore, backups: Arc<BackupManager>) -> Self {
        Self { store, backups }
    }
}

#[async_trait]
impl HealthProbe for DatabaseHealthProbe {
    async fn check(&self) -> anyhow::Result<()> {
        self.store.ping().await?;

        let root = self.backups.backup_root();
        if !tokio::fs::try_exists(root).await? {
            anyhow::bail!("backup root {} is missing", root.display());
        }

        let stats = self.backups.get_stats().await?;
        let certificates = self.store.find_enabled().await?.len();
        tracing::info!(
            backups = stats.total,
            backup_bytes = stats.total_size_bytes,
            certificates,
            "Health check passed"
        );
        Ok(())
    }
}
