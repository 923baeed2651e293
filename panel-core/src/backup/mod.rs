//! Database, workload, configuration and full backups under a single root:
//!
//! ```text
//! <backup-root>/database/<name>.sql.gz
//! <backup-root>/workloads/<name>.tar.gz
//! <backup-root>/config/<name>.tar.gz
//! <backup-root>/full/<name>.json      (manifest of the constituent backups)
//! ```
//!
//! Workload backups capture the container filesystem only. Volumes mounted
//! from outside the container are not included.

pub mod database;
pub mod models;

pub use database::DatabaseTarget;
pub use models::{Backup, BackupKind, BackupStats, RetentionSweep};

use crate::clock::{offset_days, Clock};
use crate::config::Config;
use crate::process::{CommandSpec, Pipeline, ProcessRunner};
use crate::utils::errors::{OrchestratorError, Result};
use crate::workload::{Workload, WorkloadInventory};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const COMPRESSOR: &str = "gzip";
const ARCHIVER: &str = "tar";

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backup_root: PathBuf,
    pub config_sources: Vec<PathBuf>,
    pub database_url: String,
    pub dump_binary: String,
    pub load_binary: String,
    pub export_binary: String,
}

impl BackupSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backup_root: config.paths.backup_root.clone(),
            config_sources: config.paths.config_sources.clone(),
            database_url: config.database.url.clone(),
            dump_binary: config.database.dump_binary.clone(),
            load_binary: config.database.load_binary.clone(),
            export_binary: config.workloads.export_binary.clone(),
        }
    }
}

pub struct BackupManager {
    settings: BackupSettings,
    runner: Arc<dyn ProcessRunner>,
    inventory: Arc<dyn WorkloadInventory>,
    clock: Arc<dyn Clock>,
}

impl BackupManager {
    pub fn new(
        settings: BackupSettings,
        runner: Arc<dyn ProcessRunner>,
        inventory: Arc<dyn WorkloadInventory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            runner,
            inventory,
            clock,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.settings.backup_root
    }

    /// Creates the per-kind directories. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        for kind in BackupKind::ALL {
            tokio::fs::create_dir_all(self.kind_dir(kind)).await?;
        }
        tracing::info!(backup_root = %self.settings.backup_root.display(), "Backup directories ready");
        Ok(())
    }

    pub async fn create_database_backup(&self, name: Option<&str>) -> Result<Backup> {
        let target = DatabaseTarget::parse(&self.settings.database_url)?;
        let name = match name {
            Some(name) => sanitize_name(name)?,
            None => format!("database-{}", self.timestamp()),
        };
        let path = self.artifact_path(BackupKind::Database, &name);

        tracing::info!(name = %name, database = %target.database, "Creating database backup");

        let pipeline = Pipeline::new()
            .pipe(target.dump_command(&self.settings.dump_binary))
            .pipe(CommandSpec::new(COMPRESSOR))
            .write_to(&path);
        self.run_into(&pipeline, &path).await?;

        let mut metadata = Map::new();
        metadata.insert("database".into(), json!(target.database));
        metadata.insert("compressed".into(), json!(true));

        self.finish(BackupKind::Database, name, path, metadata).await
    }

    /// Loads a database backup into the configured database. Destructive;
    /// never retried.
    pub async fn restore_database_backup(&self, backup_id: &str) -> Result<()> {
        let id = sanitize_name(backup_id)?;
        let path = self.artifact_path(BackupKind::Database, &id);
        if !is_file(&path).await {
            return Err(OrchestratorError::NotFound(format!("database backup {backup_id}")));
        }
        let target = DatabaseTarget::parse(&self.settings.database_url)?;

        tracing::info!(backup_id = %id, database = %target.database, "Restoring database backup");

        let pipeline = Pipeline::new()
            .pipe(CommandSpec::new(COMPRESSOR).arg("-dc"))
            .pipe(target.load_command(&self.settings.load_binary))
            .read_from(&path);
        self.runner.run_pipeline(&pipeline).await.inspect_err(|e| {
            tracing::error!(backup_id = %id, error = %e, "Database restore failed");
        })?;

        tracing::info!(backup_id = %id, "Database backup restored");
        Ok(())
    }

    pub async fn create_workload_backup(&self, workload_id: &str) -> Result<Backup> {
        let workload = self
            .inventory
            .get(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workload {workload_id}")))?;
        self.backup_workload(&workload).await
    }

    async fn backup_workload(&self, workload: &Workload) -> Result<Backup> {
        // Workload names are not unique; the id keeps same-named exports apart
        let name = format!(
            "{}-{}-{}",
            sanitize_name(&workload.name)?,
            sanitize_name(&workload.id)?,
            self.timestamp()
        );
        let path = self.artifact_path(BackupKind::Workload, &name);

        tracing::info!(workload_id = %workload.id, name = %name, "Creating workload backup");

        let pipeline = Pipeline::new()
            .pipe(
                CommandSpec::new(&self.settings.export_binary)
                    .arg("export")
                    .arg(&workload.runtime_id),
            )
            .pipe(CommandSpec::new(COMPRESSOR))
            .write_to(&path);
        self.run_into(&pipeline, &path).await?;

        let mut metadata = Map::new();
        metadata.insert("workloadId".into(), json!(workload.id));
        metadata.insert("workloadName".into(), json!(workload.name));
        metadata.insert("runtimeId".into(), json!(workload.runtime_id));
        metadata.insert("volumesIncluded".into(), json!(false));

        self.finish(BackupKind::Workload, name, path, metadata).await
    }

    /// Archives every existing directory of the configuration allow-list.
    pub async fn create_configuration_backup(&self) -> Result<Backup> {
        let mut sources = Vec::new();
        for source in &self.settings.config_sources {
            if tokio::fs::try_exists(source).await.unwrap_or(false) {
                sources.push(source.clone());
            } else {
                tracing::debug!(path = %source.display(), "Configuration source missing, skipping");
            }
        }
        if sources.is_empty() {
            return Err(OrchestratorError::NoSource(
                "none of the configuration paths exist".into(),
            ));
        }

        let name = format!("config-{}", self.timestamp());
        let path = self.artifact_path(BackupKind::Configuration, &name);
        tracing::info!(name = %name, sources = sources.len(), "Creating configuration backup");

        let archive = CommandSpec::new(ARCHIVER)
            .args(["-czf", "-"])
            .args(sources.iter().map(|p| p.display().to_string()));
        self.run_into(&Pipeline::new().pipe(archive).write_to(&path), &path)
            .await?;

        let mut metadata = Map::new();
        metadata.insert(
            "paths".into(),
            Value::Array(
                sources
                    .iter()
                    .map(|p| Value::String(p.display().to_string()))
                    .collect(),
            ),
        );

        self.finish(BackupKind::Configuration, name, path, metadata).await
    }

    /// Database and configuration backups run concurrently, then every
    /// backupable workload. Any failure removes the parts already written and
    /// fails the whole run.
    pub async fn create_full_backup(&self) -> Result<Backup> {
        let timestamp = self.timestamp();
        let name = format!("full-{timestamp}");
        tracing::info!(name = %name, "Creating full backup");

        let db_name = format!("full-db-{timestamp}");
        let (database, configuration) = tokio::join!(
            self.create_database_backup(Some(&db_name)),
            self.create_configuration_backup()
        );
        let (database, configuration) = match (database, configuration) {
            (Ok(database), Ok(configuration)) => (database, configuration),
            (database, configuration) => {
                let mut created = Vec::new();
                let mut first_error = None;
                for part in [database, configuration] {
                    match part {
                        Ok(backup) => created.push(backup),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                self.discard(&created).await;
                return Err(self.full_failed(&name, first_error));
            }
        };

        let workloads: Vec<Workload> = match self.inventory.list().await {
            Ok(all) => all.into_iter().filter(Workload::is_backupable).collect(),
            Err(e) => {
                self.discard(&[database, configuration]).await;
                return Err(self.full_failed(&name, Some(e)));
            }
        };

        let results = join_all(workloads.iter().map(|w| self.backup_workload(w))).await;
        let mut parts = vec![database.clone(), configuration.clone()];
        let mut workload_parts = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(backup) => workload_parts.push(backup),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        parts.extend(workload_parts.iter().cloned());
        if first_error.is_some() {
            self.discard(&parts).await;
            return Err(self.full_failed(&name, first_error));
        }

        let size_bytes: u64 = parts.iter().map(|b| b.size_bytes).sum();
        let mut metadata = Map::new();
        metadata.insert("database".into(), json!(database.id));
        metadata.insert("configuration".into(), json!(configuration.id));
        metadata.insert(
            "workloads".into(),
            json!(workload_parts.iter().map(|b| b.id.as_str()).collect::<Vec<_>>()),
        );
        metadata.insert("totalParts".into(), json!(parts.len()));

        let path = self.artifact_path(BackupKind::Full, &name);
        let backup = Backup {
            id: name.clone(),
            kind: BackupKind::Full,
            name: file_name(&path),
            path: path.clone(),
            size_bytes,
            created_at: self.clock.now(),
            metadata,
        };
        if let Err(e) = tokio::fs::write(&path, serde_json::to_vec_pretty(&backup)?).await {
            self.discard(&parts).await;
            return Err(self.full_failed(&name, Some(e.into())));
        }

        tracing::info!(
            name = %name,
            parts = parts.len(),
            size = %human_size(size_bytes),
            "Full backup created"
        );
        Ok(backup)
    }

    /// Scans the kind directories, newest first. Missing directories are empty.
    pub async fn list_backups(&self, kind: Option<BackupKind>) -> Result<Vec<Backup>> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => BackupKind::ALL.to_vec(),
        };

        let mut backups = Vec::new();
        for kind in kinds {
            let mut entries = match tokio::fs::read_dir(self.kind_dir(kind)).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name().to_string_lossy().to_string();
                let Some(id) = file_name.strip_suffix(kind.extension()) else {
                    continue;
                };
                let meta = entry.metadata().await?;
                if !meta.is_file() {
                    continue;
                }

                let mut backup = Backup {
                    id: id.to_string(),
                    kind,
                    name: file_name.clone(),
                    path: entry.path(),
                    size_bytes: meta.len(),
                    created_at: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| self.clock.now()),
                    metadata: Map::new(),
                };
                if kind == BackupKind::Full {
                    apply_manifest(&mut backup).await;
                }
                backups.push(backup);
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Deletes a backup by id. Deleting a full backup removes its manifest;
    /// the constituent backups are listed and retained on their own.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        let backup = self
            .list_backups(None)
            .await?
            .into_iter()
            .find(|b| b.id == backup_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("backup {backup_id}")))?;

        tokio::fs::remove_file(&backup.path).await?;
        tracing::info!(backup_id = %backup_id, kind = %backup.kind, "Backup deleted");
        Ok(())
    }

    /// Deletes every backup older than `retention_days` and returns how many
    /// were removed.
    pub async fn cleanup_old_backups(&self, retention_days: i64) -> Result<usize> {
        Ok(self.sweep(retention_days).await?.deleted)
    }

    /// Retention sweep that keeps going past individual deletion failures.
    pub async fn sweep(&self, retention_days: i64) -> Result<RetentionSweep> {
        let back = retention_days.checked_neg().ok_or_else(|| {
            OrchestratorError::InvalidInput(format!("invalid retention of {retention_days} days"))
        })?;
        let cutoff = offset_days(self.clock.now(), back)?;
        let mut outcome = RetentionSweep::default();

        for backup in self.list_backups(None).await? {
            if backup.created_at >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&backup.path).await {
                Ok(()) => {
                    tracing::debug!(backup_id = %backup.id, kind = %backup.kind, "Expired backup deleted");
                    outcome.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(backup_id = %backup.id, error = %e, "Failed to delete expired backup");
                    outcome.failed += 1;
                }
            }
        }

        tracing::info!(
            deleted = outcome.deleted,
            failed = outcome.failed,
            retention_days,
            "Backup retention sweep complete"
        );
        Ok(outcome)
    }

    pub async fn get_stats(&self) -> Result<BackupStats> {
        Ok(BackupStats::from_backups(&self.list_backups(None).await?))
    }

    fn kind_dir(&self, kind: BackupKind) -> PathBuf {
        self.settings.backup_root.join(kind.dir_name())
    }

    fn artifact_path(&self, kind: BackupKind, name: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{name}{}", kind.extension()))
    }

    /// `2024-06-01T12-00-00-000Z`
    fn timestamp(&self) -> String {
        self.clock.now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
    }

    /// Runs a pipeline that writes `path`, removing the partial file on failure.
    async fn run_into(&self, pipeline: &Pipeline, path: &Path) -> Result<()> {
        if let Err(e) = self.runner.run_pipeline(pipeline).await {
            tracing::error!(path = %path.display(), error = %e, "Backup pipeline failed");
            remove_quietly(path).await;
            return Err(e);
        }
        Ok(())
    }

    async fn finish(
        &self,
        kind: BackupKind,
        name: String,
        path: PathBuf,
        metadata: Map<String, Value>,
    ) -> Result<Backup> {
        let size_bytes = tokio::fs::metadata(&path).await?.len();
        tracing::info!(kind = %kind, name = %name, size = %human_size(size_bytes), "Backup created");

        Ok(Backup {
            id: name,
            kind,
            name: file_name(&path),
            path,
            size_bytes,
            created_at: self.clock.now(),
            metadata,
        })
    }

    async fn discard(&self, parts: &[Backup]) {
        for part in parts {
            remove_quietly(&part.path).await;
        }
    }

    fn full_failed(&self, name: &str, error: Option<OrchestratorError>) -> OrchestratorError {
        let error = error.unwrap_or_else(|| {
            OrchestratorError::Persistence("full backup failed without an error".into())
        });
        tracing::error!(name = %name, error = %error, "Full backup failed");
        error
    }
}

/// Restricts backup names to `[A-Za-z0-9._-]`; anything else becomes `-`.
pub fn sanitize_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(OrchestratorError::InvalidInput(format!(
            "invalid backup name '{name}'"
        )));
    }
    Ok(cleaned)
}

async fn apply_manifest(backup: &mut Backup) {
    let manifest = match tokio::fs::read(&backup.path).await {
        Ok(bytes) => serde_json::from_slice::<Backup>(&bytes),
        Err(e) => {
            tracing::warn!(path = %backup.path.display(), error = %e, "Unreadable full backup manifest");
            return;
        }
    };
    match manifest {
        Ok(manifest) => {
            backup.size_bytes = manifest.size_bytes;
            backup.metadata = manifest.metadata;
        }
        Err(e) => {
            tracing::warn!(path = %backup.path.display(), error = %e, "Invalid full backup manifest")
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove backup file");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn human_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}
