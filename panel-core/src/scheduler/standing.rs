//! The orchestrator's standing tasks.

use super::{Cadence, TaskSpec};
use crate::backup::BackupManager;
use crate::config::ScheduleConfig;
use crate::ssl::CertificateLifecycleManager;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const HEALTH_CHECK: &str = "health-check";
pub const SSL_RENEWAL: &str = "ssl-renewal";
pub const FULL_BACKUP: &str = "full-backup";
pub const BACKUP_CLEANUP: &str = "backup-cleanup";
pub const SSL_EXPIRY_REPORT: &str = "ssl-expiry-report";

/// Periodic system health check owned by the host application.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct StandingServices {
    pub health: Arc<dyn HealthProbe>,
    pub certificates: Arc<CertificateLifecycleManager>,
    pub backups: Arc<BackupManager>,
}

pub fn standing_tasks(services: StandingServices, schedule: &ScheduleConfig) -> Vec<TaskSpec> {
    let StandingServices {
        health,
        certificates,
        backups,
    } = services;

    let health_check = TaskSpec::new(
        HEALTH_CHECK,
        Cadence::Every(Duration::from_secs(schedule.health_interval_secs)),
        move || {
            let health = health.clone();
            async move { health.check().await }
        },
    )
    .run_on_start(true);

    let window = schedule.renewal_window_days;
    let renewer = certificates.clone();
    let ssl_renewal = TaskSpec::new(
        SSL_RENEWAL,
        Cadence::DailyAt {
            hour: schedule.renewal_hour,
        },
        move || {
            let certificates = renewer.clone();
            async move {
                let renewed = certificates.scan_and_renew_expiring(window).await?;
                tracing::info!(renewed, "Scheduled certificate renewal finished");
                Ok(())
            }
        },
    )
    .run_on_start(true);

    let backup_runner = backups.clone();
    let full_backup = TaskSpec::new(
        FULL_BACKUP,
        Cadence::DailyAt {
            hour: schedule.backup_hour,
        },
        move || {
            let backups = backup_runner.clone();
            async move {
                let backup = backups.create_full_backup().await?;
                tracing::info!(backup_id = %backup.id, size_bytes = backup.size_bytes, "Scheduled backup finished");
                Ok(())
            }
        },
    )
    .run_on_start(true);

    let retention_days = schedule.retention_days;
    let backup_cleanup = TaskSpec::new(
        BACKUP_CLEANUP,
        Cadence::WeeklyAt {
            weekday: schedule.cleanup_weekday,
            hour: schedule.cleanup_hour,
        },
        move || {
            let backups = backups.clone();
            async move {
                let sweep = backups.sweep(retention_days).await?;
                if sweep.failed > 0 {
                    anyhow::bail!(
                        "{} expired backups could not be deleted ({} deleted)",
                        sweep.failed,
                        sweep.deleted
                    );
                }
                Ok(())
            }
        },
    );

    let soon_days = schedule.expiring_soon_days;
    let expiry_report = TaskSpec::new(
        SSL_EXPIRY_REPORT,
        Cadence::Every(Duration::from_secs(schedule.expiry_report_interval_secs)),
        move || {
            let certificates = certificates.clone();
            async move {
                for entry in certificates.expiry_report(soon_days).await? {
                    if entry.status.expired {
                        tracing::error!(
                            domain = %entry.domain_name,
                            expires_at = %entry.expires_at,
                            auto_renew = entry.auto_renew,
                            "Certificate has expired"
                        );
                    } else {
                        tracing::warn!(
                            domain = %entry.domain_name,
                            days_left = entry.status.days_until_expiry,
                            auto_renew = entry.auto_renew,
                            "Certificate expiring soon"
                        );
                    }
                }
                Ok(())
            }
        },
    )
    .run_on_start(true);

    vec![
        health_check,
        ssl_renewal,
        full_backup,
        backup_cleanup,
        expiry_report,
    ]
}
