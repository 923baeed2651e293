//! SQLite-backed persistence for the orchestration core.

use crate::db::connection::DbPool;
use crate::models::{domain, workload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_core::ssl::{CertificateStore, DomainCertificate};
use panel_core::utils::errors::{OrchestratorError, Result};
use panel_core::workload::{Workload, WorkloadInventory};
use rusqlite::Connection;

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Runs `f` on a pooled connection in the blocking thread pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| OrchestratorError::Persistence(e.to_string()))?
        .map_err(|e| OrchestratorError::Persistence(format!("{e:#}")))
    }

    pub async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

fn not_found(domain_id: &str) -> OrchestratorError {
    OrchestratorError::NotFound(format!("domain {domain_id}"))
}

#[async_trait]
impl CertificateStore for SqliteStore {
    async fn save_certificate(
        &self,
        domain_id: &str,
        encrypted_bundle: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = domain_id.to_string();
        let bundle = encrypted_bundle.to_string();
        let updated = self
            .with_conn(move |conn| domain::save_certificate(conn, &id, &bundle, expires_at))
            .await?;
        if !updated {
            return Err(not_found(domain_id));
        }
        Ok(())
    }

    async fn load_bundle(&self, domain_id: &str) -> Result<Option<String>> {
        let id = domain_id.to_string();
        self.with_conn(move |conn| domain::load_bundle(conn, &id)).await
    }

    async fn find_due_for_renewal(&self, before: DateTime<Utc>) -> Result<Vec<DomainCertificate>> {
        self.with_conn(move |conn| domain::find_due_for_renewal(conn, before))
            .await
    }

    async fn find_enabled(&self) -> Result<Vec<DomainCertificate>> {
        self.with_conn(domain::find_enabled).await
    }

    async fn clear_certificate(&self, domain_id: &str) -> Result<()> {
        let id = domain_id.to_string();
        let updated = self
            .with_conn(move |conn| domain::clear_certificate(conn, &id))
            .await?;
        if !updated {
            return Err(not_found(domain_id));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadInventory for SqliteStore {
    async fn get(&self, workload_id: &str) -> Result<Option<Workload>> {
        let id = workload_id.to_string();
        self.with_conn(move |conn| workload::find_by_id(conn, &id)).await
    }

    async fn list(&self) -> Result<Vec<Workload>> {
        self.with_conn(workload::find_all).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use chrono::{Duration, TimeZone};
    use panel_core::ssl::CertificateState;
    use panel_core::workload::WorkloadStatus;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SqliteStore {
        let pool = create_pool(&dir.path().join("panel.db")).unwrap();
        migrate(&pool).unwrap();
        SqliteStore::new(pool)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_certificate_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .with_conn(|conn| domain::create(conn, "d1", "example.com").map(|_| ()))
            .await
            .unwrap();

        let expires = now() + Duration::days(90);
        store.save_certificate("d1", "aa:bb:cc:dd", expires).await.unwrap();

        assert_eq!(store.load_bundle("d1").await.unwrap().as_deref(), Some("aa:bb:cc:dd"));
        let enabled = store.find_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].ssl_expires_at, Some(expires));
        assert!(enabled[0].ssl_auto_renew);
        assert_eq!(enabled[0].state(now()), CertificateState::Active);

        store.clear_certificate("d1").await.unwrap();
        let cleared = store
            .with_conn(|conn| domain::find_by_id(conn, "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared.state(now()), CertificateState::Revoked);
        assert!(store.load_bundle("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_domain_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store
            .save_certificate("missing", "x", now())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_due_for_renewal_filters() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .with_conn(|conn| {
                for (id, name) in [("d1", "a.example.com"), ("d2", "b.example.com"), ("d3", "c.example.com")] {
                    domain::create(conn, id, name)?;
                }
                Ok(())
            })
            .await
            .unwrap();
        store.save_certificate("d1", "x", now() + Duration::days(10)).await.unwrap();
        store.save_certificate("d2", "x", now() + Duration::days(40)).await.unwrap();
        store.save_certificate("d3", "x", now() + Duration::days(5)).await.unwrap();
        store
            .with_conn(|conn| domain::set_auto_renew(conn, "d3", false))
            .await
            .unwrap();

        let due = store
            .find_due_for_renewal(now() + Duration::days(30))
            .await
            .unwrap();
        let ids: Vec<&str> = due.iter().map(|d| d.domain_id.as_str()).collect();
        assert_eq!(ids, vec!["d1"]);
    }

    #[tokio::test]
    async fn test_workload_inventory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .with_conn(|conn| {
                workload::create(
                    conn,
                    &Workload {
                        id: "w1".into(),
                        name: "web".into(),
                        runtime_id: "abc".into(),
                        status: WorkloadStatus::Running,
                    },
                )?;
                workload::update_status(conn, "w1", WorkloadStatus::Exited)
            })
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, WorkloadStatus::Exited);
        assert!(!listed[0].is_backupable());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = TempDir::new().unwrap();
        store(&dir).ping().await.unwrap();
    }
}
