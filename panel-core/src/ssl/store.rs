use super::models::DomainCertificate;
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence collaborator owning the certificate fields of domain records.
///
/// Only encrypted bundles cross this boundary.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Stores a freshly issued or renewed bundle. Implementations set
    /// `ssl_enabled` and `ssl_auto_renew` and clear any revoked flag.
    async fn save_certificate(
        &self,
        domain_id: &str,
        encrypted_bundle: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn load_bundle(&self, domain_id: &str) -> Result<Option<String>>;

    /// Enabled, auto-renewing domains with `ssl_expires_at <= before`.
    async fn find_due_for_renewal(&self, before: DateTime<Utc>) -> Result<Vec<DomainCertificate>>;

    async fn find_enabled(&self) -> Result<Vec<DomainCertificate>>;

    /// Drops the bundle and expiry, disables SSL and marks the domain revoked.
    async fn clear_certificate(&self, domain_id: &str) -> Result<()>;
}
