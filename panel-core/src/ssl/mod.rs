//! Certificate lifecycle: issue, renew and revoke through an external ACME
//! client, and keep the resulting material encrypted at rest.
//!
//! Per domain: `Unissued -> Issued/Active -> (renew) Active -> Revoked`.

pub mod models;
pub mod store;

pub use models::{
    days_until_expiry, CertificateBundle, CertificateState, DomainCertificate, ExpiryReportEntry,
    ExpiryStatus, IssuedCertificate,
};
pub use store::CertificateStore;

use crate::clock::{offset_days, Clock};
use crate::config::Config;
use crate::crypto::EncryptionCodec;
use crate::process::{CommandSpec, ProcessRunner};
use crate::utils::errors::{OrchestratorError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CERT_FILE: &str = "cert.pem";
const PRIVKEY_FILE: &str = "privkey.pem";
const FULLCHAIN_FILE: &str = "fullchain.pem";
const MAX_DOMAIN_LENGTH: usize = 253;

#[derive(Debug, Clone)]
pub struct CertificateSettings {
    pub acme_binary: String,
    /// Must match the ACME client's own config directory
    pub ssl_root: PathBuf,
    /// Assumed lifetime of an issued certificate
    pub validity_days: i64,
}

impl CertificateSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            acme_binary: config.acme.binary.clone(),
            ssl_root: config.paths.ssl_root.clone(),
            validity_days: config.acme.validity_days,
        }
    }
}

pub struct CertificateLifecycleManager {
    settings: CertificateSettings,
    runner: Arc<dyn ProcessRunner>,
    codec: Arc<EncryptionCodec>,
    store: Arc<dyn CertificateStore>,
    clock: Arc<dyn Clock>,
}

impl CertificateLifecycleManager {
    pub fn new(
        settings: CertificateSettings,
        runner: Arc<dyn ProcessRunner>,
        codec: Arc<EncryptionCodec>,
        store: Arc<dyn CertificateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            runner,
            codec,
            store,
            clock,
        }
    }

    pub fn live_dir(&self, domain: &str) -> PathBuf {
        self.settings.ssl_root.join("live").join(domain)
    }

    /// Fails with `ProcessExecution` when the ACME client is not on `PATH`.
    pub async fn ensure_client_installed(&self) -> Result<()> {
        if self.runner.is_available(&self.settings.acme_binary).await {
            return Ok(());
        }
        tracing::warn!(binary = %self.settings.acme_binary, "ACME client is not installed");
        Err(OrchestratorError::process(
            &self.settings.acme_binary,
            None,
            "ACME client not found on PATH",
        ))
    }

    pub async fn request_certificate(
        &self,
        domain: &str,
        contact_email: &str,
        use_staging_ca: bool,
    ) -> Result<IssuedCertificate> {
        validate_domain(domain)?;
        if contact_email.trim().is_empty() || contact_email.chars().any(char::is_whitespace) {
            return Err(OrchestratorError::InvalidInput(format!(
                "invalid contact email '{contact_email}'"
            )));
        }
        self.ensure_client_installed().await?;

        tracing::info!(domain = %domain, staging = use_staging_ca, "Requesting certificate");

        let mut command = CommandSpec::new(&self.settings.acme_binary).args([
            "certonly",
            "--standalone",
            "--non-interactive",
            "--agree-tos",
            "--email",
            contact_email,
            "-d",
            domain,
        ]);
        if use_staging_ca {
            command = command.arg("--staging");
        }

        let output = self.runner.run(&command).await.inspect_err(|e| {
            tracing::error!(domain = %domain, error = %e, "Certificate request failed");
        })?;
        tracing::debug!(domain = %domain, stdout = %output.stdout.trim(), "ACME client output");

        let issued = self.collect_issued(domain).await?;
        tracing::info!(domain = %domain, expires_at = %issued.expires_at, "Certificate issued");
        Ok(issued)
    }

    pub async fn renew_certificate(&self, domain: &str) -> Result<IssuedCertificate> {
        validate_domain(domain)?;
        tracing::info!(domain = %domain, "Renewing certificate");

        let command = CommandSpec::new(&self.settings.acme_binary).args([
            "renew",
            "--cert-name",
            domain,
            "--force-renewal",
        ]);
        self.runner.run(&command).await.inspect_err(|e| {
            tracing::error!(domain = %domain, error = %e, "Certificate renewal failed");
        })?;

        let renewed = self.collect_issued(domain).await?;
        tracing::info!(domain = %domain, expires_at = %renewed.expires_at, "Certificate renewed");
        Ok(renewed)
    }

    /// Never fails; a failed revocation is only logged so the caller can
    /// still disable the domain locally.
    pub async fn revoke_certificate(&self, domain: &str) -> bool {
        if let Err(e) = validate_domain(domain) {
            tracing::error!(domain = %domain, error = %e, "Refusing to revoke");
            return false;
        }

        let command = CommandSpec::new(&self.settings.acme_binary).args([
            "revoke",
            "--cert-name",
            domain,
            "--delete-after-revoke",
        ]);
        match self.runner.run(&command).await {
            Ok(_) => {
                tracing::info!(domain = %domain, "Certificate revoked");
                true
            }
            Err(e) => {
                tracing::error!(domain = %domain, error = %e, "Certificate revocation failed");
                false
            }
        }
    }

    /// Revokes with the ACME client, then clears the stored bundle whatever
    /// the revocation outcome. Returns whether the revocation itself succeeded.
    pub async fn revoke_and_disable(&self, domain_id: &str, domain_name: &str) -> Result<bool> {
        let revoked = self.revoke_certificate(domain_name).await;
        self.store.clear_certificate(domain_id).await?;
        tracing::info!(domain_id = %domain_id, domain = %domain_name, revoked, "SSL disabled");
        Ok(revoked)
    }

    /// Reads the issued PEM files, encrypts them and hands the bundle to the store.
    pub async fn persist(&self, domain_id: &str, issued: &IssuedCertificate) -> Result<()> {
        let bundle = CertificateBundle {
            certificate: tokio::fs::read_to_string(&issued.certificate_path).await?,
            private_key: tokio::fs::read_to_string(&issued.private_key_path).await?,
            chain: tokio::fs::read_to_string(&issued.fullchain_path).await?,
        };
        let encrypted = self.codec.encrypt_certificate(&bundle)?;

        self.store
            .save_certificate(domain_id, &encrypted, issued.expires_at)
            .await?;
        tracing::info!(domain_id = %domain_id, domain = %issued.domain, "Certificate stored");
        Ok(())
    }

    pub async fn retrieve(&self, domain_id: &str) -> Result<Option<CertificateBundle>> {
        match self.store.load_bundle(domain_id).await? {
            Some(encoded) => Ok(Some(self.codec.decrypt_certificate(&encoded)?)),
            None => Ok(None),
        }
    }

    /// Renews every auto-renewing certificate expiring within `within_days`.
    /// Returns how many were renewed and stored; failures are logged and skipped.
    pub async fn scan_and_renew_expiring(&self, within_days: i64) -> Result<usize> {
        let cutoff = offset_days(self.clock.now(), within_days)?;
        let due = self.store.find_due_for_renewal(cutoff).await?;
        tracing::info!(count = due.len(), within_days, "Certificates due for renewal");

        let mut renewed = 0;
        for domain in due {
            let result = match self.renew_certificate(&domain.domain_name).await {
                Ok(issued) => self.persist(&domain.domain_id, &issued).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => renewed += 1,
                Err(e) => tracing::error!(
                    domain_id = %domain.domain_id,
                    domain = %domain.domain_name,
                    error = %e,
                    "Automatic renewal failed"
                ),
            }
        }

        tracing::info!(renewed, "Certificate renewal scan complete");
        Ok(renewed)
    }

    /// Enabled certificates that are expired or expiring within `soon_days`,
    /// soonest first.
    pub async fn expiry_report(&self, soon_days: i64) -> Result<Vec<ExpiryReportEntry>> {
        let now = self.clock.now();
        let mut entries: Vec<ExpiryReportEntry> = self
            .store
            .find_enabled()
            .await?
            .into_iter()
            .filter_map(|domain| {
                let expires_at = domain.ssl_expires_at?;
                let status = ExpiryStatus::compute(expires_at, now, soon_days);
                (status.expired || status.expiring_soon).then(|| ExpiryReportEntry {
                    domain_id: domain.domain_id,
                    domain_name: domain.domain_name,
                    expires_at,
                    status,
                    auto_renew: domain.ssl_auto_renew,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.expires_at);
        Ok(entries)
    }

    async fn collect_issued(&self, domain: &str) -> Result<IssuedCertificate> {
        let live = self.live_dir(domain);
        let issued = IssuedCertificate {
            domain: domain.to_string(),
            certificate_path: live.join(CERT_FILE),
            private_key_path: live.join(PRIVKEY_FILE),
            fullchain_path: live.join(FULLCHAIN_FILE),
            expires_at: offset_days(self.clock.now(), self.settings.validity_days)?,
        };

        let mut missing = Vec::new();
        for path in [
            &issued.certificate_path,
            &issued.private_key_path,
            &issued.fullchain_path,
        ] {
            if !file_exists(path).await {
                missing.push(path.display().to_string());
            }
        }
        if !missing.is_empty() {
            return Err(OrchestratorError::Verification(format!(
                "ACME client reported success but files are missing: {}",
                missing.join(", ")
            )));
        }

        Ok(issued)
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Accepts plain DNS names: ASCII letters, digits, `-` and `.`, no empty labels.
pub fn validate_domain(domain: &str) -> Result<()> {
    let valid = !domain.is_empty()
        && domain.len() <= MAX_DOMAIN_LENGTH
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'));

    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidInput(format!(
            "invalid domain name '{domain}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::testing::{FakeRunner, MemoryCertificateStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use secrecy::Secret;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        runner: Arc<FakeRunner>,
        store: Arc<MemoryCertificateStore>,
        clock: Arc<FixedClock>,
        codec: Arc<EncryptionCodec>,
        manager: CertificateLifecycleManager,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::acme(dir.path()));
        let store = Arc::new(MemoryCertificateStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let codec = Arc::new(
            EncryptionCodec::new(Secret::new("k".repeat(32))).unwrap(),
        );
        let manager = CertificateLifecycleManager::new(
            CertificateSettings {
                acme_binary: "certbot".into(),
                ssl_root: dir.path().to_path_buf(),
                validity_days: 90,
            },
            runner.clone(),
            codec.clone(),
            store.clone(),
            clock.clone(),
        );
        Fixture {
            _dir: dir,
            runner,
            store,
            clock,
            codec,
            manager,
        }
    }

    fn active(id: &str, name: &str, expires_in: Duration, auto_renew: bool) -> DomainCertificate {
        DomainCertificate {
            ssl_enabled: true,
            ssl_certificate: Some("legacy".into()),
            ssl_expires_at: Some(now() + expires_in),
            ssl_auto_renew: auto_renew,
            ..DomainCertificate::unissued(id, name)
        }
    }

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("a-b.sub.example.com").is_ok());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("../etc").is_err());
        assert!(validate_domain("example..com").is_err());
        assert!(validate_domain("-bad.com").is_err());
        assert!(validate_domain("example.com; rm -rf /").is_err());
    }

    #[tokio::test]
    async fn test_request_builds_acme_command() {
        let f = fixture();
        let issued = f
            .manager
            .request_certificate("example.com", "ops@example.com", true)
            .await
            .unwrap();

        let commands = f.runner.commands();
        let last = commands.last().unwrap();
        assert_eq!(
            last.display(),
            "certbot certonly --standalone --non-interactive --agree-tos \
             --email ops@example.com -d example.com --staging"
        );
        assert_eq!(issued.expires_at, now() + Duration::days(90));
        assert!(issued.fullchain_path.ends_with("live/example.com/fullchain.pem"));
    }

    #[tokio::test]
    async fn test_request_without_client_fails() {
        let f = fixture();
        f.runner.set_missing("certbot");
        let err = f
            .manager
            .request_certificate("example.com", "ops@example.com", false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ProcessExecution { .. }));
    }

    #[tokio::test]
    async fn test_missing_output_files_is_verification_error() {
        let dir = TempDir::new().unwrap();
        let manager = CertificateLifecycleManager::new(
            CertificateSettings {
                acme_binary: "certbot".into(),
                ssl_root: dir.path().to_path_buf(),
                validity_days: 90,
            },
            Arc::new(FakeRunner::new()),
            Arc::new(EncryptionCodec::new(Secret::new("k".repeat(32))).unwrap()),
            Arc::new(MemoryCertificateStore::new()),
            Arc::new(FixedClock::new(now())),
        );

        let err = manager.renew_certificate("example.com").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Verification(_)));
    }

    #[tokio::test]
    async fn test_client_failure_is_process_error() {
        let f = fixture();
        f.runner.fail_program("certbot");
        let err = f.manager.renew_certificate("example.com").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ProcessExecution { .. }));
    }

    #[tokio::test]
    async fn test_persist_and_retrieve() {
        let f = fixture();
        f.store.insert(DomainCertificate::unissued("d1", "example.com"));

        let issued = f
            .manager
            .request_certificate("example.com", "ops@example.com", false)
            .await
            .unwrap();
        f.manager.persist("d1", &issued).await.unwrap();

        let record = f.store.get("d1").unwrap();
        assert!(record.ssl_enabled);
        assert!(record.ssl_auto_renew);
        assert_eq!(record.ssl_expires_at, Some(issued.expires_at));
        let stored = record.ssl_certificate.unwrap();
        assert!(crate::crypto::is_encrypted_format(&stored));
        assert!(!stored.contains("PRIVATE KEY"));

        let bundle = f.manager.retrieve("d1").await.unwrap().unwrap();
        assert_eq!(
            bundle.private_key,
            std::fs::read_to_string(&issued.private_key_path).unwrap()
        );
        assert_eq!(
            bundle.chain,
            std::fs::read_to_string(&issued.fullchain_path).unwrap()
        );
        assert_eq!(f.codec.decrypt_certificate(&stored).unwrap(), bundle);
    }

    #[tokio::test]
    async fn test_retrieve_without_bundle() {
        let f = fixture();
        f.store.insert(DomainCertificate::unissued("d1", "example.com"));
        assert!(f.manager.retrieve("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_renews_only_due_auto_renew_domains() {
        let f = fixture();
        f.store.insert(active("d1", "soon.example.com", Duration::days(10), true));
        f.store.insert(active("d2", "later.example.com", Duration::days(40), true));
        f.store.insert(active("d3", "manual.example.com", Duration::days(5), false));

        let renewed = f.manager.scan_and_renew_expiring(30).await.unwrap();
        assert_eq!(renewed, 1);

        let renewals: Vec<String> = f
            .runner
            .commands()
            .iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("renew"))
            .map(|c| c.args[2].clone())
            .collect();
        assert_eq!(renewals, vec!["soon.example.com".to_string()]);
        assert_eq!(
            f.store.get("d1").unwrap().ssl_expires_at,
            Some(now() + Duration::days(90))
        );
        assert_eq!(
            f.store.get("d2").unwrap().ssl_expires_at,
            Some(now() + Duration::days(40))
        );
    }

    #[tokio::test]
    async fn test_scan_window_out_of_range_is_rejected() {
        let f = fixture();
        f.store.insert(active("d1", "soon.example.com", Duration::days(10), true));

        for days in [i64::MAX, 200_000_000] {
            let err = f.manager.scan_and_renew_expiring(days).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::InvalidInput(_)), "{days}");
        }
        assert!(f.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_scan_continues_after_failure() {
        let f = fixture();
        f.store.insert(active("d1", "a.example.com", Duration::days(1), true));
        f.store.insert(active("d2", "b.example.com", Duration::days(2), true));
        f.runner.fail_when_arg("a.example.com");

        let renewed = f.manager.scan_and_renew_expiring(30).await.unwrap();
        assert_eq!(renewed, 1);
        assert_eq!(
            f.store.get("d2").unwrap().ssl_expires_at,
            Some(now() + Duration::days(90))
        );
    }

    #[tokio::test]
    async fn test_revoke_failure_still_disables() {
        let f = fixture();
        f.store.insert(active("d1", "example.com", Duration::days(10), true));
        f.runner.fail_program("certbot");

        let revoked = f
            .manager
            .revoke_and_disable("d1", "example.com")
            .await
            .unwrap();
        assert!(!revoked);

        let record = f.store.get("d1").unwrap();
        assert!(!record.ssl_enabled);
        assert!(record.ssl_certificate.is_none());
        assert_eq!(record.state(f.clock.now()), CertificateState::Revoked);
    }

    #[tokio::test]
    async fn test_revoke_invokes_client() {
        let f = fixture();
        assert!(f.manager.revoke_certificate("example.com").await);
        assert_eq!(
            f.runner.commands().last().unwrap().display(),
            "certbot revoke --cert-name example.com --delete-after-revoke"
        );
    }

    #[tokio::test]
    async fn test_expiry_report() {
        let f = fixture();
        f.store.insert(active("d1", "ok.example.com", Duration::days(60), true));
        f.store.insert(active("d2", "soon.example.com", Duration::days(12), true));
        f.store.insert(active("d3", "gone.example.com", -Duration::days(3), false));

        let report = f.manager.expiry_report(30).await.unwrap();
        let names: Vec<&str> = report.iter().map(|e| e.domain_name.as_str()).collect();
        assert_eq!(names, vec!["gone.example.com", "soon.example.com"]);
        assert!(report[0].status.expired);
        assert_eq!(report[1].status.days_until_expiry, 12);
    }
}
