use crate::crypto::{EncryptionCodec, SecretMap};
use crate::utils::errors::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateState {
    Unissued,
    Issued,
    Active,
    Revoked,
}

/// Certificate fields of a domain record in the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCertificate {
    pub domain_id: String,
    pub domain_name: String,
    pub ssl_enabled: bool,
    /// Encrypted bundle; the only persisted form of certificate material
    pub ssl_certificate: Option<String>,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub ssl_auto_renew: bool,
    pub revoked: bool,
}

impl DomainCertificate {
    pub fn unissued(domain_id: impl Into<String>, domain_name: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            domain_name: domain_name.into(),
            ssl_enabled: false,
            ssl_certificate: None,
            ssl_expires_at: None,
            ssl_auto_renew: false,
            revoked: false,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> CertificateState {
        if self.revoked {
            return CertificateState::Revoked;
        }
        if self.ssl_certificate.is_none() {
            return CertificateState::Unissued;
        }
        match self.ssl_expires_at {
            Some(expires_at) if self.ssl_enabled && now < expires_at => CertificateState::Active,
            _ => CertificateState::Issued,
        }
    }

    /// Whether the renewal scan should pick this record up.
    pub fn is_due_for_renewal(&self, before: DateTime<Utc>) -> bool {
        self.ssl_enabled
            && self.ssl_auto_renew
            && self.ssl_expires_at.is_some_and(|expires_at| expires_at <= before)
    }

    pub fn expiry_status(&self, now: DateTime<Utc>, soon_days: i64) -> Option<ExpiryStatus> {
        self.ssl_expires_at
            .map(|expires_at| ExpiryStatus::compute(expires_at, now, soon_days))
    }
}

/// Display-oriented view of a certificate's remaining lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryStatus {
    pub days_until_expiry: i64,
    pub expired: bool,
    pub expiring_soon: bool,
}

impl ExpiryStatus {
    pub fn compute(expires_at: DateTime<Utc>, now: DateTime<Utc>, soon_days: i64) -> Self {
        let days = days_until_expiry(expires_at, now);
        Self {
            days_until_expiry: days,
            expired: days < 0,
            expiring_soon: days < soon_days,
        }
    }
}

/// `floor((expires_at - now) / 1 day)`, counted in milliseconds.
pub fn days_until_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_milliseconds().div_euclid(MS_PER_DAY)
}

/// Output of a successful issuance or renewal. The paths point at the ACME
/// client's live directory and are only read once, by `persist`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub domain: String,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
    pub fullchain_path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// Decrypted certificate material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CertificateBundle {
    pub certificate: String,
    pub private_key: String,
    pub chain: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate", &format_args!("{} bytes", self.certificate.len()))
            .field("private_key", &"[REDACTED]")
            .field("chain", &format_args!("{} bytes", self.chain.len()))
            .finish()
    }
}

impl CertificateBundle {
    pub fn to_secret_map(&self) -> SecretMap {
        let mut map = SecretMap::new();
        map.insert("certificate".into(), self.certificate.clone());
        map.insert("privateKey".into(), self.private_key.clone());
        map.insert("chain".into(), self.chain.clone());
        map
    }

    pub fn from_secret_map(mut map: SecretMap) -> Result<Self> {
        let mut take = |key: &str| {
            map.remove(key).ok_or_else(|| {
                OrchestratorError::Decryption(format!("certificate bundle is missing '{key}'"))
            })
        };
        let certificate = take("certificate")?;
        let private_key = take("privateKey")?;
        let chain = map.remove("chain").unwrap_or_default();
        map.values_mut().for_each(Zeroize::zeroize);

        Ok(Self {
            certificate,
            private_key,
            chain,
        })
    }
}

impl EncryptionCodec {
    pub fn encrypt_certificate(&self, bundle: &CertificateBundle) -> Result<String> {
        let mut map = bundle.to_secret_map();
        let encrypted = self.encrypt_secret_map(&map);
        map.values_mut().for_each(Zeroize::zeroize);
        encrypted
    }

    pub fn decrypt_certificate(&self, encoded: &str) -> Result<CertificateBundle> {
        CertificateBundle::from_secret_map(self.decrypt_secret_map(encoded)?)
    }
}

/// One line of the periodic expiry report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryReportEntry {
    pub domain_id: String,
    pub domain_name: String,
    pub expires_at: DateTime<Utc>,
    pub status: ExpiryStatus,
    pub auto_renew: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn issued(expires_in: Duration) -> DomainCertificate {
        DomainCertificate {
            ssl_enabled: true,
            ssl_certificate: Some("aa:bb:cc:dd".into()),
            ssl_expires_at: Some(now() + expires_in),
            ssl_auto_renew: true,
            ..DomainCertificate::unissued("d1", "example.com")
        }
    }

    #[test]
    fn test_days_until_expiry_floors() {
        assert_eq!(days_until_expiry(now() + Duration::hours(47), now()), 1);
        assert_eq!(days_until_expiry(now() + Duration::days(30), now()), 30);
        assert_eq!(days_until_expiry(now() - Duration::hours(1), now()), -1);
        assert_eq!(days_until_expiry(now() - Duration::days(2), now()), -2);
    }

    #[test]
    fn test_expiry_status() {
        let status = ExpiryStatus::compute(now() + Duration::days(10), now(), 30);
        assert!(status.expiring_soon);
        assert!(!status.expired);

        let status = ExpiryStatus::compute(now() + Duration::days(45), now(), 30);
        assert!(!status.expiring_soon);

        let status = ExpiryStatus::compute(now() - Duration::minutes(5), now(), 30);
        assert!(status.expired);
    }

    #[test]
    fn test_state_derivation() {
        let unissued = DomainCertificate::unissued("d1", "example.com");
        assert_eq!(unissued.state(now()), CertificateState::Unissued);

        assert_eq!(issued(Duration::days(10)).state(now()), CertificateState::Active);
        assert_eq!(issued(-Duration::days(1)).state(now()), CertificateState::Issued);

        let disabled = DomainCertificate {
            ssl_enabled: false,
            ..issued(Duration::days(10))
        };
        assert_eq!(disabled.state(now()), CertificateState::Issued);

        let revoked = DomainCertificate {
            revoked: true,
            ..issued(Duration::days(10))
        };
        assert_eq!(revoked.state(now()), CertificateState::Revoked);
    }

    #[test]
    fn test_due_for_renewal() {
        let cutoff = now() + Duration::days(30);
        assert!(issued(Duration::days(10)).is_due_for_renewal(cutoff));
        assert!(!issued(Duration::days(40)).is_due_for_renewal(cutoff));

        let manual = DomainCertificate {
            ssl_auto_renew: false,
            ..issued(Duration::days(5))
        };
        assert!(!manual.is_due_for_renewal(cutoff));
    }

    #[test]
    fn test_bundle_secret_map_roundtrip() {
        let bundle = CertificateBundle {
            certificate: "CERT".into(),
            private_key: "KEY".into(),
            chain: "CHAIN".into(),
        };
        let restored = CertificateBundle::from_secret_map(bundle.to_secret_map()).unwrap();
        assert_eq!(restored, bundle);
        assert!(!format!("{restored:?}").contains("KEY"));
    }

    #[test]
    fn test_bundle_missing_key() {
        let mut map = SecretMap::new();
        map.insert("certificate".into(), "CERT".into());
        let err = CertificateBundle::from_secret_map(map).unwrap_err();
        assert!(matches!(err, OrchestratorError::Decryption(_)));
    }
}
