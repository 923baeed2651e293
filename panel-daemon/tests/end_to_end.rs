use chrono::{Duration, TimeZone, Utc};
use panel_core::clock::FixedClock;
use panel_core::ssl::{CertificateLifecycleManager, CertificateSettings, CertificateState, CertificateStore};
use panel_core::testing::FakeRunner;
use panel_core::{Clock, EncryptionCodec};
use panel_daemon::db::connection::create_pool;
use panel_daemon::db::migrate::migrate;
use panel_daemon::models::domain;
use panel_daemon::store::SqliteStore;
use secrecy::Secret;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_issue_persist_and_renew() {
    let dir = TempDir::new().unwrap();
    let ssl_root = dir.path().join("letsencrypt");

    let pool = create_pool(&dir.path().join("panel.db")).unwrap();
    migrate(&pool).unwrap();
    let store = SqliteStore::new(pool);
    store
        .with_conn(|conn| domain::create(conn, "d1", "example.com").map(|_| ()))
        .await
        .unwrap();

    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
    let manager = CertificateLifecycleManager::new(
        CertificateSettings {
            acme_binary: "certbot".into(),
            ssl_root: ssl_root.clone(),
            validity_days: 90,
        },
        Arc::new(FakeRunner::acme(&ssl_root)),
        Arc::new(EncryptionCodec::new(Secret::new("integration-secret-value-0123456789".into())).unwrap()),
        Arc::new(store.clone()),
        clock.clone(),
    );

    let issued = manager
        .request_certificate("example.com", "admin@example.com", true)
        .await
        .unwrap();
    manager.persist("d1", &issued).await.unwrap();

    // Only ciphertext reaches the database
    let stored = store.load_bundle("d1").await.unwrap().unwrap();
    assert!(!stored.contains("BEGIN"));

    let bundle = manager.retrieve("d1").await.unwrap().unwrap();
    assert_eq!(bundle.certificate, std::fs::read_to_string(&issued.certificate_path).unwrap());
    assert_eq!(bundle.private_key, std::fs::read_to_string(&issued.private_key_path).unwrap());
    assert_eq!(bundle.chain, std::fs::read_to_string(&issued.fullchain_path).unwrap());

    let record = store
        .with_conn(|conn| domain::find_by_id(conn, "d1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state(clock.now()), CertificateState::Active);
    let first_expiry = record.ssl_expires_at.unwrap();

    // 85 days later the certificate is inside the 30-day window
    clock.advance(Duration::days(85));
    assert_eq!(manager.scan_and_renew_expiring(30).await.unwrap(), 1);

    let renewed = store
        .with_conn(|conn| domain::find_by_id(conn, "d1"))
        .await
        .unwrap()
        .unwrap();
    assert!(renewed.ssl_expires_at.unwrap() > first_expiry);
    let renewed_bundle = manager.retrieve("d1").await.unwrap().unwrap();
    assert_ne!(renewed_bundle.certificate, bundle.certificate);

    // Nothing left to renew
    assert_eq!(manager.scan_and_renew_expiring(30).await.unwrap(), 0);
}
