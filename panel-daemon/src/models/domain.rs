use chrono::{DateTime, Utc};
use panel_core::ssl::DomainCertificate;
use rusqlite::{params, Connection, Row};

const COLUMNS: &str =
    "id, name, ssl_enabled, ssl_certificate, ssl_expires_at, ssl_auto_renew, ssl_revoked";

fn row_to_certificate(row: &Row) -> rusqlite::Result<DomainCertificate> {
    Ok(DomainCertificate {
        domain_id: row.get("id")?,
        domain_name: row.get("name")?,
        ssl_enabled: row.get("ssl_enabled")?,
        ssl_certificate: row.get("ssl_certificate")?,
        ssl_expires_at: row.get("ssl_expires_at")?,
        ssl_auto_renew: row.get("ssl_auto_renew")?,
        revoked: row.get("ssl_revoked")?,
    })
}

pub fn create(conn: &Connection, id: &str, name: &str) -> anyhow::Result<DomainCertificate> {
    conn.execute(
        "INSERT INTO domains (id, name) VALUES (?1, ?2)",
        params![id, name],
    )?;
    find_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created domain"))
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<DomainCertificate>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM domains WHERE id = ?"))?;
    let mut rows = stmt.query_map(params![id], row_to_certificate)?;
    Ok(rows.next().transpose()?)
}

/// Enabled domains holding a certificate.
pub fn find_enabled(conn: &Connection) -> anyhow::Result<Vec<DomainCertificate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM domains
         WHERE ssl_enabled = 1 AND ssl_certificate IS NOT NULL
         ORDER BY name"
    ))?;
    let rows = stmt.query_map([], row_to_certificate)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_due_for_renewal(
    conn: &Connection,
    before: DateTime<Utc>,
) -> anyhow::Result<Vec<DomainCertificate>> {
    // Timestamps are compared as values, not as stored text
    Ok(find_enabled(conn)?
        .into_iter()
        .filter(|d| d.is_due_for_renewal(before))
        .collect())
}

pub fn save_certificate(
    conn: &Connection,
    id: &str,
    encrypted_bundle: &str,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let updated = conn.execute(
        "UPDATE domains
         SET ssl_enabled = 1, ssl_auto_renew = 1, ssl_revoked = 0,
             ssl_certificate = ?2, ssl_expires_at = ?3, updated_at = datetime('now')
         WHERE id = ?1",
        params![id, encrypted_bundle, expires_at],
    )?;
    Ok(updated > 0)
}

pub fn clear_certificate(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let updated = conn.execute(
        "UPDATE domains
         SET ssl_enabled = 0, ssl_revoked = 1, ssl_certificate = NULL,
             ssl_expires_at = NULL, updated_at = datetime('now')
         WHERE id = ?1",
        params![id],
    )?;
    Ok(updated > 0)
}

pub fn load_bundle(conn: &Connection, id: &str) -> anyhow::Result<Option<String>> {
    Ok(find_by_id(conn, id)?.and_then(|d| d.ssl_certificate))
}

pub fn set_auto_renew(conn: &Connection, id: &str, auto_renew: bool) -> anyhow::Result<bool> {
    let updated = conn.execute(
        "UPDATE domains SET ssl_auto_renew = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, auto_renew],
    )?;
    Ok(updated > 0)
}
