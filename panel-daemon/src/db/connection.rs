use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder().max_size(4).build(manager)?;

    // Configure pragmas on a fresh connection
    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;
         PRAGMA foreign_keys = ON;",
    )?;

    Ok(pool)
}

pub fn close_pool(pool: &DbPool) {
    // Connections close when the last pool handle drops. The database runs in
    // DELETE journal mode, so there is no WAL to checkpoint.
    if let Ok(conn) = pool.get() {
        if let Err(e) = conn.execute_batch("PRAGMA optimize") {
            tracing::warn!("PRAGMA optimize failed on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pool_uses_delete_journal() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested/panel.db");
        let pool = create_pool(&db_path).unwrap();

        let mode: String = pool
            .get()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "delete");

        close_pool(&pool);
        assert!(db_path.exists());
        assert!(!dir.path().join("nested/panel.db-wal").exists());
        assert!(!dir.path().join("nested/panel.db-journal").exists());
    }
}
