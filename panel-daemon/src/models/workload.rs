use panel_core::workload::{Workload, WorkloadStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

fn row_to_workload(row: &Row) -> rusqlite::Result<Workload> {
    let status: String = row.get("status")?;
    let status = status.parse::<WorkloadStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;
    Ok(Workload {
        id: row.get("id")?,
        name: row.get("name")?,
        runtime_id: row.get("runtime_id")?,
        status,
    })
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<Workload>> {
    let mut stmt =
        conn.prepare("SELECT id, name, runtime_id, status FROM workloads ORDER BY created_at")?;
    let rows = stmt.query_map([], row_to_workload)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Workload>> {
    let mut stmt =
        conn.prepare("SELECT id, name, runtime_id, status FROM workloads WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_workload)?;
    Ok(rows.next().transpose()?)
}

pub fn create(conn: &Connection, workload: &Workload) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workloads (id, name, runtime_id, status) VALUES (?1, ?2, ?3, ?4)",
        params![
            workload.id,
            workload.name,
            workload.runtime_id,
            workload.status.as_str()
        ],
    )?;
    Ok(())
}

pub fn update_status(conn: &Connection, id: &str, status: WorkloadStatus) -> anyhow::Result<bool> {
    let updated = conn.execute(
        "UPDATE workloads SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )?;
    Ok(updated > 0)
}
