use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sync_proto::{ManifestRecord, PathGroup};

const SELECT: &str = "SELECT version, time, description, data FROM updates";

/// Newest first; rows sharing a timestamp fall back to insertion order.
const NEWEST_FIRST: &str = "ORDER BY time DESC, rowid DESC";

fn row_to_record(row: &Row) -> rusqlite::Result<ManifestRecord> {
    let data: String = row.get("data")?;
    let groups: Vec<PathGroup> = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(ManifestRecord {
        version: row.get("version")?,
        time: row.get("time")?,
        description: row.get("description")?,
        groups,
    })
}

/// Insert a new record. Returns `false` if the version already exists.
pub fn insert(conn: &Connection, record: &ManifestRecord) -> anyhow::Result<bool> {
    let data = serde_json::to_string(&record.groups)?;
    let inserted = conn.execute(
        "INSERT INTO updates (version, time, description, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(version) DO NOTHING",
        params![record.version, record.time, record.description, data],
    )?;
    Ok(inserted == 1)
}

/// Update time and description, and the groups when given.
/// Returns `false` if the version does not exist.
pub fn update(
    conn: &Connection,
    version: &str,
    time: &str,
    description: &str,
    groups: Option<&[PathGroup]>,
) -> anyhow::Result<bool> {
    let updated = match groups {
        Some(groups) => {
            let data = serde_json::to_string(groups)?;
            conn.execute(
                "UPDATE updates SET time = ?1, description = ?2, data = ?3 WHERE version = ?4",
                params![time, description, data, version],
            )?
        }
        None => conn.execute(
            "UPDATE updates SET time = ?1, description = ?2 WHERE version = ?3",
            params![time, description, version],
        )?,
    };
    Ok(updated == 1)
}

pub fn delete(conn: &Connection, version: &str) -> anyhow::Result<bool> {
    let deleted = conn.execute("DELETE FROM updates WHERE version = ?", params![version])?;
    Ok(deleted > 0)
}

pub fn delete_all(conn: &Connection) -> anyhow::Result<usize> {
    Ok(conn.execute("DELETE FROM updates", [])?)
}

pub fn find_by_version(conn: &Connection, version: &str) -> anyhow::Result<Option<ManifestRecord>> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE version = ?"))?;
    Ok(stmt
        .query_row(params![version], |row| row_to_record(row))
        .optional()?)
}

pub fn find_latest(conn: &Connection) -> anyhow::Result<Option<ManifestRecord>> {
    let mut stmt = conn.prepare(&format!("{SELECT} {NEWEST_FIRST} LIMIT 1"))?;
    Ok(stmt.query_row([], |row| row_to_record(row)).optional()?)
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<ManifestRecord>> {
    let mut stmt = conn.prepare(&format!("{SELECT} {NEWEST_FIRST}"))?;
    let rows = stmt.query_map([], |row| row_to_record(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_versions(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT version FROM updates {NEWEST_FIRST}"))?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}
