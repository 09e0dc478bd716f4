//! Schema version tracking via SQLite's `user_version` pragma.

use rusqlite::Connection;

use crate::error::LabdashError;

/// Reads the persisted schema version. A fresh database reports 0.
pub fn current_version(conn: &Connection) -> Result<u32, LabdashError> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw).map_err(|_| LabdashError::InvalidSchemaVersion(raw))
}

/// Writes the schema version. Callers wrap this in the transaction that applied the change.
pub fn set_version(conn: &Connection, version: u32) -> Result<(), LabdashError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
