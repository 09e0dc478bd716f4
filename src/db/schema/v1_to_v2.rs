use log::info;
use rusqlite::Connection;

use crate::db::column_exists;
use crate::error::LabdashError;

/// Schema Upgrade: Version 1 → 2
///
/// Adds `widgets.layout`, the widget's grid position as JSON (`{"x":0,"y":0,"w":2,"h":2}`).
/// Existing widgets get `{}` and are placed by the UI on first load.
pub fn migrate_1_to_2(conn: &Connection) -> Result<(), LabdashError> {
    if column_exists(conn, "widgets", "layout")? {
        info!("Migration 1→2: widgets.layout already present, nothing to do");
        return Ok(());
    }

    conn.execute_batch("ALTER TABLE widgets ADD COLUMN layout TEXT NOT NULL DEFAULT '{}';")?;
    Ok(())
}
