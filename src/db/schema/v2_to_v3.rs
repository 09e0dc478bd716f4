use log::info;
use rusqlite::Connection;
use serde_json::Value;

use crate::db::json_column::add_default_to_json_column;
use crate::error::LabdashError;

/// Schema Upgrade: Version 2 → 3
///
/// Widgets gained a "show title" toggle. Every existing widget config gets
/// `display.showTitle = true`, which matches how widgets rendered before the toggle.
pub fn migrate_2_to_3(conn: &Connection) -> Result<(), LabdashError> {
    let changed =
        add_default_to_json_column(
            conn,
            "widgets",
            "config",
            "display.showTitle",
            &Value::Bool(true),
        )?;
    info!("Migration 2→3: added display.showTitle to {} widget(s)", changed);
    Ok(())
}
