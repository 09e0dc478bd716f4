use log::info;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db::json_column::{merge_with_defaults, remove_from_json_column, transform_json_column};
use crate::error::LabdashError;

/// Schema Upgrade: Version 3 → 4
///
/// Integration polling moved under a `polling` object:
///   - `pollSeconds` becomes `polling.intervalSeconds` (an existing nested value wins).
///   - `legacyPolling`, unused since the scheduler rewrite, is dropped.
///   - Integrations without a polling interval get the scheduler default.
pub fn migrate_3_to_4(conn: &Connection) -> Result<(), LabdashError> {
    let moved = transform_json_column(conn, "integrations", "settings", move_poll_seconds)?;
    let removed = remove_from_json_column(conn, "integrations", "settings", "legacyPolling")?;

    let defaults = polling_defaults();
    let defaulted = transform_json_column(conn, "integrations", "settings", |settings| {
        let merged = merge_with_defaults(&settings, &defaults);
        (merged != settings).then_some(merged)
    })?;

    info!(
        "Migration 3→4: moved pollSeconds in {} integration(s), removed legacyPolling from {}, \
         defaulted polling for {}",
        moved, removed, defaulted
    );
    Ok(())
}

fn polling_defaults() -> Value {
    json!({ "polling": { "intervalSeconds": 300 } })
}

fn move_poll_seconds(mut settings: Value) -> Option<Value> {
    let map = settings.as_object_mut()?;
    let seconds = map.remove("pollSeconds")?;

    let polling = map.entry("polling").or_insert_with(|| json!({}));
    if let Some(polling) = polling.as_object_mut() {
        polling.entry("intervalSeconds").or_insert(seconds);
    }

    Some(settings)
}
