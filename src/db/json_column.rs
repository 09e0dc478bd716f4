//! Helpers for migrations that reshape JSON stored in TEXT columns.
//!
//! Every row-level helper walks the whole table inside a single savepoint, so it can run
//! on its own or nested inside the transaction of the migration that calls it. A row whose
//! JSON cannot be parsed or written back is logged and skipped; the returned count covers
//! only rows that were actually changed.

use log::{debug, warn};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};

use super::quote_ident;
use crate::error::LabdashError;

const SAVEPOINT: &str = "json_column";

/// Parses `text` as JSON, returning `default` instead of failing.
pub fn safe_parse_json(text: &str, default: Value) -> Value {
    serde_json::from_str(text).unwrap_or(default)
}

/// Deep-merges `defaults` underneath `stored`.
///
/// Keys present in `stored` always win; keys only present in `defaults` are filled in.
/// Nested objects are merged recursively. Arrays and scalars are never merged element-wise.
/// A `stored` string is parsed as JSON text first (an unparseable or null value counts as `{}`).
pub fn merge_with_defaults(stored: &Value, defaults: &Value) -> Value {
    let stored = match stored {
        Value::String(text) => safe_parse_json(text, Value::Object(Map::new())),
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    merge_values(&stored, defaults)
}

fn merge_values(stored: &Value, defaults: &Value) -> Value {
    match (stored, defaults) {
        (Value::Object(stored_map), Value::Object(default_map)) => {
            let mut merged = stored_map.clone();
            for (key, default_value) in default_map {
                match merged.get_mut(key) {
                    Some(existing) => {
                        if existing.is_object() && default_value.is_object() {
                            *existing = merge_values(existing, default_value);
                        }
                    }
                    None => {
                        merged.insert(key.clone(), default_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        _ => stored.clone(),
    }
}

/// Sets `dot_path` to `default_value` in every row where the final key is absent.
///
/// Intermediate objects are created as needed. Rows with a NULL column are treated as `{}`.
pub fn add_default_to_json_column(
    conn: &Connection,
    table: &str,
    column: &str,
    dot_path: &str,
    default_value: &Value,
) -> Result<usize, LabdashError> {
    let segments = split_path(dot_path)?;

    transform_json_column(conn, table, column, |mut value| {
        match insert_if_absent(&mut value, &segments, default_value) {
            Ok(true) => Some(value),
            Ok(false) => None,
            Err(blocking_key) => {
                warn!(
                    "Cannot add '{}' to {}.{}: '{}' is not an object",
                    dot_path, table, column, blocking_key
                );
                None
            }
        }
    })
}

/// Removes the final key of `dot_path` from every row where it is present.
///
/// Rows where any intermediate segment is missing (or not an object) are left untouched.
pub fn remove_from_json_column(
    conn: &Connection,
    table: &str,
    column: &str,
    dot_path: &str,
) -> Result<usize, LabdashError> {
    let segments = split_path(dot_path)?;

    transform_json_column(conn, table, column, |mut value| {
        if remove_at_path(&mut value, &segments) {
            Some(value)
        } else {
            None
        }
    })
}

/// Passes each row's parsed JSON to `transform` and writes back whatever it returns.
///
/// Returning `None` leaves the row unchanged.
pub fn transform_json_column<F>(
    conn: &Connection,
    table: &str,
    column: &str,
    mut transform: F,
) -> Result<usize, LabdashError>
where
    F: FnMut(Value) -> Option<Value>,
{
    conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;

    match transform_rows(conn, table, column, &mut transform) {
        Ok(changed) => {
            conn.execute_batch(&format!("RELEASE {SAVEPOINT}"))?;
            debug!("Updated {} row(s) in {}.{}", changed, table, column);
            Ok(changed)
        }
        Err(e) => {
            if let Err(rollback_err) =
                conn.execute_batch(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}"))
            {
                warn!("Failed to roll back JSON column update: {}", rollback_err);
            }
            Err(e)
        }
    }
}

fn transform_rows<F>(
    conn: &Connection,
    table: &str,
    column: &str,
    transform: &mut F,
) -> Result<usize, LabdashError>
where
    F: FnMut(Value) -> Option<Value>,
{
    let table_ident = quote_ident(table);
    let column_ident = quote_ident(column);

    // Raw bytes, so a row holding invalid UTF-8 is skipped below instead of failing the read
    let rows: Vec<(i64, Option<Vec<u8>>)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, CAST({column_ident} AS TEXT) FROM {table_ident}"
        ))?;
        let rows = stmt.query_map([], |row| {
            let bytes = match row.get_ref(1)? {
                ValueRef::Null => None,
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes.to_vec()),
                ValueRef::Integer(i) => Some(i.to_string().into_bytes()),
                ValueRef::Real(f) => Some(f.to_string().into_bytes()),
            };
            Ok((row.get(0)?, bytes))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let mut update = conn.prepare(&format!(
        "UPDATE {table_ident} SET {column_ident} = ?1 WHERE rowid = ?2"
    ))?;

    let mut changed = 0;
    for (rowid, bytes) in rows {
        let text = match bytes.as_deref().map(std::str::from_utf8).transpose() {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Skipping {}.{} row {}: stored value is not valid UTF-8 ({})",
                    table, column, rowid, e
                );
                continue;
            }
        };

        let value = match text.map(str::trim) {
            None | Some("") => Value::Object(Map::new()),
            Some(text) => match serde_json::from_str(text) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        "Skipping {}.{} row {}: stored value is not valid JSON ({})",
                        table, column, rowid, e
                    );
                    continue;
                }
            },
        };

        let Some(new_value) = transform(value) else {
            continue;
        };

        let serialized = match serde_json::to_string(&new_value) {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping {}.{} row {}: {}", table, column, rowid, e);
                continue;
            }
        };

        match update.execute(params![serialized, rowid]) {
            Ok(_) => changed += 1,
            Err(e) => warn!("Skipping {}.{} row {}: write failed ({})", table, column, rowid, e),
        }
    }

    Ok(changed)
}

fn split_path(dot_path: &str) -> Result<Vec<&str>, LabdashError> {
    let segments: Vec<&str> = dot_path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(LabdashError::Error(format!(
            "Invalid JSON key path '{dot_path}'"
        )));
    }
    Ok(segments)
}

/// Walks `segments`, creating missing intermediate objects, and sets the final key if absent.
///
/// Returns whether the value changed, or the segment that blocked the walk because it holds
/// a non-object value.
fn insert_if_absent<'a>(
    value: &mut Value,
    segments: &[&'a str],
    default_value: &Value,
) -> Result<bool, &'a str> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(false);
    };

    let mut current = value;
    let mut blocking = "<root>";
    for &segment in parents {
        let map = current.as_object_mut().ok_or(blocking)?;
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        blocking = segment;
    }

    let map = current.as_object_mut().ok_or(blocking)?;
    if map.contains_key(*last) {
        return Ok(false);
    }
    map.insert(last.to_string(), default_value.clone());
    Ok(true)
}

fn remove_at_path(value: &mut Value, segments: &[&str]) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = value;
    for segment in parents {
        current = match current.get_mut(*segment) {
            Some(next) => next,
            None => return false,
        };
    }

    current
        .as_object_mut()
        .map(|map| map.remove(*last).is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn widgets_db(configs: &[Option<&str>]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE widgets (id INTEGER PRIMARY KEY, config TEXT)")
            .unwrap();
        for config in configs {
            conn.execute("INSERT INTO widgets (config) VALUES (?)", [config])
                .unwrap();
        }
        conn
    }

    fn configs(conn: &Connection) -> Vec<Option<String>> {
        let mut stmt = conn.prepare("SELECT config FROM widgets ORDER BY id").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn config_json(conn: &Connection, id: i64) -> Value {
        let text: String = conn
            .query_row("SELECT config FROM widgets WHERE id = ?", [id], |r| r.get(0))
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_safe_parse_json() {
        assert_eq!(safe_parse_json("not json", json!({"x": 1})), json!({"x": 1}));
        assert_eq!(safe_parse_json("", json!({})), json!({}));
        assert_eq!(safe_parse_json(r#"{"a":[1,2]}"#, json!({})), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_merge_stored_wins_defaults_fill() {
        let merged = merge_with_defaults(&json!({"a": 1}), &json!({"a": 2, "b": 3}));
        assert_eq!(merged, json!({"a": 1, "b": 3}));
    }

    #[test]
    fn test_merge_nested_objects() {
        let stored = json!({"display": {"showTitle": false}});
        let defaults = json!({"display": {"showTitle": true, "compact": false}, "refresh": 30});
        assert_eq!(
            merge_with_defaults(&stored, &defaults),
            json!({"display": {"showTitle": false, "compact": false}, "refresh": 30})
        );
    }

    #[test]
    fn test_merge_arrays_are_replaced_wholesale() {
        let stored = json!({"libraries": ["Movies"]});
        let defaults = json!({"libraries": ["Movies", "TV"], "tags": ["a"]});
        assert_eq!(
            merge_with_defaults(&stored, &defaults),
            json!({"libraries": ["Movies"], "tags": ["a"]})
        );
    }

    #[test]
    fn test_merge_parses_string_input() {
        let stored = json!(r#"{"a": 1}"#);
        assert_eq!(
            merge_with_defaults(&stored, &json!({"b": 2})),
            json!({"a": 1, "b": 2})
        );
        assert_eq!(
            merge_with_defaults(&json!("garbage"), &json!({"b": 2})),
            json!({"b": 2})
        );
        assert_eq!(merge_with_defaults(&Value::Null, &json!({"b": 2})), json!({"b": 2}));
    }

    #[test]
    fn test_add_default_sets_missing_key_and_is_idempotent() {
        let conn = widgets_db(&[
            Some(r#"{"title":"Plex"}"#),
            Some(r#"{"display":{"showTitle":false}}"#),
            None,
        ]);

        let changed = add_default_to_json_column(
            &conn,
            "widgets",
            "config",
            "display.showTitle",
            &json!(true),
        )
        .unwrap();
        assert_eq!(changed, 2);

        assert_eq!(
            config_json(&conn, 1),
            json!({"title": "Plex", "display": {"showTitle": true}})
        );
        assert_eq!(config_json(&conn, 2), json!({"display": {"showTitle": false}}));
        assert_eq!(config_json(&conn, 3), json!({"display": {"showTitle": true}}));

        let again = add_default_to_json_column(
            &conn,
            "widgets",
            "config",
            "display.showTitle",
            &json!(true),
        )
        .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_add_default_skips_malformed_rows() {
        let conn = widgets_db(&[Some("{not json"), Some("{}"), Some(r#"{"display": 5}"#)]);

        let changed = add_default_to_json_column(
            &conn,
            "widgets",
            "config",
            "display.showTitle",
            &json!(true),
        )
        .unwrap();
        assert_eq!(changed, 1);

        let rows = configs(&conn);
        assert_eq!(rows[0].as_deref(), Some("{not json"));
        assert_eq!(rows[2].as_deref(), Some(r#"{"display": 5}"#));
    }

    #[test]
    fn test_add_default_skips_rows_with_invalid_utf8() {
        let conn = widgets_db(&[Some("{}")]);
        conn.execute_batch(
            "INSERT INTO widgets (config) VALUES (CAST(X'7B22FF223A317D' AS TEXT));
             INSERT INTO widgets (config) VALUES ('{}');",
        )
        .unwrap();

        let changed =
            add_default_to_json_column(&conn, "widgets", "config", "a", &json!(1)).unwrap();
        assert_eq!(changed, 2);
        assert_eq!(config_json(&conn, 1), json!({"a": 1}));
        assert_eq!(config_json(&conn, 3), json!({"a": 1}));

        let raw: String = conn
            .query_row("SELECT hex(config) FROM widgets WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, "7B22FF223A317D");
    }

    #[test]
    fn test_remove_deletes_present_keys_only() {
        let conn = widgets_db(&[
            Some(r#"{"display":{"showTitle":true,"compact":true}}"#),
            Some(r#"{"title":"Sonarr"}"#),
            Some(r#"{"display":{"compact":true}}"#),
        ]);

        let changed =
            remove_from_json_column(&conn, "widgets", "config", "display.showTitle").unwrap();
        assert_eq!(changed, 1);

        assert_eq!(config_json(&conn, 1), json!({"display": {"compact": true}}));
        assert_eq!(config_json(&conn, 2), json!({"title": "Sonarr"}));
    }

    #[test]
    fn test_remove_then_add_restores_default() {
        let conn = widgets_db(&[Some(r#"{"refresh": 10}"#)]);

        remove_from_json_column(&conn, "widgets", "config", "refresh").unwrap();
        add_default_to_json_column(&conn, "widgets", "config", "refresh", &json!(60)).unwrap();
        assert_eq!(config_json(&conn, 1), json!({"refresh": 60}));

        add_default_to_json_column(&conn, "widgets", "config", "poll", &json!(5)).unwrap();
        remove_from_json_column(&conn, "widgets", "config", "poll").unwrap();
        assert_eq!(config_json(&conn, 1), json!({"refresh": 60}));
    }

    #[test]
    fn test_transform_none_leaves_row_unchanged() {
        let conn = widgets_db(&[Some(r#"{"size":"small"}"#), Some(r#"{"size":"large"}"#)]);

        let changed = transform_json_column(&conn, "widgets", "config", |mut value| {
            if value["size"] == "small" {
                value["size"] = json!("sm");
                Some(value)
            } else {
                None
            }
        })
        .unwrap();

        assert_eq!(changed, 1);
        assert_eq!(config_json(&conn, 1), json!({"size": "sm"}));
        assert_eq!(configs(&conn)[1].as_deref(), Some(r#"{"size":"large"}"#));
    }

    #[test]
    fn test_missing_table_is_an_error_and_leaves_no_savepoint() {
        let conn = widgets_db(&[]);
        assert!(remove_from_json_column(&conn, "nope", "config", "a").is_err());
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_runs_inside_outer_transaction() {
        let mut conn = widgets_db(&[Some("{}")]);
        let tx = conn.transaction().unwrap();
        add_default_to_json_column(&tx, "widgets", "config", "a", &json!(1)).unwrap();
        drop(tx);

        assert_eq!(configs(&conn)[0].as_deref(), Some("{}"));
    }

    #[test]
    fn test_invalid_path_is_rejected() {
        let conn = widgets_db(&[Some("{}")]);
        assert!(add_default_to_json_column(&conn, "widgets", "config", "a..b", &json!(1)).is_err());
        assert!(remove_from_json_column(&conn, "widgets", "config", "").is_err());
    }

    proptest! {
        #[test]
        fn prop_merge_keeps_every_stored_key(
            stored in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
            defaults in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
        ) {
            let stored_value = json!(stored);
            let merged = merge_with_defaults(&stored_value, &json!(defaults));

            for (key, value) in &stored {
                prop_assert_eq!(&merged[key.as_str()], &json!(value));
            }
            for (key, value) in &defaults {
                if !stored.contains_key(key) {
                    prop_assert_eq!(&merged[key.as_str()], &json!(value));
                }
            }
        }
    }
}
