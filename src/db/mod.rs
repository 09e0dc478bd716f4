pub mod backup;
pub mod json_column;
pub mod migration;
pub mod schema;
pub mod version;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rusqlite::Connection;

use crate::config::Config;
use crate::error::LabdashError;

/// The single process-wide database handle.
///
/// Built once by [`Database::initialize`] during startup and passed by reference to the
/// version tracker, migration runner and backup manager. The connection can be closed and
/// reopened in place so the underlying file can be replaced by a restore.
pub struct Database {
    path: Option<PathBuf>,
    conn: Connection,
}

impl Database {
    /// Creates the data directory (if needed) and opens the database file named by `config`.
    pub fn initialize(config: &Config) -> Result<Self, LabdashError> {
        let data_dir = config.data_dir();
        if !data_dir.exists() {
            info!("Creating data directory {}", data_dir.display());
            fs::create_dir_all(data_dir)?;
        }

        Self::open(&config.db_path())
    }

    pub fn open(path: &Path) -> Result<Self, LabdashError> {
        let conn = Self::open_connection(path)?;
        info!("Database opened at: {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn,
        })
    }

    /// In-memory database with no backing file. Backups are never taken for it.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, LabdashError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { path: None, conn })
    }

    fn open_connection(path: &Path) -> Result<Connection, LabdashError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Closes the connection, runs `f` while no connection holds the file open, then reopens.
    ///
    /// The connection is reopened even if `f` reports failure. If closing fails the original
    /// connection is put back and `f` never runs. If reopening fails the error is returned and
    /// the handle is left on a detached in-memory connection.
    pub fn with_file_released<T>(
        &mut self,
        f: impl FnOnce(&Path) -> T,
    ) -> Result<T, LabdashError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| LabdashError::Error("In-memory database has no file".into()))?;

        let placeholder = Connection::open_in_memory()?;
        let conn = std::mem::replace(&mut self.conn, placeholder);
        if let Err((conn, e)) = conn.close() {
            self.conn = conn;
            return Err(e.into());
        }
        debug!("Released database file {}", path.display());

        let result = f(&path);

        self.conn = Self::open_connection(&path)?;
        debug!("Reopened database file {}", path.display());

        Ok(result)
    }
}

/// True if a table named `table` exists.
#[cfg(test)]
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, LabdashError> {
    use rusqlite::OptionalExtension;

    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// True if `table` exists and has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, LabdashError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Quotes an SQL identifier so arbitrary table and column names can be interpolated safely.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_initialize_creates_data_dir_and_file() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.database.data_dir = temp.path().join("data");

        let db = Database::initialize(&config).unwrap();
        assert!(temp.path().join("data").is_dir());
        assert!(config.db_path().exists());
        assert_eq!(db.path(), Some(config.db_path().as_path()));
    }

    #[test]
    fn test_table_and_column_exists() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch("CREATE TABLE widgets (id INTEGER PRIMARY KEY, config TEXT)")
            .unwrap();

        assert!(table_exists(db.conn(), "widgets").unwrap());
        assert!(!table_exists(db.conn(), "users").unwrap());
        assert!(column_exists(db.conn(), "widgets", "config").unwrap());
        assert!(!column_exists(db.conn(), "widgets", "layout").unwrap());
        assert!(!column_exists(db.conn(), "users", "id").unwrap());
    }

    #[test]
    fn test_with_file_released_reopens_connection() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("labdash.db");
        let mut db = Database::open(&path).unwrap();
        db.conn()
            .execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();

        let seen = db.with_file_released(|p| p.to_path_buf()).unwrap();
        assert_eq!(seen, path);

        let x: i64 = db.conn().query_row("SELECT x FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(x, 1);
    }

    #[test]
    fn test_with_file_released_reports_reopen_failure() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data");
        fs::create_dir_all(&dir).unwrap();
        let mut db = Database::open(&dir.join("labdash.db")).unwrap();

        let result = db.with_file_released(|p| fs::remove_dir_all(p.parent().unwrap()));
        assert!(result.is_err());

        // Still answers queries, just not against the missing file
        let one: i64 = db.conn().query_row("SELECT 1", [], |r| r.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_with_file_released_rejects_in_memory() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(db.with_file_released(|_| ()).is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("widgets"), "\"widgets\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
