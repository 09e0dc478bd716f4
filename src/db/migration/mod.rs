pub mod runner;

pub use runner::{MigrationOutcome, MigrationRunner, MigrationState, MigrationStatus};

use std::collections::HashSet;

use log::{debug, error};
use rusqlite::Connection;

use super::schema;
use super::version;
use crate::error::LabdashError;

/// Function type for migration code that transforms data during schema upgrades.
pub type MigrationFn = fn(&Connection) -> Result<(), LabdashError>;

/// A single versioned schema change.
///
/// A migration may carry an SQL batch, a Rust function, or both (SQL runs first). Both
/// phases run in the same transaction as the version bump. Shipped migrations are never
/// edited: a further change is always a new migration with a higher version.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: Option<&'static str>,
    pub code_fn: Option<MigrationFn>,
}

impl Migration {
    /// SQL then code in one migration.
    #[cfg(test)]
    pub const fn new(
        version: u32,
        name: &'static str,
        sql: &'static str,
        code_fn: MigrationFn,
    ) -> Self {
        Self {
            version,
            name,
            sql: Some(sql),
            code_fn: Some(code_fn),
        }
    }

    /// Create a SQL-only migration (no Rust code needed)
    pub const fn sql_only(version: u32, name: &'static str, sql: &'static str) -> Self {
        Self {
            version,
            name,
            sql: Some(sql),
            code_fn: None,
        }
    }

    pub const fn code_only(version: u32, name: &'static str, code_fn: MigrationFn) -> Self {
        Self {
            version,
            name,
            sql: None,
            code_fn: Some(code_fn),
        }
    }

    /// Runs the migration's phases against `conn`. Does not touch the schema version.
    pub fn apply(&self, conn: &Connection) -> Result<(), LabdashError> {
        if let Some(sql) = self.sql {
            conn.execute_batch(sql)?;
        }
        if let Some(code_fn) = self.code_fn {
            code_fn(conn)?;
        }
        Ok(())
    }

    fn defect(&self) -> Option<&'static str> {
        if self.version == 0 {
            Some("version must be at least 1")
        } else if self.name.trim().is_empty() {
            Some("name is empty")
        } else if self.sql.is_none() && self.code_fn.is_none() {
            Some("no SQL or code to apply")
        } else {
            None
        }
    }
}

/// The ordered set of migrations known to this build.
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Version reported when no migrations are registered.
    pub const BASELINE_VERSION: u32 = 1;

    /// Loads the migrations shipped with labdash.
    pub fn load() -> Result<Self, LabdashError> {
        Self::from_migrations(schema::MIGRATIONS.iter().copied())
    }

    /// Builds a registry from migration definitions.
    ///
    /// Malformed definitions are logged and skipped. Two migrations claiming the same version
    /// is a build defect and fails the whole load.
    pub fn from_migrations(
        definitions: impl IntoIterator<Item = Migration>,
    ) -> Result<Self, LabdashError> {
        let mut seen = HashSet::new();
        let mut migrations = Vec::new();

        for migration in definitions {
            if let Some(defect) = migration.defect() {
                error!(
                    "Skipping malformed migration v{} ({}): {}",
                    migration.version, migration.name, defect
                );
                continue;
            }

            if !seen.insert(migration.version) {
                return Err(LabdashError::DuplicateMigrationVersion(migration.version));
            }

            migrations.push(migration);
        }

        migrations.sort_by_key(|m| m.version);
        debug!("Loaded {} migration(s)", migrations.len());

        Ok(Self { migrations })
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// The schema version this build expects: the highest registered version.
    pub fn expected_version(&self) -> u32 {
        self.migrations
            .last()
            .map(|m| m.version)
            .unwrap_or(Self::BASELINE_VERSION)
    }

    /// Migrations newer than `version`, in ascending order.
    pub fn pending_after(&self, version: u32) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(move |m| m.version > version)
    }

    /// Migrations newer than the version stored in `conn`, in ascending order.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<Migration>, LabdashError> {
        let current = version::current_version(conn)?;
        Ok(self.pending_after(current).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_conn: &Connection) -> Result<(), LabdashError> {
        Ok(())
    }

    fn versions(registry: &MigrationRegistry) -> Vec<u32> {
        registry.migrations().iter().map(|m| m.version).collect()
    }

    #[test]
    fn test_registry_sorts_by_version() {
        let registry = MigrationRegistry::from_migrations([
            Migration::code_only(3, "third", noop),
            Migration::code_only(1, "first", noop),
            Migration::sql_only(2, "second", "SELECT 1;"),
        ])
        .unwrap();

        assert_eq!(versions(&registry), vec![1, 2, 3]);
        assert_eq!(registry.expected_version(), 3);
    }

    #[test]
    fn test_malformed_migrations_are_skipped() {
        let registry = MigrationRegistry::from_migrations([
            Migration::code_only(0, "zero", noop),
            Migration::code_only(2, "  ", noop),
            Migration {
                version: 4,
                name: "empty",
                sql: None,
                code_fn: None,
            },
            Migration::code_only(1, "ok", noop),
        ])
        .unwrap();

        assert_eq!(versions(&registry), vec![1]);
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let result = MigrationRegistry::from_migrations([
            Migration::code_only(1, "a", noop),
            Migration::code_only(2, "b", noop),
            Migration::code_only(2, "c", noop),
        ]);

        assert!(matches!(
            result,
            Err(LabdashError::DuplicateMigrationVersion(2))
        ));
    }

    #[test]
    fn test_empty_registry_expects_baseline() {
        let registry = MigrationRegistry::from_migrations(Vec::new()).unwrap();
        assert_eq!(registry.expected_version(), MigrationRegistry::BASELINE_VERSION);
        assert_eq!(registry.pending_after(0).count(), 0);
    }

    #[test]
    fn test_pending_reads_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = MigrationRegistry::from_migrations([
            Migration::code_only(1, "a", noop),
            Migration::code_only(2, "b", noop),
            Migration::code_only(5, "c", noop),
        ])
        .unwrap();

        let pending: Vec<u32> = registry
            .pending(&conn)
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(pending, vec![1, 2, 5]);

        version::set_version(&conn, 2).unwrap();
        let pending: Vec<u32> = registry
            .pending(&conn)
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(pending, vec![5]);
    }

    #[test]
    fn test_apply_runs_sql_before_code() {
        fn check_table(conn: &Connection) -> Result<(), LabdashError> {
            conn.execute("INSERT INTO t (x) VALUES (2)", [])?;
            Ok(())
        }

        let conn = Connection::open_in_memory().unwrap();
        let migration = Migration::new(
            1,
            "both",
            "CREATE TABLE t (x INTEGER); INSERT INTO t (x) VALUES (1);",
            check_table,
        );
        migration.apply(&conn).unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(version::current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_shipped_registry_loads() {
        let registry = MigrationRegistry::load().unwrap();
        assert_eq!(registry.migrations().len(), schema::MIGRATIONS.len());
        assert_eq!(registry.migrations()[0].version, 1);
    }
}
