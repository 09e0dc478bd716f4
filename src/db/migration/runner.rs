use std::path::{Path, PathBuf};

use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use rusqlite::Connection;
use strum::Display;

use super::{Migration, MigrationRegistry};
use crate::db::backup::BackupManager;
use crate::db::version;
use crate::db::Database;
use crate::error::LabdashError;

/// Where the runner is in its lifecycle.
///
/// `Idle -> CheckingStatus -> {UpToDate | Downgrade | NeedsMigration}` and
/// `NeedsMigration -> BackingUp -> Applying -> {Completed | RolledBack}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MigrationState {
    Idle,
    CheckingStatus,
    UpToDate,
    Downgrade,
    NeedsMigration,
    BackingUp,
    Applying,
    Completed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub needs_migration: bool,
    pub is_downgrade: bool,
    pub current_version: u32,
    pub expected_version: u32,
}

/// Result of a migration run.
///
/// Integrity failures (downgrade, a migration that errors) are reported here rather than
/// as an `Err`, so startup can decide to halt with the message.
#[derive(Debug)]
pub struct MigrationOutcome {
    pub success: bool,
    pub migrated_from: u32,
    pub migrated_to: u32,
    pub error: Option<LabdashError>,
    pub backup: Option<PathBuf>,
    pub restored: bool,
}

impl MigrationOutcome {
    fn unchanged(version: u32) -> Self {
        Self {
            success: true,
            migrated_from: version,
            migrated_to: version,
            error: None,
            backup: None,
            restored: false,
        }
    }
}

pub struct MigrationRunner {
    registry: MigrationRegistry,
    backups: BackupManager,
    state: MigrationState,
}

impl MigrationRunner {
    pub fn new(registry: MigrationRegistry, backups: BackupManager) -> Self {
        Self {
            registry,
            backups,
            state: MigrationState::Idle,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Compares the stored schema version against the version this build expects.
    pub fn check_status(&mut self, conn: &Connection) -> Result<MigrationStatus, LabdashError> {
        self.state = MigrationState::CheckingStatus;

        let current_version = version::current_version(conn)?;
        let expected_version = self.registry.expected_version();

        // Driven by what is pending, so an empty registry never reports work to do
        let is_downgrade = current_version > expected_version;
        let status = MigrationStatus {
            needs_migration: !is_downgrade
                && self.registry.pending_after(current_version).next().is_some(),
            is_downgrade,
            current_version,
            expected_version,
        };

        self.state = if status.is_downgrade {
            MigrationState::Downgrade
        } else if status.needs_migration {
            MigrationState::NeedsMigration
        } else {
            MigrationState::UpToDate
        };

        debug!(
            "Schema status: current v{}, expected v{} ({})",
            current_version, expected_version, self.state
        );

        Ok(status)
    }

    /// Brings the database up to the expected version.
    ///
    /// Each pending migration runs in its own transaction together with its version bump.
    /// The first failure stops the batch and the pre-migration backup is restored. An `Err`
    /// is returned only when the schema version cannot be read at all.
    pub fn run_migrations(&mut self, db: &mut Database) -> Result<MigrationOutcome, LabdashError> {
        let status = self.check_status(db.conn())?;
        let current = status.current_version;

        if status.is_downgrade {
            let err = LabdashError::Downgrade {
                current,
                expected: status.expected_version,
                backup_dir: self.backups.backup_dir().to_path_buf(),
            };
            error!("{}", err);
            return Ok(MigrationOutcome {
                success: false,
                error: Some(err),
                ..MigrationOutcome::unchanged(current)
            });
        }

        let pending: Vec<Migration> = self.registry.pending_after(current).copied().collect();
        if pending.is_empty() {
            self.state = MigrationState::UpToDate;
            debug!("Schema is up to date at v{}", current);
            return Ok(MigrationOutcome::unchanged(current));
        }

        info!(
            "Migrating database schema from v{} to v{} ({} migration(s))",
            current,
            status.expected_version,
            pending.len()
        );

        self.state = MigrationState::BackingUp;
        let backup = self.backups.create_backup(current);
        if backup.is_none() {
            warn!("Proceeding with migration without a backup");
        }

        self.state = MigrationState::Applying;
        let mut last_successful_version = current;

        for migration in &pending {
            if let Err(e) = Self::apply_migration(db.conn_mut(), migration) {
                error!("{}", e);
                self.state = MigrationState::RolledBack;

                let restored = self.restore(db, backup.as_deref());

                return Ok(MigrationOutcome {
                    success: false,
                    migrated_from: current,
                    migrated_to: last_successful_version,
                    error: Some(e),
                    backup,
                    restored,
                });
            }

            last_successful_version = migration.version;
        }

        self.state = MigrationState::Completed;
        info!(
            "Database schema migrated from v{} to v{}",
            current, last_successful_version
        );

        Ok(MigrationOutcome {
            success: true,
            migrated_from: current,
            migrated_to: last_successful_version,
            error: None,
            backup,
            restored: false,
        })
    }

    fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<(), LabdashError> {
        let _tmr = timer!(Level::Debug; "MIGRATION", "v{} {}", migration.version, migration.name);
        info!("Applying migration v{}: {}", migration.version, migration.name);

        let wrap = |source: LabdashError| LabdashError::MigrationFailed {
            version: migration.version,
            name: migration.name,
            source: Box::new(source),
        };

        let tx = conn.transaction().map_err(|e| wrap(e.into()))?;
        migration.apply(&tx).map_err(wrap)?;
        version::set_version(&tx, migration.version).map_err(wrap)?;
        tx.commit().map_err(|e| wrap(e.into()))?;

        Ok(())
    }

    fn restore(&self, db: &mut Database, backup: Option<&Path>) -> bool {
        let Some(backup) = backup else {
            error!(
                "No backup was taken before this migration; manual intervention may be required"
            );
            return false;
        };

        match db.with_file_released(|_| self.backups.restore_from_backup(backup)) {
            Ok(true) => {
                info!("Database restored from {}", backup.display());
                true
            }
            Ok(false) => {
                error!(
                    "Automatic restore from {} failed; manual intervention required \
                     (backups are in {})",
                    backup.display(),
                    self.backups.backup_dir().display()
                );
                false
            }
            Err(e) => {
                error!(
                    "Automatic restore from {} failed ({}); manual intervention required \
                     (backups are in {})",
                    backup.display(),
                    e,
                    self.backups.backup_dir().display()
                );
                false
            }
        }
    }
}
