use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabdashError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into LabdashError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(
        "Database schema version {current} is newer than this version of labdash supports ({expected}). \
         Upgrade labdash, or restore an older backup from {}",
        .backup_dir.display()
    )]
    Downgrade {
        current: u32,
        expected: u32,
        backup_dir: PathBuf,
    },

    #[error("Migration registry contains more than one migration with version {0}")]
    DuplicateMigrationVersion(u32),

    #[error("Unsupported schema version stored in database: {0}")]
    InvalidSchemaVersion(i64),

    #[error("Migration v{version} ({name}) failed: {source}")]
    MigrationFailed {
        version: u32,
        name: &'static str,
        #[source]
        source: Box<LabdashError>,
    },

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
