use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use log::{error, info, warn};

use crate::config::{Config, PRODUCT_NAME};
use crate::error::LabdashError;

/// A retained database snapshot.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: DateTime<Local>,
}

/// Takes, prunes and restores file-level snapshots of the database.
///
/// Backups are plain byte copies named `<product>-v<version>-<timestamp>.db`. Only the
/// newest `max_retained` are kept.
pub struct BackupManager {
    db_path: PathBuf,
    backup_dir: PathBuf,
    max_retained: usize,
}

impl BackupManager {
    pub fn new(
        db_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        max_retained: usize,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            max_retained: max_retained.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.db_path(),
            config.backup_dir(),
            config.backups.max_retained,
        )
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies the live database into the backup directory, stamped with `version`.
    ///
    /// Returns `None` when there is no database file yet or the copy fails. A failure is
    /// logged rather than returned because backups are a best-effort safety net.
    pub fn create_backup(&self, version: u32) -> Option<PathBuf> {
        if !self.db_path.is_file() {
            info!(
                "No database at {} yet, skipping backup",
                self.db_path.display()
            );
            return None;
        }

        let backup_path = self.backup_dir.join(Self::backup_filename(version, Utc::now()));

        let copied = fs::create_dir_all(&self.backup_dir)
            .and_then(|_| fs::copy(&self.db_path, &backup_path));

        match copied {
            Ok(bytes) => {
                info!(
                    "Backed up database (schema v{}, {} bytes) to {}",
                    version,
                    bytes,
                    backup_path.display()
                );
                self.cleanup_old_backups();
                Some(backup_path)
            }
            Err(e) => {
                warn!(
                    "Failed to back up {} to {}: {}",
                    self.db_path.display(),
                    backup_path.display(),
                    e
                );
                None
            }
        }
    }

    fn backup_filename(version: u32, at: DateTime<Utc>) -> String {
        let timestamp = at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{PRODUCT_NAME}-v{version}-{timestamp}.db")
    }

    fn is_backup_filename(filename: &str) -> bool {
        filename.starts_with(&format!("{PRODUCT_NAME}-v")) && filename.ends_with(".db")
    }

    /// Deletes every backup beyond the newest `max_retained`. Failures are logged only.
    fn cleanup_old_backups(&self) {
        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(e) => {
                warn!("Failed to list backups for cleanup: {}", e);
                return;
            }
        };

        for stale in backups.iter().skip(self.max_retained) {
            match fs::remove_file(&stale.path) {
                Ok(()) => info!("Removed old backup {}", stale.filename),
                Err(e) => warn!("Failed to remove old backup {}: {}", stale.path.display(), e),
            }
        }
    }

    /// Copies `backup` back over the live database file.
    ///
    /// The caller must make sure no connection has the database open.
    pub fn restore_from_backup(&self, backup: &Path) -> bool {
        if !backup.is_file() {
            error!("Backup {} does not exist, cannot restore", backup.display());
            return false;
        }

        // Stale journal files would be replayed against the restored image
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut sidecar = self.db_path.clone().into_os_string();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                if let Err(e) = fs::remove_file(&sidecar) {
                    warn!("Failed to remove {}: {}", sidecar.display(), e);
                }
            }
        }

        match fs::copy(backup, &self.db_path) {
            Ok(_) => {
                info!(
                    "Restored database {} from {}",
                    self.db_path.display(),
                    backup.display()
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to restore {} from {}: {}",
                    self.db_path.display(),
                    backup.display(),
                    e
                );
                false
            }
        }
    }

    /// All backups, newest first. A missing backup directory means no backups.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, LabdashError> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found: Vec<(SystemTime, BackupInfo)> = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !Self::is_backup_filename(&filename) {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified()?;
            let created = metadata.created().unwrap_or(modified);

            found.push((
                modified,
                BackupInfo {
                    filename,
                    path: entry.path(),
                    size: metadata.len(),
                    created: DateTime::<Local>::from(created),
                },
            ));
        }

        found.sort_by(|(a_time, a), (b_time, b)| {
            b_time.cmp(a_time).then_with(|| b.filename.cmp(&a.filename))
        });

        Ok(found.into_iter().map(|(_, info)| info).collect())
    }

    /// Resolves a backup file name to a path inside the backup directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, LabdashError> {
        let is_plain_name = Path::new(filename)
            .file_name()
            .is_some_and(|name| name == filename);

        if !is_plain_name || !Self::is_backup_filename(filename) {
            return Err(LabdashError::Error(format!(
                "'{}' is not a backup file name",
                filename
            )));
        }

        let path = self.backup_dir.join(filename);
        if !path.is_file() {
            return Err(LabdashError::Error(format!(
                "Backup {} does not exist",
                path.display()
            )));
        }

        Ok(path)
    }
}
