use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error, info, warn};

use crate::config::{Config, PRODUCT_NAME};
use crate::db::backup::BackupManager;
use crate::db::migration::{MigrationRegistry, MigrationRunner};
use crate::db::{version, Database};
use crate::error::LabdashError;

#[derive(Parser)]
#[command(
    name = "labdash",
    version,
    about = "labdash: homelab dashboard database maintenance"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply pending schema migrations (default if no command specified)
    Migrate,

    /// Show the stored and expected schema versions
    Status,

    /// List registered migrations and whether each has been applied
    Migrations,

    /// Create, list or restore database backups
    Backup {
        #[command(subcommand)]
        action: BackupCommand,
    },
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Back up the database at its current schema version
    Create,

    /// List retained backups, newest first
    List,

    /// Copy a backup back over the live database
    Restore {
        /// Backup file name, as shown by `backup list`
        filename: String,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), LabdashError> {
        let args = Cli::parse();

        let config_path = match args.config {
            Some(path) => path,
            None => Config::default_config_path().ok_or_else(|| {
                LabdashError::Error("Could not determine a configuration directory".into())
            })?,
        };
        let config = Config::load_config(&config_path);

        // The handle must stay alive for log output to be flushed
        let _logger = Self::setup_logging(&config)?;
        info!("Using configuration {}", config_path.display());

        // Default to Migrate if no command specified
        let result = match args.command.unwrap_or(Command::Migrate) {
            Command::Migrate => Self::migrate(&config),
            Command::Status => Self::status(&config),
            Command::Migrations => Self::list_migrations(&config),
            Command::Backup { action } => match action {
                BackupCommand::Create => Self::create_backup(&config),
                BackupCommand::List => Self::list_backups(&config),
                BackupCommand::Restore { filename } => Self::restore_backup(&config, &filename),
            },
        };

        if let Err(err) = &result {
            error!("{:?}", err);
        }
        result
    }

    fn setup_logging(config: &Config) -> Result<LoggerHandle, LabdashError> {
        let logger = Logger::try_with_env_or_str(&config.logging.level)
            .map_err(|e| LabdashError::Error(format!("Invalid log level: {}", e)))?
            .format(flexi_logger::detailed_format);

        let logger = if config.logging.log_to_file {
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(config.log_dir())
                        .basename(PRODUCT_NAME),
                )
                .rotate(
                    Criterion::Size(10 * 1024 * 1024),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(5),
                )
                .duplicate_to_stderr(Duplicate::Warn)
        } else {
            logger.log_to_stderr()
        };

        logger
            .start()
            .map_err(|e| LabdashError::Error(format!("Failed to start logger: {}", e)))
    }

    fn runner(config: &Config) -> Result<MigrationRunner, LabdashError> {
        Ok(MigrationRunner::new(
            MigrationRegistry::load()?,
            BackupManager::from_config(config),
        ))
    }

    fn migrate(config: &Config) -> Result<(), LabdashError> {
        let mut db = Database::initialize(config)?;
        let mut runner = Self::runner(config)?;

        let outcome = runner.run_migrations(&mut db)?;
        debug!("Migration runner finished in state {}", runner.state());

        if outcome.success {
            if outcome.migrated_from == outcome.migrated_to {
                println!("Database is up to date (schema v{})", outcome.migrated_to);
            } else {
                println!(
                    "Migrated database from schema v{} to v{}",
                    outcome.migrated_from, outcome.migrated_to
                );
            }
            return Ok(());
        }

        if let Some(backup) = &outcome.backup {
            if outcome.restored {
                eprintln!("Database was restored from {}", backup.display());
            } else {
                eprintln!(
                    "Database could NOT be restored automatically. Restore {} manually.",
                    backup.display()
                );
            }
        }

        Err(outcome
            .error
            .unwrap_or_else(|| LabdashError::Error("Migration failed".into())))
    }

    fn status(config: &Config) -> Result<(), LabdashError> {
        let db = Database::initialize(config)?;
        let mut runner = Self::runner(config)?;
        let status = runner.check_status(db.conn())?;

        if let Some(path) = db.path() {
            println!("Database:         {}", path.display());
        }
        println!("Stored version:   {}", status.current_version);
        println!("Expected version: {}", status.expected_version);

        if status.is_downgrade {
            println!("State:            database is newer than this build (downgrade)");
        } else if status.needs_migration {
            let pending = runner.registry().pending(db.conn())?.len();
            println!("State:            {} migration(s) pending", pending);
        } else {
            println!("State:            up to date");
        }

        Ok(())
    }

    fn list_migrations(config: &Config) -> Result<(), LabdashError> {
        let db = Database::initialize(config)?;
        let registry = MigrationRegistry::load()?;
        let current = version::current_version(db.conn())?;

        for migration in registry.migrations() {
            let marker = if migration.version <= current {
                "applied"
            } else {
                "pending"
            };
            println!("v{:<4} {:<8} {}", migration.version, marker, migration.name);
        }

        Ok(())
    }

    fn create_backup(config: &Config) -> Result<(), LabdashError> {
        let db = Database::initialize(config)?;
        let current = version::current_version(db.conn())?;
        drop(db);

        match BackupManager::from_config(config).create_backup(current) {
            Some(path) => {
                println!("Created backup {}", path.display());
                Ok(())
            }
            None => Err(LabdashError::Error("Backup failed, see log for details".into())),
        }
    }

    fn list_backups(config: &Config) -> Result<(), LabdashError> {
        let backups = BackupManager::from_config(config);
        let list = backups.list_backups()?;

        if list.is_empty() {
            println!("No backups in {}", backups.backup_dir().display());
            return Ok(());
        }

        for backup in list {
            println!(
                "{:<48} {:>12} bytes  {}",
                backup.filename,
                backup.size,
                backup.created.format("%Y-%m-%d %H:%M:%S")
            );
        }

        Ok(())
    }

    fn restore_backup(config: &Config, filename: &str) -> Result<(), LabdashError> {
        let backups = BackupManager::from_config(config);
        let path = backups.resolve(filename)?;

        warn!("Restoring {} over {}", path.display(), config.db_path().display());
        if backups.restore_from_backup(&path) {
            println!("Restored database from {}", path.display());
            Ok(())
        } else {
            Err(LabdashError::Error(format!(
                "Failed to restore {}, see log for details",
                path.display()
            )))
        }
    }
}
