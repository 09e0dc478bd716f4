use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const PRODUCT_NAME: &str = "labdash";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
            log_to_file: false,
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub data_dir: PathBuf,
    pub filename: String,
}

impl DatabaseConfig {
    const DEFAULT_DATA_DIR: &str = "data";

    fn default() -> Self {
        DatabaseConfig {
            data_dir: PathBuf::from(Self::DEFAULT_DATA_DIR),
            filename: format!("{PRODUCT_NAME}.db"),
        }
    }

    fn ensure_valid(&mut self) {
        let trimmed = self.filename.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
            let default_filename = format!("{PRODUCT_NAME}.db");
            eprintln!(
                "Config error: database filename '{}' is invalid - using default of '{}'",
                self.filename, default_filename
            );
            self.filename = default_filename;
        } else {
            self.filename = trimmed.to_owned();
        }

        if self.data_dir.as_os_str().is_empty() {
            self.data_dir = PathBuf::from(Self::DEFAULT_DATA_DIR);
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub max_retained: usize,
    pub dir_name: String,
}

impl BackupConfig {
    pub const DEFAULT_MAX_RETAINED: usize = 3;
    const DEFAULT_DIR_NAME: &str = "backups";

    fn default() -> Self {
        BackupConfig {
            max_retained: Self::DEFAULT_MAX_RETAINED,
            dir_name: Self::DEFAULT_DIR_NAME.to_owned(),
        }
    }

    fn ensure_valid(&mut self) {
        if self.max_retained == 0 {
            eprintln!(
                "Config error: backups.max_retained must be at least 1 - using default of {}",
                Self::DEFAULT_MAX_RETAINED
            );
            self.max_retained = Self::DEFAULT_MAX_RETAINED;
        }

        if self.dir_name.trim().is_empty() {
            self.dir_name = Self::DEFAULT_DIR_NAME.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub backups: BackupConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            backups: BackupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    const ENV_PREFIX: &str = "LABDASH_";

    /// Location of `config.toml` in the platform's config directory, if one can be determined.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", PRODUCT_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads the configuration from defaults, then the TOML file at `config_path`, then
    /// `LABDASH_*` environment variables (nested keys separated by `__`).
    ///
    /// If the file is missing, the defaults are written to it. If it fails to parse,
    /// defaults are used. Logging is not running yet, so problems go to stderr.
    pub fn load_config(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            Self::write_default_config(config_path, &default_config);
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn write_default_config(config_path: &Path, default_config: &Config) {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                    return;
                }
            }
        }

        match toml::to_string_pretty(default_config) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.database.ensure_valid();
        self.backups.ensure_valid();
        self.logging.ensure_valid();
    }

    pub fn data_dir(&self) -> &Path {
        &self.database.data_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.database.data_dir.join(&self.database.filename)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.database.data_dir.join(&self.backups.dir_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.database.data_dir.join("logs")
    }
}
