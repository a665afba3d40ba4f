use std::{
    env,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_DB_PATH: &str = "data/db/io_usage.db";
const DEFAULT_INCOMING_LOGS_DIR: &str = "data/logs/incoming";
const DEFAULT_ARCHIVE_LOGS_DIR: &str = "data/logs/archive";
const DEFAULT_SLURM_LOG_FILE: &str = "data/logs/slurm/slurm.log";
const DEFAULT_IO_LOG_INTERVAL_MINUTES: u64 = 10;
const DEFAULT_SLURM_INTERVAL_MINUTES: u64 = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub incoming_logs_dir: PathBuf,
    /// empty = processed files stay in the incoming directory
    pub archive_logs_dir: Option<PathBuf>,
    pub slurm_log_file: PathBuf,
    pub gpu_max_hours: f64,
    pub io_log_interval_minutes: u64,
    pub slurm_interval_minutes: u64,
}

impl Settings {
    /// Defaults, then `config/default.toml`, `config/$RUN_MODE.toml`, `config_file` and finally
    /// `APP_*` environment variables.
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("incoming_logs_dir", DEFAULT_INCOMING_LOGS_DIR)?
            .set_default("archive_logs_dir", DEFAULT_ARCHIVE_LOGS_DIR)?
            .set_default("slurm_log_file", DEFAULT_SLURM_LOG_FILE)?
            .set_default("gpu_max_hours", usage_data::gpu_hours::DEFAULT_MAX_WINDOW_HOURS)?
            .set_default("io_log_interval_minutes", DEFAULT_IO_LOG_INTERVAL_MINUTES)?
            .set_default("slurm_interval_minutes", DEFAULT_SLURM_INTERVAL_MINUTES)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false));
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::from(config_file));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("app"))
            .build()?
            .try_deserialize()?;

        if !(settings.gpu_max_hours.is_finite() && settings.gpu_max_hours > 0.0) {
            return Err(ConfigError::Message(format!(
                "gpu_max_hours must be a positive number of hours, got {}",
                settings.gpu_max_hours
            )));
        }
        Ok(settings)
    }

    pub fn archive_dir(&self) -> Option<&Path> {
        self.archive_logs_dir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}
