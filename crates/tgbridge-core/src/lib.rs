mod app_config;
mod config;

pub use app_config::{AppConfig, IntenseFetchConfig, MqttConfig, ScheduleSource, TokenSeed};
pub use config::{load_app_config, load_app_config_from_env, load_app_config_from_file};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("no polling schedule configured: set TGTG_POLLING_SCHEDULE (or the deprecated TGTG_EVERY_N_MINUTES)")]
    MissingSchedule,

    #[error("no credentials configured: set TGTG_EMAIL or TGTG_ACCESS_TOKEN and TGTG_REFRESH_TOKEN")]
    MissingCredentials,

    #[error("failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}
