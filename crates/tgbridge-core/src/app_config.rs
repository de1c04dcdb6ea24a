use std::path::PathBuf;

use chrono_tz::Tz;

/// Where the polling cron expression came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSource {
    /// `TGTG_POLLING_SCHEDULE`, used verbatim.
    Cron(String),
    /// Deprecated `TGTG_EVERY_N_MINUTES`.
    EveryNMinutes(u32),
}

impl ScheduleSource {
    /// The cron expression this source stands for. The legacy interval maps
    /// to `*/N * * * *`.
    #[must_use]
    pub fn expression(&self) -> String {
        match self {
            ScheduleSource::Cron(expr) => expr.clone(),
            ScheduleSource::EveryNMinutes(n) => format!("*/{n} * * * *"),
        }
    }

    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, ScheduleSource::EveryNMinutes(_))
    }
}

/// Tokens supplied through the environment instead of a token file.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSeed {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: Option<String>,
    pub cookie: Option<String>,
}

impl std::fmt::Debug for TokenSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSeed")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("user_id", &self.user_id)
            .field("cookie", &self.cookie.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Raw intense-fetch settings. Range checks happen when a run is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntenseFetchConfig {
    pub period_of_time_minutes: u64,
    pub interval_secs: u64,
}

#[derive(Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub discovery_prefix: String,
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("discovery_prefix", &self.discovery_prefix)
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub email: Option<String>,
    pub token_seed: Option<TokenSeed>,
    pub language: String,
    pub schedule: ScheduleSource,
    pub randomize_calls: bool,
    pub cleanup: bool,
    pub intense_fetch: Option<IntenseFetchConfig>,
    pub enable_auto_intense_fetch: bool,
    pub publish_orders: bool,
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub locale: String,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub mqtt: MqttConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("email", &self.email.as_ref().map(|_| "[redacted]"))
            .field("token_seed", &self.token_seed)
            .field("language", &self.language)
            .field("schedule", &self.schedule)
            .field("randomize_calls", &self.randomize_calls)
            .field("cleanup", &self.cleanup)
            .field("intense_fetch", &self.intense_fetch)
            .field("enable_auto_intense_fetch", &self.enable_auto_intense_fetch)
            .field("publish_orders", &self.publish_orders)
            .field("data_dir", &self.data_dir)
            .field("timezone", &self.timezone)
            .field("locale", &self.locale)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("log_level", &self.log_level)
            .field("mqtt", &self.mqtt)
            .finish()
    }
}
