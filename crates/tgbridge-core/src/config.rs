use std::path::Path;

use crate::app_config::{AppConfig, IntenseFetchConfig, MqttConfig, ScheduleSource, TokenSeed};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load a `.env` file before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration after applying the given env file.
///
/// # Errors
///
/// Returns [`ConfigError::EnvFile`] if the file cannot be read, otherwise the
/// same errors as [`load_app_config_from_env`].
pub fn load_app_config_from_file(path: &Path) -> Result<AppConfig, ConfigError> {
    dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can drive it with a `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    // Empty values count as unset; docker-compose files often carry `FOO=`.
    let optional = |var: &str| -> Option<String> {
        lookup(var).ok().filter(|v| !v.trim().is_empty())
    };

    let or_default = |var: &str, default: &str| -> String {
        optional(var).unwrap_or_else(|| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str| -> Result<bool, ConfigError> {
        match optional(var) {
            None => Ok(false),
            Some(raw) => parse_flag(&raw).ok_or_else(|| invalid(var, format!("not a boolean: {raw}"))),
        }
    };

    let email = optional("TGTG_EMAIL");
    let token_seed = match (optional("TGTG_ACCESS_TOKEN"), optional("TGTG_REFRESH_TOKEN")) {
        (Some(access_token), Some(refresh_token)) => Some(TokenSeed {
            access_token,
            refresh_token,
            user_id: optional("TGTG_USER_ID"),
            cookie: optional("TGTG_COOKIE"),
        }),
        (None, None) => None,
        (Some(_), None) => {
            return Err(invalid(
                "TGTG_REFRESH_TOKEN",
                "must be set together with TGTG_ACCESS_TOKEN".to_string(),
            ))
        }
        (None, Some(_)) => {
            return Err(invalid(
                "TGTG_ACCESS_TOKEN",
                "must be set together with TGTG_REFRESH_TOKEN".to_string(),
            ))
        }
    };
    if email.is_none() && token_seed.is_none() {
        return Err(ConfigError::MissingCredentials);
    }

    let schedule = match (optional("TGTG_POLLING_SCHEDULE"), optional("TGTG_EVERY_N_MINUTES")) {
        (Some(expr), _) => ScheduleSource::Cron(expr.trim().to_string()),
        (None, Some(raw)) => {
            let minutes = raw
                .parse::<u32>()
                .map_err(|e| invalid("TGTG_EVERY_N_MINUTES", e.to_string()))?;
            if minutes == 0 {
                return Err(invalid("TGTG_EVERY_N_MINUTES", "must be at least 1".to_string()));
            }
            ScheduleSource::EveryNMinutes(minutes)
        }
        (None, None) => return Err(ConfigError::MissingSchedule),
    };

    let intense_fetch = match (
        optional("TGTG_INTENSE_FETCH_PERIOD_OF_TIME"),
        optional("TGTG_INTENSE_FETCH_INTERVAL"),
    ) {
        (None, None) => None,
        (Some(_), Some(_)) => Some(IntenseFetchConfig {
            period_of_time_minutes: parse_u64("TGTG_INTENSE_FETCH_PERIOD_OF_TIME", "0")?,
            interval_secs: parse_u64("TGTG_INTENSE_FETCH_INTERVAL", "0")?,
        }),
        (Some(_), None) => {
            return Err(invalid(
                "TGTG_INTENSE_FETCH_INTERVAL",
                "intense fetch needs both period of time and interval".to_string(),
            ))
        }
        (None, Some(_)) => {
            return Err(invalid(
                "TGTG_INTENSE_FETCH_PERIOD_OF_TIME",
                "intense fetch needs both period of time and interval".to_string(),
            ))
        }
    };

    let timezone_raw = or_default("TGTG_TIMEZONE", "UTC");
    let timezone = timezone_raw
        .parse::<chrono_tz::Tz>()
        .map_err(|e| invalid("TGTG_TIMEZONE", e.to_string()))?;

    let port_raw = or_default("MQTT_PORT", "1883");
    let port = port_raw
        .parse::<u16>()
        .map_err(|e| invalid("MQTT_PORT", e.to_string()))?;

    Ok(AppConfig {
        email,
        token_seed,
        language: or_default("TGTG_LANGUAGE", "en-GB"),
        schedule,
        randomize_calls: parse_bool("TGTG_RANDOMIZE_CALLS")?,
        cleanup: parse_bool("TGTG_CLEANUP")?,
        intense_fetch,
        enable_auto_intense_fetch: parse_bool("TGTG_ENABLE_AUTO_INTENSE_FETCH")?,
        publish_orders: parse_bool("TGTG_PUBLISH_ORDERS")?,
        data_dir: PathBuf::from(or_default("TGTG_DATA_DIR", "./data")),
        timezone,
        locale: or_default("TGTG_LOCALE", "en"),
        request_timeout_secs: parse_u64("TGTG_REQUEST_TIMEOUT_SECS", "30")?,
        log_level: or_default("TGTG_LOG_LEVEL", "info"),
        mqtt: MqttConfig {
            host: or_default("MQTT_HOST", "localhost"),
            port,
            username: optional("MQTT_USERNAME"),
            password: optional("MQTT_PASSWORD"),
            discovery_prefix: or_default("MQTT_DISCOVERY_PREFIX", "homeassistant"),
        },
    })
}

/// Parse a boolean-ish env value. Returns `None` for anything unrecognised.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
