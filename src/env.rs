use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

use crate::attendance::DEFAULT_GRACE_MINUTES;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://kinder-admin.db?mode=rwc";
pub const DEFAULT_MAIL_FROM: &str = "office@kinder-admin.local";

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialDirector {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub absence_grace_minutes: i64,
    pub session_ttl_hours: i64,
    pub scheduler_enabled: bool,
    pub scheduler_interval_secs: u64,
    pub mail_from: String,
    pub initial_director: Option<InitialDirector>,
    pub otlp_endpoint: Option<String>,
    pub otlp_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            absence_grace_minutes: DEFAULT_GRACE_MINUTES,
            session_ttl_hours: 8,
            scheduler_enabled: true,
            scheduler_interval_secs: 3600,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            initial_director: None,
            otlp_endpoint: None,
            otlp_api_key: None,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(name) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        }),
        None => Ok(default),
    }
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match non_empty(name) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                expected: "a boolean",
                value,
            }),
        },
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();

        let absence_grace_minutes = parsed(
            "ABSENCE_GRACE_MINUTES",
            "a non-negative number of minutes",
            defaults.absence_grace_minutes,
        )?;
        if absence_grace_minutes < 0 {
            return Err(ConfigError::Invalid {
                name: "ABSENCE_GRACE_MINUTES",
                expected: "a non-negative number of minutes",
                value: absence_grace_minutes.to_string(),
            });
        }

        let session_ttl_hours = parsed(
            "SESSION_TTL_HOURS",
            "a positive number of hours",
            defaults.session_ttl_hours,
        )?;
        if session_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                name: "SESSION_TTL_HOURS",
                expected: "a positive number of hours",
                value: session_ttl_hours.to_string(),
            });
        }

        let initial_director = match (
            non_empty("INITIAL_DIRECTOR_USERNAME"),
            non_empty("INITIAL_DIRECTOR_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(InitialDirector { username, password }),
            _ => None,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL").unwrap_or(defaults.database_url),
            absence_grace_minutes,
            session_ttl_hours,
            scheduler_enabled: flag("SCHEDULER_ENABLED", defaults.scheduler_enabled)?,
            scheduler_interval_secs: parsed(
                "SCHEDULER_INTERVAL_SECS",
                "a number of seconds",
                defaults.scheduler_interval_secs,
            )?
            .max(1),
            mail_from: non_empty("MAIL_FROM").unwrap_or(defaults.mail_from),
            initial_director,
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
            otlp_api_key: non_empty("OTEL_EXPORTER_OTLP_HEADERS_KEY"),
        })
    }
}
