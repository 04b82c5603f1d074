use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub downstream: DownstreamConfig,
}

/// Addresses and credentials for the scheduling, path and alert services.
#[derive(Debug, Clone)]
pub struct DownstreamConfig {
    pub schedule_url: String,
    pub path_url: String,
    pub alert_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            schedule_url: "http://localhost:8000/api/schedule-manager".to_string(),
            path_url: "http://localhost:8000/api/path-manager".to_string(),
            alert_url: "http://localhost:8000/api/alert-manager".to_string(),
            token: None,
            timeout: Duration::from_millis(5000),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = DownstreamConfig::default();
        let downstream = DownstreamConfig {
            schedule_url: env::var("SCHEDULE_SERVICE_URL").unwrap_or(defaults.schedule_url),
            path_url: env::var("PATH_SERVICE_URL").unwrap_or(defaults.path_url),
            alert_url: env::var("ALERT_SERVICE_URL").unwrap_or(defaults.alert_url),
            token: non_empty_var("SERVICE_TOKEN"),
            timeout: Duration::from_millis(parse_or_default("DOWNSTREAM_TIMEOUT_MS", 5000)?),
            max_attempts: parse_or_default("DOWNSTREAM_MAX_ATTEMPTS", 3)?,
            retry_backoff: Duration::from_millis(parse_or_default(
                "DOWNSTREAM_RETRY_BACKOFF_MS",
                200,
            )?),
        };

        if downstream.max_attempts == 0 {
            return Err(AppError::Internal(
                "invalid DOWNSTREAM_MAX_ATTEMPTS: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: parse_or_default("DATABASE_MAX_CONNECTIONS", 5)?,
            downstream,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
