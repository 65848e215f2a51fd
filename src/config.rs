use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`, expected compact or json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let event_buffer_size = parse_or_default("EVENT_BUFFER_SIZE", 1024)?;
        if event_buffer_size == 0 {
            return Err(AppError::Internal(
                "invalid EVENT_BUFFER_SIZE: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            event_buffer_size,
        })
    }
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
