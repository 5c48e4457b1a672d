//! Service configuration read from the environment (and `.env` via dotenvy).

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid { name: &'static str, expected: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat { #[default] Text, Json }

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub nats_url: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(&var, "PORT", "port number", 8083)?,
            database_url: var("DATABASE_URL"),
            db_max_connections: parsed(&var, "DB_MAX_CONNECTIONS", "connection count", 10)?,
            run_migrations: parsed(&var, "RUN_MIGRATIONS", "boolean", true)?,
            nats_url: var("NATS_URL"),
            log_format: match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("text") => LogFormat::Text,
                Some("json") => LogFormat::Json,
                Some(other) => return Err(ConfigError::Invalid { name: "LOG_FORMAT", expected: "format (text or json)", value: other.to_string() }),
            },
        })
    }

    pub fn bind_address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, expected, value }),
    }
}
