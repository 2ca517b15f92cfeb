use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::sync_service::types::{BatchPolicy, EngineConfig, RetryPolicy, WriterConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Postgres URL. Only required by commands that touch the database.
    pub db_url: Option<String>,
    /// Default: 0.0.0.0:3000
    pub bind_addr: SocketAddr,
    /// Default: 25
    pub batch_size: usize,
    /// Total attempts per sub-batch, including the first. Default: 3
    pub max_retries: u32,
    /// Default: 1000ms
    pub retry_base_delay: Duration,
    /// Default: 500ms
    pub inter_batch_delay: Duration,
    /// Default: true
    pub update_on_conflict: bool,
    /// Table hit by the health probe. Default: members
    pub health_probe_table: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary key lookup so parsing can be tested without
    /// mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            db_url,
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            batch_size: parse_or(&lookup, "SYNC_BATCH_SIZE", 25usize)?,
            max_retries: parse_or(&lookup, "SYNC_MAX_RETRIES", 3u32)?,
            retry_base_delay: Duration::from_millis(parse_or(&lookup, "SYNC_RETRY_BASE_MS", 1000u64)?),
            inter_batch_delay: Duration::from_millis(parse_or(
                &lookup,
                "SYNC_INTER_BATCH_DELAY_MS",
                500u64,
            )?),
            update_on_conflict: parse_or(&lookup, "SYNC_UPDATE_ON_CONFLICT", true)?,
            health_probe_table: lookup("HEALTH_PROBE_TABLE")
                .unwrap_or_else(|| "members".to_string()),
        })
    }

    pub fn require_db_url(&self) -> Result<&str, ConfigError> {
        self.db_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            writer: WriterConfig {
                batch_policy: BatchPolicy {
                    max_items: self.batch_size,
                },
                retry_policy: RetryPolicy {
                    max_attempts: self.max_retries,
                    base_delay: self.retry_base_delay,
                },
                inter_batch_delay: self.inter_batch_delay,
            },
            update_on_conflict: self.update_on_conflict,
            health_probe_table: self.health_probe_table.clone(),
        }
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
