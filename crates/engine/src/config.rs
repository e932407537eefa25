use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::store::DatabaseConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub messaging: MessagingConfig,

    /// YAML file of workflow definitions imported at startup
    #[serde(default)]
    pub definitions_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

/// Upper bound for `SCHEDULER_LEASE_SECS` (one week)
pub const MAX_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

/// Worker pool and step execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub lease_secs: u64,
    pub max_steps_per_tick: usize,
    pub batch_size: i64,

    /// Longest chain of START_WORKFLOW launches from a root execution
    pub max_chain_depth: u32,

    /// Used by WEBHOOK steps that do not set their own timeout
    pub webhook_timeout_secs: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_secs.min(MAX_LEASE_SECS) as i64)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("SCHEDULER_WORKERS must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("SCHEDULER_POLL_INTERVAL_MS must be positive".to_string());
        }
        if self.lease_secs == 0 {
            return Err("SCHEDULER_LEASE_SECS must be positive".to_string());
        }
        if self.lease_secs > MAX_LEASE_SECS {
            return Err(format!("SCHEDULER_LEASE_SECS must be at most {}", MAX_LEASE_SECS));
        }
        if self.max_steps_per_tick == 0 {
            return Err("SCHEDULER_MAX_STEPS_PER_TICK must be at least 1".to_string());
        }
        if self.batch_size <= 0 {
            return Err("SCHEDULER_BATCH_SIZE must be at least 1".to_string());
        }
        if self.webhook_timeout_secs == 0 {
            return Err("WEBHOOK_TIMEOUT_SECS must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1000,
            lease_secs: 300,
            max_steps_per_tick: 100,
            batch_size: 16,
            max_chain_depth: 5,
            webhook_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagingConfig {
    /// Relay endpoint for SEND_MESSAGE; messages are only logged when unset
    pub url: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = EngineConfig::default();

        let config = Config {
            server: ServerConfig {
                addr: std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            },
            database: DatabaseConfig {
                sqlite_path: std::env::var("SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| DatabaseConfig::default().sqlite_path),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            engine: EngineConfig {
                workers: env_or("SCHEDULER_WORKERS", defaults.workers),
                poll_interval_ms: env_or("SCHEDULER_POLL_INTERVAL_MS", defaults.poll_interval_ms),
                lease_secs: env_or("SCHEDULER_LEASE_SECS", defaults.lease_secs),
                max_steps_per_tick: env_or("SCHEDULER_MAX_STEPS_PER_TICK", defaults.max_steps_per_tick),
                batch_size: env_or("SCHEDULER_BATCH_SIZE", defaults.batch_size),
                max_chain_depth: env_or("MAX_WORKFLOW_CHAIN_DEPTH", defaults.max_chain_depth),
                webhook_timeout_secs: env_or("WEBHOOK_TIMEOUT_SECS", defaults.webhook_timeout_secs),
            },
            messaging: MessagingConfig {
                url: std::env::var("MESSAGING_URL").ok().filter(|s| !s.trim().is_empty()),
            },
            definitions_path: std::env::var("WORKFLOW_DEFINITIONS").ok().map(PathBuf::from),
        };

        config.validate()?;

        if config.messaging.url.is_none() {
            tracing::warn!("MESSAGING_URL is not set. Messages will be logged instead of delivered.");
        }

        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.database.validate().map_err(crate::Error::Config)?;
        self.engine.validate().map_err(crate::Error::Config)?;

        if let Some(url) = &self.messaging.url {
            url::Url::parse(url)
                .map_err(|e| crate::Error::Config(format!("MESSAGING_URL is not a valid url: {}", e)))?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            messaging: MessagingConfig::default(),
            definitions_path: None,
        }
    }
}
