//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested keys use
//! a `__` separator, so `SCHEDULER__INTERVAL_MS` sets `scheduler.interval_ms`.

use opsflow_scheduler::SchedulerJobConfig;
use serde::Deserialize;
use std::net::SocketAddr;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Maximum connections in the database pool.
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Address the HTTP API binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Scheduler job settings.
    #[serde(default)]
    pub scheduler: SchedulerJobConfig,
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, config::ConfigError> {
        let source = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_environment(config::Environment::default().source(Some(source)))
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/opsflow")]).expect("config");

        assert_eq!(config.listen_addr, default_listen_addr());
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.scheduler, SchedulerJobConfig::default());
        assert_eq!(config.scheduler.interval_ms, 60_000);
        assert_eq!(config.scheduler.max_concurrent_executions, 5);
    }

    #[test]
    fn nested_scheduler_settings_use_double_underscore() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/opsflow"),
            ("LISTEN_ADDR", "0.0.0.0:8080"),
            ("SCHEDULER__INTERVAL_MS", "15000"),
            ("SCHEDULER__RETRY_ATTEMPTS", "1"),
        ])
        .expect("config");

        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.scheduler.interval_ms, 15_000);
        assert_eq!(config.scheduler.retry_attempts, 1);
        assert_eq!(config.scheduler.retry_delay_ms, 5_000);
    }

    #[test]
    fn missing_database_url_fails() {
        assert!(load(&[]).is_err());
    }
}
