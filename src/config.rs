use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Connection settings for the Postgres record store, read from the
/// environment.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance holding student_health_records")?;

        let max_connections = match std::env::var("RISK_BENCH_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("RISK_BENCH_MAX_CONNECTIONS is not a number: {raw}"))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        let acquire_timeout_secs = match std::env::var("RISK_BENCH_ACQUIRE_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("RISK_BENCH_ACQUIRE_TIMEOUT_SECS is not a number: {raw}"))?,
            Err(_) => DEFAULT_ACQUIRE_TIMEOUT_SECS,
        };

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        })
    }
}
