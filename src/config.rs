use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::normalizer::Protocol;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    /// Exchange instance recorded on every event, e.g. `uniswap_v3`.
    pub dex_id: String,
    pub protocol: String,
    pub insert_chunk_size: usize,
    pub max_connections: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .set_default("database_url", "postgres://localhost:5432/dex_events")?
            .set_default("dex_id", "uniswap_v3")?
            .set_default("protocol", "uniswap_v3")?
            .set_default("insert_chunk_size", 1000)?
            .set_default("max_connections", 5)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("failed to read configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol()?;
        if self.dex_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "dex_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        // 18 bind parameters per swap row; PostgreSQL caps a statement at 65535.
        if self.insert_chunk_size == 0 || self.insert_chunk_size > 3000 {
            return Err(ConfigError::Invalid {
                field: "insert_chunk_size".to_string(),
                reason: format!("{} is outside 1..=3000", self.insert_chunk_size),
            });
        }
        Ok(())
    }

    pub fn protocol(&self) -> Result<Protocol, ConfigError> {
        self.protocol.parse()
    }
}
