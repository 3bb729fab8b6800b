//! Service configuration management

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use clash_fetcher::config::normalize_clan_tag;
use clash_fetcher::FetcherConfig;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener settings
    pub server: ServerSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Game API, scheduler, storage and scoring configuration
    pub fetcher: FetcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, plain)
    pub format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "plain".to_string() }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// Load defaults, then the optional TOML file, then `CLAN_DASHBOARD_*` overrides
///
/// Nested keys use a double underscore, e.g. `CLAN_DASHBOARD_SERVER__PORT=9000`.
/// `DATABASE_URL` and `CLAN_TAG` are honoured as well so every binary shares
/// one `.env` file.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let mut builder = Config::builder()
        .add_source(Config::try_from(&ServiceConfig::default()).context("Failed to encode defaults")?);

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }

    let mut config: ServiceConfig = builder
        .add_source(
            Environment::with_prefix("CLAN_DASHBOARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to decode configuration")?;

    load_shared_env(&mut config);
    config.fetcher.api.clan_tag = normalize_clan_tag(&config.fetcher.api.clan_tag);

    validate_config(&config)?;
    Ok(config)
}

fn load_shared_env(config: &mut ServiceConfig) {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.fetcher.engine.database.url = url;
    }
    if let Ok(clan_tag) = std::env::var("CLAN_TAG") {
        config.fetcher.api.clan_tag = clan_tag;
    }
}

fn validate_config(config: &ServiceConfig) -> Result<()> {
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow::anyhow!("Invalid log level: {}", config.logging.level)),
    }

    match config.logging.format.as_str() {
        "json" | "pretty" | "plain" => {}
        _ => return Err(anyhow::anyhow!("Invalid log format: {}", config.logging.format)),
    }

    if config.server.port == 0 {
        return Err(anyhow::anyhow!("Invalid server port: {}", config.server.port));
    }

    config.fetcher.validate().context("Invalid fetcher configuration")?;
    Ok(())
}
