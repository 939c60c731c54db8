//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, reading API keys from the
//! environment, validating all parameters and providing clear error
//! messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{ApiKeys, OracleConfig};

pub const COINGECKO_API_KEY: &str = "COINGECKO_API_KEY";
pub const COINMARKETCAP_API_KEY: &str = "COINMARKETCAP_API_KEY";

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<OracleConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content, |key| std::env::var(key).ok())?;

  info!(
    name = %config.oracle.name,
    markets = config.markets.len(),
    update_interval_secs = config.pricing.update_interval_secs,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text; `env` resolves API keys.
pub fn parse_config(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<OracleConfig> {
  let mut config: OracleConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;

  config.api_keys = ApiKeys {
    coingecko: env(COINGECKO_API_KEY).unwrap_or_default(),
    coinmarketcap: env(COINMARKETCAP_API_KEY).unwrap_or_default(),
  };

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &OracleConfig) -> Result<()> {
  anyhow::ensure!(
    !config.markets.is_empty(),
    "At least one market must be configured"
  );

  for (i, market) in config.markets.iter().enumerate() {
    anyhow::ensure!(!market.market_id.is_empty(), "Market {} has empty market_id", i);
    anyhow::ensure!(
      !market.sources.is_empty(),
      "Market {} has no sources",
      market.market_id
    );
    anyhow::ensure!(
      market.multiplier >= 0.0,
      "Market {} multiplier must be non-negative, got {}",
      market.market_id,
      market.multiplier
    );
    anyhow::ensure!(
      market.max_use_age_secs != Some(0),
      "Market {} max_use_age_secs must be positive",
      market.market_id
    );
    for ticker in &market.sources {
      anyhow::ensure!(
        !ticker.exchange_id.is_empty() && !ticker.inst_id.is_empty(),
        "Market {} has a source with empty exchange_id or inst_id",
        market.market_id
      );
      anyhow::ensure!(
        ticker.max_use_age_secs != Some(0),
        "Market {} source {} max_use_age_secs must be positive",
        market.market_id,
        ticker.exchange_id
      );
    }
  }

  let pricing = &config.pricing;
  anyhow::ensure!(
    pricing.update_interval_secs > 0,
    "update_interval_secs must be positive"
  );
  anyhow::ensure!(
    pricing.default_max_use_age_secs > 0,
    "default_max_use_age_secs must be positive"
  );
  anyhow::ensure!(
    pricing.default_read_interval_secs > 0 && pricing.default_read_timeout_secs > 0,
    "default read interval and timeout must be positive"
  );

  for exchange in &config.exchanges {
    anyhow::ensure!(
      exchange.read_interval_secs != Some(0) && exchange.read_timeout_secs != Some(0),
      "Exchange {} read interval and timeout must be positive",
      exchange.exchange_id
    );
  }

  if config.metrics.enabled {
    anyhow::ensure!(
      !config.metrics.bind_address.is_empty(),
      "metrics bind_address must not be empty"
    );
  }

  Ok(())
}
