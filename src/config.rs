use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_SYMBOLS: [&str; 2] = ["AAPL", "GOOGL"];

/// Engine settings. Every field has a default, so an empty file is valid.
///
/// ```toml
/// symbols = ["ABC", "XYZ"]
/// tick_period_ms = 500
/// ticker_refresh_period_ms = 3000
/// watchdog_period_ms = 10000
/// watchdog_restart_threshold_ms = 15000
/// live = true
/// drain_crossable = false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub tick_period_ms: u64,
    pub ticker_refresh_period_ms: u64,
    pub watchdog_period_ms: u64,
    pub watchdog_restart_threshold_ms: u64,
    /// Enables the periodic ticker refresh. Off in simulation, where prices
    /// are pushed with `TradingEngine::update_ticker`.
    pub live: bool,
    /// Settle every crossable order per side per tick instead of only the best one.
    pub drain_crossable: bool,
    pub order_queue_capacity: usize,
    /// Levels per side in book snapshots.
    pub snapshot_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            tick_period_ms: 500,
            ticker_refresh_period_ms: 3_000,
            watchdog_period_ms: 10_000,
            watchdog_restart_threshold_ms: 15_000,
            live: true,
            drain_crossable: false,
            order_queue_capacity: 1024,
            snapshot_depth: 10,
        }
    }
}

impl EngineConfig {
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!(path, symbols = ?config.resolved_symbols(), "loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("tick_period_ms", self.tick_period_ms),
            ("ticker_refresh_period_ms", self.ticker_refresh_period_ms),
            ("watchdog_period_ms", self.watchdog_period_ms),
            ("watchdog_restart_threshold_ms", self.watchdog_restart_threshold_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.watchdog_restart_threshold_ms <= self.tick_period_ms {
            return Err(ConfigError::Invalid(
                "watchdog_restart_threshold_ms must exceed tick_period_ms".to_string(),
            ));
        }
        if self.order_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "order_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid("symbols must not be blank".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ConfigError::Invalid(format!("symbol {dup} is listed twice")));
        }
        Ok(())
    }

    /// Configured symbols, or the default set when none are given.
    pub fn resolved_symbols(&self) -> Vec<String> {
        if self.symbols.is_empty() {
            DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
        } else {
            self.symbols.clone()
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn ticker_refresh_period(&self) -> Duration {
        Duration::from_millis(self.ticker_refresh_period_ms)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_millis(self.watchdog_period_ms)
    }

    pub fn watchdog_restart_threshold(&self) -> Duration {
        Duration::from_millis(self.watchdog_restart_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_reference_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.tick_period(), Duration::from_millis(500));
        assert_eq!(config.watchdog_period(), Duration::from_secs(10));
        assert_eq!(config.watchdog_restart_threshold(), Duration::from_secs(15));
        assert_eq!(config.ticker_refresh_period(), Duration::from_secs(3));
        assert!(config.live);
        assert!(!config.drain_crossable);
        assert_eq!(config.resolved_symbols(), vec!["AAPL", "GOOGL"]);
    }

    #[test]
    fn test_parse_explicit_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            symbols = ["ABC"]
            tick_period_ms = 100
            live = false
            drain_crossable = true
            "#,
        )
        .unwrap();
        assert_eq!(config.resolved_symbols(), vec!["ABC"]);
        assert_eq!(config.tick_period_ms, 100);
        assert!(!config.live);
        assert!(config.drain_crossable);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("tick_period_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("tick_period_ms = 20000"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str(r#"symbols = ["ABC", "XYZ", "ABC"]"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::with_symbols(["ABC", "ABC"]).validate(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("/nonexistent/engine.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
