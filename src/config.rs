use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::execution::{BrokerSettings, PaperSettings};
use crate::indicators::IndicatorConfig;
use crate::risk::RiskLimits;
use crate::strategy::SignalConfig;

pub const ENV_PREFIX: &str = "GOLDTRADER";
pub const DEFAULT_CONFIG_FILE: &str = "goldtrader.toml";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub symbol: String,
    pub poll_interval_secs: u64,
    /// Capacity of the quote queue between the price feed and the loop
    pub feed_capacity: usize,
    /// Bars kept in the rolling history
    pub history_bars: usize,
    pub signal_log_capacity: usize,
    /// CLOSED and ERROR positions kept for reporting
    pub position_history_capacity: usize,
    /// Starting balance of the paper account
    pub initial_balance: f64,
    pub indicators: IndicatorConfig,
    pub strategy: SignalConfig,
    pub risk: RiskLimits,
    pub broker: BrokerSettings,
    pub paper: PaperSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            poll_interval_secs: 60,
            feed_capacity: 256,
            history_bars: 500,
            signal_log_capacity: 100,
            position_history_capacity: 500,
            initial_balance: 10_000.0,
            indicators: IndicatorConfig::default(),
            strategy: SignalConfig::default(),
            risk: RiskLimits::default(),
            broker: BrokerSettings::default(),
            paper: PaperSettings::default(),
        }
    }
}

fn require_fraction(key: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, format!("{} is outside (0, 1]", value)))
    }
}

fn require_positive(key: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, format!("{} must be positive", value)))
    }
}

fn require_nonzero(key: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(key, "must be greater than zero"))
    } else {
        Ok(())
    }
}

impl AppConfig {
    /// Layer defaults, an optional TOML file and `GOLDTRADER__*` environment variables
    ///
    /// A missing file is skipped; the result is validated before returning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(path = %path.display(), symbol = %config.symbol, "Configuration loaded");
        Ok(config)
    }

    /// Paper broker settings with the configured starting balance
    pub fn paper_settings(&self) -> PaperSettings {
        PaperSettings {
            initial_balance: self.initial_balance,
            ..self.paper.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::invalid("symbol", "must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be greater than zero"));
        }
        require_nonzero("feed_capacity", self.feed_capacity)?;
        require_nonzero("signal_log_capacity", self.signal_log_capacity)?;
        require_nonzero("position_history_capacity", self.position_history_capacity)?;
        require_positive("initial_balance", self.initial_balance)?;

        self.validate_indicators()?;
        self.validate_strategy()?;
        self.validate_risk()?;

        if self.broker.requests_per_second == 0 {
            return Err(ConfigError::invalid("broker.requests_per_second", "must be greater than zero"));
        }
        if self.broker.call_timeout_ms == 0 {
            return Err(ConfigError::invalid("broker.call_timeout_ms", "must be greater than zero"));
        }
        require_positive("paper.starting_price", self.paper.starting_price)?;
        require_positive("paper.max_order_size", self.paper.max_order_size)?;

        Ok(())
    }

    fn validate_indicators(&self) -> Result<(), ConfigError> {
        let ind = &self.indicators;
        require_nonzero("indicators.ema_fast", ind.ema_fast)?;
        require_nonzero("indicators.rsi_period", ind.rsi_period)?;
        require_nonzero("indicators.macd_fast", ind.macd_fast)?;
        require_nonzero("indicators.macd_signal", ind.macd_signal)?;
        require_nonzero("indicators.bollinger_period", ind.bollinger_period)?;
        require_nonzero("indicators.atr_period", ind.atr_period)?;

        if ind.ema_fast >= ind.ema_slow {
            return Err(ConfigError::invalid(
                "indicators.ema_fast",
                format!("fast period {} must be below slow period {}", ind.ema_fast, ind.ema_slow),
            ));
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(ConfigError::invalid(
                "indicators.macd_fast",
                format!("fast period {} must be below slow period {}", ind.macd_fast, ind.macd_slow),
            ));
        }
        if ind.sr_lookback < 3 {
            return Err(ConfigError::invalid("indicators.sr_lookback", "must be at least 3"));
        }
        require_positive("indicators.bollinger_k", ind.bollinger_k)?;
        require_fraction("indicators.sr_tolerance_pct", ind.sr_tolerance_pct)?;

        // The rolling history must hold enough bars for the trend gate
        let needed = ind.min_bars().max(ind.ema_slow * self.strategy.higher_timeframe_factor.max(1));
        if self.history_bars < needed {
            return Err(ConfigError::invalid(
                "history_bars",
                format!("{} bars cannot warm up indicators needing {}", self.history_bars, needed),
            ));
        }
        Ok(())
    }

    fn validate_strategy(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        if !(0.0 <= s.rsi_oversold && s.rsi_oversold < s.rsi_overbought && s.rsi_overbought <= 100.0) {
            return Err(ConfigError::invalid(
                "strategy.rsi_oversold",
                format!(
                    "thresholds {}/{} must satisfy 0 <= oversold < overbought <= 100",
                    s.rsi_oversold, s.rsi_overbought
                ),
            ));
        }
        require_fraction("strategy.min_confidence", s.min_confidence)?;
        require_nonzero("strategy.higher_timeframe_factor", s.higher_timeframe_factor)?;
        require_nonzero("strategy.divergence_lookback", s.divergence_lookback)?;
        require_fraction("strategy.band_tolerance_pct", s.band_tolerance_pct)?;
        require_fraction("strategy.stop_loss_pct", s.stop_loss_pct)?;
        require_fraction("strategy.take_profit_pct", s.take_profit_pct)?;
        require_fraction("strategy.trailing_activation_pct", s.trailing_activation_pct)?;
        require_fraction("strategy.trailing_stop_pct", s.trailing_stop_pct)?;
        require_positive("strategy.atr_stop_multiplier", s.atr_stop_multiplier)?;
        require_positive("strategy.min_reward_risk", s.min_reward_risk)?;
        Ok(())
    }

    fn validate_risk(&self) -> Result<(), ConfigError> {
        let r = &self.risk;
        require_positive("risk.max_position_size", r.max_position_size)?;
        require_positive("risk.min_position_size", r.min_position_size)?;
        require_positive("risk.size_step", r.size_step)?;
        if r.min_position_size > r.max_position_size {
            return Err(ConfigError::invalid(
                "risk.min_position_size",
                format!("{} exceeds max_position_size {}", r.min_position_size, r.max_position_size),
            ));
        }
        require_fraction("risk.max_risk_per_trade_pct", r.max_risk_per_trade_pct)?;
        require_fraction("risk.max_drawdown_pct", r.max_drawdown_pct)?;
        require_positive("risk.max_daily_loss", r.max_daily_loss)?;
        require_positive("risk.max_weekly_loss", r.max_weekly_loss)?;
        require_nonzero("risk.max_concurrent_positions", r.max_concurrent_positions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.symbol, "XAUUSD");
        assert_eq!(config.strategy.rsi_oversold, 30.0);
        assert_eq!(config.risk.max_concurrent_positions, 1);
    }

    #[test]
    fn test_fast_period_must_be_below_slow() {
        let mut config = AppConfig::default();
        config.indicators.ema_fast = 26;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "indicators.ema_fast"
        ));
    }

    #[test]
    fn test_fraction_out_of_range() {
        let mut config = AppConfig::default();
        config.risk.max_drawdown_pct = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.risk.max_risk_per_trade_pct = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = AppConfig::default();
        config.feed_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_history_must_cover_warmup() {
        let mut config = AppConfig::default();
        config.history_bars = 50;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "history_bars"
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("goldtrader-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "symbol = \"XAUEUR\"\npoll_interval_secs = 5\n\n[risk]\nmax_drawdown_pct = 0.05\n\n[strategy]\nrsi_oversold = 25.0"
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.symbol, "XAUEUR");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.risk.max_drawdown_pct, 0.05);
        assert_eq!(config.strategy.rsi_oversold, 25.0);
        // Untouched values keep their defaults
        assert_eq!(config.strategy.rsi_overbought, 70.0);
        assert_eq!(config.risk.max_concurrent_positions, 1);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let path = std::env::temp_dir().join("goldtrader-does-not-exist.toml");
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.indicators, IndicatorConfig::default());
    }

    #[test]
    fn test_invalid_file_value_fails_load() {
        let path = std::env::temp_dir().join(format!("goldtrader-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[risk]\nmax_drawdown_pct = 2.0\n").unwrap();

        let result = AppConfig::load(Some(&path));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
