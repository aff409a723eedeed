// Technical indicators module
// Implements EMA/SMA, RSI, MACD, Bollinger Bands, support/resistance and ATR

pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod support_resistance;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::models::{closes, PriceBar};

pub use atr::atr;
pub use bollinger::{bollinger, BollingerSeries};
pub use macd::{macd, MacdSeries};
pub use moving_average::{ema, sma};
pub use rsi::rsi;
pub use support_resistance::{
    nearest_resistance, nearest_support, support_resistance, LevelKind, PriceBand,
};

/// Indicator values aligned with the input, `None` during warm-up
pub type Series = Vec<Option<f64>>;

pub(crate) fn check_period(period: usize) -> Result<(), IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod {
            reason: "period must be greater than zero".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn require_len(prices: &[f64], needed: usize) -> Result<(), IndicatorError> {
    if prices.len() < needed {
        return Err(IndicatorError::InsufficientData {
            needed,
            available: prices.len(),
        });
    }
    Ok(())
}

/// Latest defined value of a series
pub fn last_value(series: &Series) -> Option<f64> {
    series.last().copied().flatten()
}

/// The fixed set of indicators the engine knows how to compute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IndicatorKind {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Bollinger { period: usize, k: f64 },
    SupportResistance { lookback: usize, tolerance_pct: f64 },
    Atr { period: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorOutput {
    Line(Series),
    Macd(MacdSeries),
    Bollinger(BollingerSeries),
    Levels(Vec<PriceBand>),
}

/// Compute one indicator over a bar history
pub fn compute(kind: IndicatorKind, bars: &[PriceBar]) -> Result<IndicatorOutput, IndicatorError> {
    let prices = closes(bars);
    let output = match kind {
        IndicatorKind::Sma { period } => IndicatorOutput::Line(sma(&prices, period)?),
        IndicatorKind::Ema { period } => IndicatorOutput::Line(ema(&prices, period)?),
        IndicatorKind::Rsi { period } => IndicatorOutput::Line(rsi(&prices, period)?),
        IndicatorKind::Macd { fast, slow, signal } => {
            IndicatorOutput::Macd(macd(&prices, fast, slow, signal)?)
        }
        IndicatorKind::Bollinger { period, k } => {
            IndicatorOutput::Bollinger(bollinger(&prices, period, k)?)
        }
        IndicatorKind::SupportResistance {
            lookback,
            tolerance_pct,
        } => IndicatorOutput::Levels(support_resistance(&prices, lookback, tolerance_pct)?),
        IndicatorKind::Atr { period } => IndicatorOutput::Line(atr(bars, period)?),
    };
    Ok(output)
}

/// Indicator periods used by the strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub sr_lookback: usize,
    pub sr_tolerance_pct: f64,
    pub atr_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 12,
            ema_slow: 26,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: 2.0,
            sr_lookback: 50,
            sr_tolerance_pct: 0.005,
            atr_period: 14,
        }
    }
}

impl IndicatorConfig {
    /// Bars needed before every snapshot field (current and previous) is defined
    pub fn min_bars(&self) -> usize {
        [
            self.ema_slow,
            self.rsi_period + 2,
            self.macd_slow + self.macd_signal,
            self.bollinger_period,
            3,
        ]
        .into_iter()
        .max()
        .unwrap_or(3)
    }
}

/// Indicator values for the latest bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub prev_rsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub prev_macd_histogram: f64,
    pub bollinger_upper: f64,
    pub bollinger_middle: f64,
    pub bollinger_lower: f64,
    pub support: Option<PriceBand>,
    pub resistance: Option<PriceBand>,
    pub atr: Option<f64>,
}

fn value_at(series: &Series, index: usize, available: usize) -> Result<f64, IndicatorError> {
    series
        .get(index)
        .copied()
        .flatten()
        .ok_or(IndicatorError::InsufficientData {
            needed: available + 1,
            available,
        })
}

impl IndicatorSnapshot {
    pub fn compute(bars: &[PriceBar], config: &IndicatorConfig) -> Result<Self, IndicatorError> {
        let prices = closes(bars);
        require_len(&prices, config.min_bars())?;

        let n = prices.len();
        let last = n - 1;
        let latest = &bars[last];

        let ema_fast = ema(&prices, config.ema_fast)?;
        let ema_slow = ema(&prices, config.ema_slow)?;
        let rsi_series = rsi(&prices, config.rsi_period)?;
        let macd_series = macd(
            &prices,
            config.macd_fast,
            config.macd_slow,
            config.macd_signal,
        )?;
        let bands = bollinger(&prices, config.bollinger_period, config.bollinger_k)?;
        let levels = support_resistance(&prices, config.sr_lookback, config.sr_tolerance_pct)?;

        let close = latest.close;
        let atr = atr(bars, config.atr_period)
            .ok()
            .and_then(|series| last_value(&series));

        let snapshot = Self {
            timestamp: latest.timestamp,
            close,
            ema_fast: value_at(&ema_fast, last, n)?,
            ema_slow: value_at(&ema_slow, last, n)?,
            rsi: value_at(&rsi_series, last, n)?,
            prev_rsi: value_at(&rsi_series, last - 1, n)?,
            macd_line: value_at(&macd_series.line, last, n)?,
            macd_signal: value_at(&macd_series.signal, last, n)?,
            macd_histogram: value_at(&macd_series.histogram, last, n)?,
            prev_macd_histogram: value_at(&macd_series.histogram, last - 1, n)?,
            bollinger_upper: value_at(&bands.upper, last, n)?,
            bollinger_middle: value_at(&bands.middle, last, n)?,
            bollinger_lower: value_at(&bands.lower, last, n)?,
            support: nearest_support(&levels, close).cloned(),
            resistance: nearest_resistance(&levels, close).cloned(),
            atr,
        };

        tracing::debug!(
            close = snapshot.close,
            ema_fast = snapshot.ema_fast,
            ema_slow = snapshot.ema_slow,
            rsi = snapshot.rsi,
            macd_hist = snapshot.macd_histogram,
            "Indicator snapshot"
        );

        Ok(snapshot)
    }
}
