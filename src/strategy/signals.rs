use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;
use crate::models::{PriceBar, Side};

/// Configuration for signal generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// RSI still counts as recovering while the previous reading is within
    /// this many points of the oversold/overbought threshold
    pub rsi_recovery_margin: f64,
    /// Fraction of the four confirmations required to emit a signal
    pub min_confidence: f64,
    /// Base bars merged into one higher-timeframe bar for the trend gate
    pub higher_timeframe_factor: usize,
    /// Max distance (fraction of price) from a support/resistance band
    pub band_tolerance_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub atr_stop_multiplier: f64,
    pub min_reward_risk: f64,
    pub trailing_activation_pct: f64,
    pub trailing_stop_pct: f64,
    pub divergence_lookback: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            rsi_recovery_margin: 10.0,
            min_confidence: 0.75,
            higher_timeframe_factor: 4,
            band_tolerance_pct: 0.005,
            stop_loss_pct: 0.015,  // 1.5% of price
            take_profit_pct: 0.03, // 3% of price
            atr_stop_multiplier: 1.5,
            min_reward_risk: 1.5,
            trailing_activation_pct: 0.01,
            trailing_stop_pct: 0.005,
            divergence_lookback: 20,
        }
    }
}

/// Per-condition outcome for one candidate direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Confirmations {
    pub trend: bool,
    pub rsi: bool,
    pub macd: bool,
    pub band: bool,
}

impl Confirmations {
    pub const TOTAL: usize = 4;

    pub fn count(&self) -> usize {
        [self.trend, self.rsi, self.macd, self.band]
            .iter()
            .filter(|&&x| x)
            .count()
    }

    /// Confirmations excluding the trend gate
    pub fn momentum_count(&self) -> usize {
        [self.rsi, self.macd, self.band]
            .iter()
            .filter(|&&x| x)
            .count()
    }

    pub fn confidence(&self) -> f64 {
        self.count() as f64 / Self::TOTAL as f64
    }
}

/// Direction implied by a fast/slow EMA pair
pub fn trend_direction(ema_fast: f64, ema_slow: f64) -> Option<Side> {
    if ema_fast > ema_slow {
        Some(Side::Buy)
    } else if ema_fast < ema_slow {
        Some(Side::Sell)
    } else {
        None
    }
}

/// RSI oversold (BUY) / overbought (SELL), or turning back out of that zone
pub fn rsi_confirms(side: Side, snapshot: &IndicatorSnapshot, config: &SignalConfig) -> bool {
    let (rsi, prev) = (snapshot.rsi, snapshot.prev_rsi);
    match side {
        Side::Buy => {
            rsi < config.rsi_oversold
                || (prev <= config.rsi_oversold + config.rsi_recovery_margin && rsi > prev)
        }
        Side::Sell => {
            rsi > config.rsi_overbought
                || (prev >= config.rsi_overbought - config.rsi_recovery_margin && rsi < prev)
        }
    }
}

/// MACD histogram on the right side of zero, or turning towards it
pub fn macd_confirms(side: Side, snapshot: &IndicatorSnapshot) -> bool {
    let (hist, prev) = (snapshot.macd_histogram, snapshot.prev_macd_histogram);
    match side {
        Side::Buy => hist > 0.0 || hist > prev,
        Side::Sell => hist < 0.0 || hist < prev,
    }
}

/// Price near support for a BUY, near resistance for a SELL
pub fn band_confirms(side: Side, snapshot: &IndicatorSnapshot, config: &SignalConfig) -> bool {
    let band = match side {
        Side::Buy => snapshot.support.as_ref(),
        Side::Sell => snapshot.resistance.as_ref(),
    };
    band.map(|b| b.is_near(snapshot.close, config.band_tolerance_pct))
        .unwrap_or(false)
}

/// Evaluate every confirmation for `side`; the trend gate is assumed passed
pub fn confirmations(
    side: Side,
    snapshot: &IndicatorSnapshot,
    config: &SignalConfig,
) -> Confirmations {
    Confirmations {
        trend: true,
        rsi: rsi_confirms(side, snapshot, config),
        macd: macd_confirms(side, snapshot),
        band: band_confirms(side, snapshot, config),
    }
}

/// Merge every `factor` bars into one, aligned so the last group ends on the latest bar
///
/// Leading bars that do not fill a whole group are dropped.
pub fn aggregate_bars(bars: &[PriceBar], factor: usize) -> Vec<PriceBar> {
    if factor <= 1 {
        return bars.to_vec();
    }

    let skip = bars.len() % factor;
    bars[skip..]
        .chunks(factor)
        .map(|group| {
            let first = &group[0];
            let last = &group[group.len() - 1];
            PriceBar {
                symbol: last.symbol.clone(),
                timestamp: last.timestamp,
                open: first.open,
                high: group.iter().map(|b| b.high).fold(f64::MIN, f64::max),
                low: group.iter().map(|b| b.low).fold(f64::MAX, f64::min),
                close: last.close,
                volume: group.iter().map(|b| b.volume).sum(),
            }
        })
        .collect()
}

/// Stop and target distances in price units
pub fn protective_distances(snapshot: &IndicatorSnapshot, config: &SignalConfig) -> (f64, f64) {
    let price = snapshot.close;
    let mut stop = price * config.stop_loss_pct;
    if let Some(atr) = snapshot.atr {
        stop = stop.max(atr * config.atr_stop_multiplier);
    }
    let target = (price * config.take_profit_pct).max(stop * config.min_reward_risk);
    (stop, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{LevelKind, PriceBand};
    use chrono::{Duration, Utc};

    fn base_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            timestamp: Utc::now(),
            close: 2000.0,
            ema_fast: 1995.0,
            ema_slow: 1990.0,
            rsi: 50.0,
            prev_rsi: 50.0,
            macd_line: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            prev_macd_histogram: 0.0,
            bollinger_upper: 2020.0,
            bollinger_middle: 2000.0,
            bollinger_lower: 1980.0,
            support: None,
            resistance: None,
            atr: None,
        }
    }

    #[test]
    fn test_trend_direction() {
        assert_eq!(trend_direction(2.0, 1.0), Some(Side::Buy));
        assert_eq!(trend_direction(1.0, 2.0), Some(Side::Sell));
        assert_eq!(trend_direction(1.0, 1.0), None);
    }

    #[test]
    fn test_rsi_oversold_confirms_buy() {
        let config = SignalConfig::default();
        let snapshot = IndicatorSnapshot {
            rsi: 25.0,
            prev_rsi: 27.0,
            ..base_snapshot()
        };
        assert!(rsi_confirms(Side::Buy, &snapshot, &config));
        assert!(!rsi_confirms(Side::Sell, &snapshot, &config));
    }

    #[test]
    fn test_rsi_recovery_confirms_buy() {
        let config = SignalConfig::default();
        // Rising through 35 from inside the recovery margin
        let rising = IndicatorSnapshot {
            rsi: 36.0,
            prev_rsi: 33.0,
            ..base_snapshot()
        };
        assert!(rsi_confirms(Side::Buy, &rising, &config));

        // Rising but from well above the zone
        let strong = IndicatorSnapshot {
            rsi: 55.0,
            prev_rsi: 50.0,
            ..base_snapshot()
        };
        assert!(!rsi_confirms(Side::Buy, &strong, &config));
    }

    #[test]
    fn test_strict_rsi_without_margin() {
        let config = SignalConfig {
            rsi_recovery_margin: 0.0,
            ..Default::default()
        };
        let snapshot = IndicatorSnapshot {
            rsi: 36.0,
            prev_rsi: 33.0,
            ..base_snapshot()
        };
        assert!(!rsi_confirms(Side::Buy, &snapshot, &config));
    }

    #[test]
    fn test_macd_confirmation() {
        let positive = IndicatorSnapshot {
            macd_histogram: 0.5,
            prev_macd_histogram: 0.8,
            ..base_snapshot()
        };
        assert!(macd_confirms(Side::Buy, &positive));
        // Positive but shrinking also supports a SELL
        assert!(macd_confirms(Side::Sell, &positive));

        let turning_up = IndicatorSnapshot {
            macd_histogram: -0.2,
            prev_macd_histogram: -0.5,
            ..base_snapshot()
        };
        assert!(macd_confirms(Side::Buy, &turning_up));
    }

    #[test]
    fn test_band_confirmation() {
        let config = SignalConfig::default();
        let snapshot = IndicatorSnapshot {
            close: 2005.0,
            support: Some(PriceBand {
                kind: LevelKind::Support,
                lower: 1998.0,
                upper: 2001.0,
                touches: 2,
            }),
            ..base_snapshot()
        };
        assert!(band_confirms(Side::Buy, &snapshot, &config));
        assert!(!band_confirms(Side::Sell, &snapshot, &config));
    }

    #[test]
    fn test_confidence_counts() {
        let c = Confirmations {
            trend: true,
            rsi: true,
            macd: false,
            band: true,
        };
        assert_eq!(c.count(), 3);
        assert_eq!(c.momentum_count(), 2);
        assert!((c.confidence() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_bars_aligns_to_latest() {
        let start = Utc::now();
        let bars: Vec<PriceBar> = (0..10)
            .map(|i| PriceBar {
                symbol: "XAUUSD".to_string(),
                timestamp: start + Duration::minutes(i),
                open: i as f64,
                high: i as f64 + 0.5,
                low: i as f64 - 0.5,
                close: i as f64,
                volume: 1.0,
            })
            .collect();

        let merged = aggregate_bars(&bars, 4);
        assert_eq!(merged.len(), 2);
        // First two bars dropped, groups are 2..=5 and 6..=9
        assert_eq!(merged[0].open, 2.0);
        assert_eq!(merged[0].close, 5.0);
        assert_eq!(merged[1].high, 9.5);
        assert_eq!(merged[1].low, 5.5);
        assert_eq!(merged[1].volume, 4.0);
        assert_eq!(merged[1].timestamp, bars[9].timestamp);
    }

    #[test]
    fn test_protective_distances() {
        let config = SignalConfig::default();
        let snapshot = base_snapshot();
        let (stop, target) = protective_distances(&snapshot, &config);
        assert!((stop - 30.0).abs() < 1e-9);
        assert!((target - 60.0).abs() < 1e-9);

        // Wide ATR dominates the percentage stop
        let volatile = IndicatorSnapshot {
            atr: Some(40.0),
            ..base_snapshot()
        };
        let (stop, target) = protective_distances(&volatile, &config);
        assert!((stop - 60.0).abs() < 1e-9);
        assert!((target - 90.0).abs() < 1e-9);
    }
}
