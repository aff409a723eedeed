use super::signals::{
    aggregate_bars, confirmations, protective_distances, trend_direction, SignalConfig,
};
use super::Strategy;
use crate::error::{EngineError, IndicatorError};
use crate::execution::position_manager::{ExitReason, Position, PositionStatus};
use crate::indicators::{ema, last_value, rsi, IndicatorConfig, IndicatorSnapshot};
use crate::models::{closes, PriceBar, Side, Signal, SignalDirection};

/// Multi-timeframe trend-following strategy with momentum confluence
///
/// Entry:
/// - Fast/slow EMA agree on the base timeframe and on an aggregated higher
///   timeframe (trend gate, counts as the first confirmation)
/// - RSI oversold or recovering out of the oversold zone (overbought for SELL)
/// - MACD histogram positive or turning up (negative or turning down for SELL)
/// - Price near a support band (resistance for SELL)
///
/// Confidence is the fraction of the four confirmations met.
///
/// Exit (ANY triggers exit):
/// - Take-profit crossed
/// - Trailing stop crossed once activated
/// - RSI divergence against the position
#[derive(Debug, Clone, Default)]
pub struct ConfluenceStrategy {
    indicators: IndicatorConfig,
    signals: SignalConfig,
}

impl ConfluenceStrategy {
    pub fn new(indicators: IndicatorConfig, signals: SignalConfig) -> Self {
        Self {
            indicators,
            signals,
        }
    }

    pub fn signal_config(&self) -> &SignalConfig {
        &self.signals
    }

    fn higher_timeframe_trend(&self, history: &[PriceBar]) -> Result<Option<Side>, IndicatorError> {
        let aggregated = aggregate_bars(history, self.signals.higher_timeframe_factor);
        let prices = closes(&aggregated);
        let fast = last_value(&ema(&prices, self.indicators.ema_fast)?);
        let slow = last_value(&ema(&prices, self.indicators.ema_slow)?);

        match (fast, slow) {
            (Some(fast), Some(slow)) => Ok(trend_direction(fast, slow)),
            _ => Err(IndicatorError::InsufficientData {
                needed: self.indicators.ema_slow,
                available: prices.len(),
            }),
        }
    }

    fn try_evaluate(
        &self,
        snapshot: &IndicatorSnapshot,
        history: &[PriceBar],
    ) -> Result<Signal, EngineError> {
        let base = trend_direction(snapshot.ema_fast, snapshot.ema_slow);
        let higher = self.higher_timeframe_trend(history)?;

        let side = match (base, higher) {
            (Some(base), Some(higher)) if base == higher => base,
            _ => {
                return Ok(Signal::hold(
                    snapshot.timestamp,
                    format!("trend not aligned (base {:?}, higher {:?})", base, higher),
                ))
            }
        };

        let confirmed = confirmations(side, snapshot, &self.signals);
        let opposing = confirmations(side.opposite(), snapshot, &self.signals);
        if opposing.momentum_count() >= 2 {
            return Err(EngineError::InvalidSignal {
                reason: format!(
                    "contradictory confirmations: {} trend but {}/3 momentum checks favour {}",
                    side,
                    opposing.momentum_count(),
                    side.opposite()
                ),
            });
        }

        let confidence = confirmed.confidence();
        let summary = format!(
            "{} conditions: trend=true, RSI={} ({:.1}), MACD={} ({:.3}), band={} ({}/{} met)",
            side,
            confirmed.rsi,
            snapshot.rsi,
            confirmed.macd,
            snapshot.macd_histogram,
            confirmed.band,
            confirmed.count(),
            super::signals::Confirmations::TOTAL
        );

        if confidence < self.signals.min_confidence {
            tracing::debug!("HOLD: {}", summary);
            return Ok(Signal::hold(snapshot.timestamp, summary));
        }

        let (stop_loss_distance, take_profit_distance) =
            protective_distances(snapshot, &self.signals);

        tracing::info!(
            side = %side,
            confidence,
            price = snapshot.close,
            stop_distance = stop_loss_distance,
            "{}",
            summary
        );

        Ok(Signal {
            direction: SignalDirection::from(side),
            confidence,
            stop_loss_distance,
            take_profit_distance,
            reference_price: snapshot.close,
            generated_at: snapshot.timestamp,
            reason: summary,
        })
    }

    /// Trailing stop level once the best price has moved far enough past entry
    pub fn trailing_stop_level(&self, position: &Position) -> Option<f64> {
        let sign = position.side.sign();
        let gain_pct = (position.best_price - position.entry_price) * sign / position.entry_price;
        if gain_pct >= self.signals.trailing_activation_pct {
            Some(position.best_price * (1.0 - sign * self.signals.trailing_stop_pct))
        } else {
            None
        }
    }

    /// New price extreme without a matching RSI extreme
    fn rsi_divergence(&self, side: Side, history: &[PriceBar]) -> bool {
        let lookback = self.signals.divergence_lookback;
        let prices = closes(history);
        if lookback == 0 || prices.len() < lookback + 1 {
            return false;
        }
        let Ok(rsi_series) = rsi(&prices, self.indicators.rsi_period) else {
            return false;
        };

        let last = prices.len() - 1;
        let Some(current_rsi) = rsi_series[last] else {
            return false;
        };
        let window = last - lookback..last;
        let prior_rsi: Vec<f64> = rsi_series[window.clone()].iter().flatten().copied().collect();
        if prior_rsi.is_empty() {
            return false;
        }

        let current = prices[last];
        match side {
            // Bearish divergence against a long
            Side::Buy => {
                let prior_high = prices[window].iter().copied().fold(f64::MIN, f64::max);
                let prior_rsi_high = prior_rsi.iter().copied().fold(f64::MIN, f64::max);
                current > prior_high && current_rsi < prior_rsi_high
            }
            // Bullish divergence against a short
            Side::Sell => {
                let prior_low = prices[window].iter().copied().fold(f64::MAX, f64::min);
                let prior_rsi_low = prior_rsi.iter().copied().fold(f64::MAX, f64::min);
                current < prior_low && current_rsi > prior_rsi_low
            }
        }
    }
}

impl Strategy for ConfluenceStrategy {
    fn evaluate(&self, snapshot: &IndicatorSnapshot, history: &[PriceBar]) -> Signal {
        match self.try_evaluate(snapshot, history) {
            Ok(signal) => signal,
            Err(EngineError::InvalidSignal { reason }) => {
                tracing::warn!("Discarding signal: {}", reason);
                Signal::hold(snapshot.timestamp, reason)
            }
            Err(e) => {
                tracing::debug!("HOLD: {}", e);
                Signal::hold(snapshot.timestamp, e.to_string())
            }
        }
    }

    fn check_exit(&self, position: &Position, history: &[PriceBar]) -> Option<ExitReason> {
        if position.status != PositionStatus::Open {
            return None;
        }
        let price = history.last()?.close;

        if position.target_crossed(price) {
            return Some(ExitReason::TakeProfit);
        }

        if let Some(level) = self.trailing_stop_level(position) {
            let crossed = match position.side {
                Side::Buy => price <= level,
                Side::Sell => price >= level,
            };
            if crossed {
                tracing::info!(
                    position_id = %position.id,
                    price,
                    trailing_stop = level,
                    "Trailing stop hit"
                );
                return Some(ExitReason::TrailingStop);
            }
        }

        if self.rsi_divergence(position.side, history) {
            tracing::info!(position_id = %position.id, price, "RSI divergence exit");
            return Some(ExitReason::Divergence);
        }

        None
    }

    fn name(&self) -> &str {
        "Confluence"
    }

    fn min_bars_required(&self) -> usize {
        let higher = self.indicators.ema_slow * self.signals.higher_timeframe_factor.max(1);
        self.indicators.min_bars().max(higher)
    }

    fn indicator_config(&self) -> &IndicatorConfig {
        &self.indicators
    }
}
