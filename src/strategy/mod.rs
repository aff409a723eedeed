// Trading strategy module
pub mod confluence;
pub mod signals;

pub use confluence::ConfluenceStrategy;
pub use signals::SignalConfig;

use chrono::{DateTime, Utc};

use crate::execution::position_manager::{ExitReason, Position};
use crate::indicators::{IndicatorConfig, IndicatorSnapshot};
use crate::models::{PriceBar, Signal};

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal from the latest indicator snapshot
    ///
    /// `history` is the full bar history the snapshot was computed from.
    fn evaluate(&self, snapshot: &IndicatorSnapshot, history: &[PriceBar]) -> Signal;

    /// Decide whether an open position should be closed
    fn check_exit(&self, position: &Position, history: &[PriceBar]) -> Option<ExitReason>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum bars required for this strategy
    fn min_bars_required(&self) -> usize;

    /// Indicator periods the snapshot must be computed with
    fn indicator_config(&self) -> &IndicatorConfig;
}

/// Compute the snapshot for `history` and evaluate it
///
/// Missing history never propagates; it yields a NONE signal.
pub fn evaluate_history(
    strategy: &dyn Strategy,
    history: &[PriceBar],
    now: DateTime<Utc>,
) -> Signal {
    if history.len() < strategy.min_bars_required() {
        return Signal::hold(
            now,
            format!(
                "warming up: {} bars, need {}",
                history.len(),
                strategy.min_bars_required()
            ),
        );
    }

    match IndicatorSnapshot::compute(history, strategy.indicator_config()) {
        Ok(snapshot) => strategy.evaluate(&snapshot, history),
        Err(e) => {
            tracing::debug!(strategy = strategy.name(), "HOLD: {}", e);
            Signal::hold(now, e.to_string())
        }
    }
}
