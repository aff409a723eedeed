use super::moving_average::{ema, ema_of_defined};
use super::{check_period, require_len, Series};
use crate::error::IndicatorError;

/// MACD line, signal line and histogram, aligned with the input prices
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub line: Series,
    pub signal: Series,
    pub histogram: Series,
}

/// Moving Average Convergence/Divergence
///
/// line = EMA(fast) - EMA(slow), signal = EMA(line, signal_period),
/// histogram = line - signal.
pub fn macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Result<MacdSeries, IndicatorError> {
    check_period(fast_period)?;
    check_period(slow_period)?;
    check_period(signal_period)?;
    if fast_period >= slow_period {
        return Err(IndicatorError::InvalidPeriod {
            reason: format!(
                "fast period {} must be shorter than slow period {}",
                fast_period, slow_period
            ),
        });
    }
    require_len(prices, slow_period + signal_period - 1)?;

    let fast = ema(prices, fast_period)?;
    let slow = ema(prices, slow_period)?;

    let line: Series = fast
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let signal = ema_of_defined(&line, signal_period)?;

    let histogram = line
        .iter()
        .zip(signal.iter())
        .map(|(l, s)| match (l, s) {
            (Some(l), Some(s)) => Some(l - s),
            _ => None,
        })
        .collect();

    Ok(MacdSeries {
        line,
        signal,
        histogram,
    })
}
