use super::{check_period, require_len, Series};
use crate::error::IndicatorError;

/// Relative Strength Index (RSI) with Wilder's smoothing
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The first average gain/loss is the simple mean of the first `period`
/// changes, so RSI is defined from index `period` onwards. Subsequent
/// averages use `avg = (prev * (period - 1) + current) / period`.
pub fn rsi(prices: &[f64], period: usize) -> Result<Series, IndicatorError> {
    check_period(period)?;
    require_len(prices, period + 1)?;

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);
    for window in prices.windows(2) {
        let change = window[1] - window[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut values = vec![None; prices.len()];
    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    values[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    let smoothing = period as f64;
    for i in period..gains.len() {
        avg_gain = (avg_gain * (smoothing - 1.0) + gains[i]) / smoothing;
        avg_loss = (avg_loss * (smoothing - 1.0) + losses[i]) / smoothing;
        values[i + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    Ok(values)
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    if avg_gain == 0.0 {
        return 0.0;
    }

    let rs = avg_gain / avg_loss;
    (100.0 - (100.0 / (1.0 + rs))).clamp(0.0, 100.0)
}
