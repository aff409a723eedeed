use super::{check_period, require_len, Series};
use crate::error::IndicatorError;

/// Simple Moving Average over a sliding window
///
/// Output is aligned with `prices`; the first `period - 1` entries are `None`.
pub fn sma(prices: &[f64], period: usize) -> Result<Series, IndicatorError> {
    check_period(period)?;
    require_len(prices, period)?;

    let mut values = vec![None; prices.len()];
    let mut window_sum: f64 = prices[..period].iter().sum();
    values[period - 1] = Some(window_sum / period as f64);

    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        values[i] = Some(window_sum / period as f64);
    }

    Ok(values)
}

/// Exponential Moving Average
///
/// Smoothing factor α = 2/(period+1), seeded with the SMA of the first
/// `period` prices at index `period - 1`.
pub fn ema(prices: &[f64], period: usize) -> Result<Series, IndicatorError> {
    check_period(period)?;
    require_len(prices, period)?;

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut values = vec![None; prices.len()];

    // Start with SMA
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    values[period - 1] = Some(ema);

    for (i, price) in prices.iter().enumerate().skip(period) {
        ema = multiplier * price + (1.0 - multiplier) * ema;
        values[i] = Some(ema);
    }

    Ok(values)
}

/// EMA over a series that has its own warm-up gap (e.g. the MACD line)
///
/// Leading `None`s are skipped; the result stays aligned with `series`.
pub(crate) fn ema_of_defined(series: &Series, period: usize) -> Result<Series, IndicatorError> {
    let offset = series.iter().take_while(|v| v.is_none()).count();
    let defined: Vec<f64> = series[offset..].iter().map(|v| v.unwrap_or(0.0)).collect();

    let inner = ema(&defined, period)?;
    let mut values = vec![None; offset];
    values.extend(inner);
    Ok(values)
}

/// Sample standard deviation over a sliding window
pub(crate) fn rolling_std(prices: &[f64], period: usize) -> Result<Series, IndicatorError> {
    check_period(period)?;
    require_len(prices, period)?;

    let mut values = vec![None; prices.len()];
    for end in period..=prices.len() {
        let window = &prices[end - period..end];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = if period > 1 {
            window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (period - 1) as f64
        } else {
            0.0
        };
        values[end - 1] = Some(variance.sqrt());
    }

    Ok(values)
}
