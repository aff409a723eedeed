use super::moving_average::{rolling_std, sma};
use super::Series;
use crate::error::IndicatorError;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

/// Bollinger Bands: SMA(period) ± k * sample standard deviation(period)
pub fn bollinger(prices: &[f64], period: usize, k: f64) -> Result<BollingerSeries, IndicatorError> {
    let middle = sma(prices, period)?;
    let std = rolling_std(prices, period)?;

    let mut upper = vec![None; prices.len()];
    let mut lower = vec![None; prices.len()];
    for i in 0..prices.len() {
        if let (Some(m), Some(s)) = (middle[i], std[i]) {
            upper[i] = Some(m + k * s);
            lower[i] = Some(m - k * s);
        }
    }

    Ok(BollingerSeries {
        upper,
        middle,
        lower,
    })
}
