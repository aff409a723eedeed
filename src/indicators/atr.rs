/// Average True Range (ATR) indicator
///
/// Measures market volatility by calculating the average of true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing (same as RSI) for the moving average.
use super::{check_period, Series};
use crate::error::IndicatorError;
use crate::models::PriceBar;

fn true_ranges(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|pair| {
            let (prev, bar) = (&pair[0], &pair[1]);
            (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs())
        })
        .collect()
}

/// ATR series aligned with `bars`; defined from index `period` onwards
pub fn atr(bars: &[PriceBar], period: usize) -> Result<Series, IndicatorError> {
    check_period(period)?;
    if bars.len() < period + 1 {
        return Err(IndicatorError::InsufficientData {
            needed: period + 1,
            available: bars.len(),
        });
    }

    let ranges = true_ranges(bars);
    let mut values = vec![None; bars.len()];

    // First ATR is simple average of first 'period' true ranges
    let mut current = ranges[..period].iter().sum::<f64>() / period as f64;
    values[period] = Some(current);

    for (i, tr) in ranges.iter().enumerate().skip(period) {
        current = (current * (period as f64 - 1.0) + tr) / period as f64;
        values[i + 1] = Some(current);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_bars(prices: &[(f64, f64, f64, f64)]) -> Vec<PriceBar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| PriceBar {
                symbol: "XAUUSD".to_string(),
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_atr_low_volatility() {
        let bars = create_test_bars(&vec![(100.0, 101.0, 99.0, 100.0); 15]);
        let series = atr(&bars, 14).unwrap();

        // ATR should equal the constant high-low range
        assert!((series[14].unwrap() - 2.0).abs() < 1e-9);
        assert!(series[13].is_none());
    }

    #[test]
    fn test_atr_high_volatility() {
        let prices = vec![
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 110.0, 98.0, 105.0),
            (105.0, 108.0, 92.0, 95.0),
            (95.0, 103.0, 88.0, 100.0),
            (100.0, 115.0, 97.0, 110.0),
            (110.0, 112.0, 95.0, 98.0),
            (98.0, 108.0, 90.0, 105.0),
            (105.0, 120.0, 100.0, 115.0),
            (115.0, 118.0, 105.0, 110.0),
            (110.0, 125.0, 108.0, 120.0),
            (120.0, 130.0, 115.0, 125.0),
            (125.0, 128.0, 110.0, 115.0),
            (115.0, 122.0, 105.0, 118.0),
            (118.0, 130.0, 115.0, 125.0),
            (125.0, 135.0, 120.0, 130.0),
        ];

        let bars = create_test_bars(&prices);
        let series = atr(&bars, 14).unwrap();

        assert!(series.last().unwrap().unwrap() > 10.0);
    }

    #[test]
    fn test_atr_uses_gaps() {
        // Gap up: previous close 100, bar range 110-111
        let bars = create_test_bars(&[(100.0, 100.0, 100.0, 100.0), (110.0, 111.0, 110.0, 111.0)]);
        let series = atr(&bars, 1).unwrap();
        assert_eq!(series[1], Some(11.0));
    }

    #[test]
    fn test_atr_insufficient_data() {
        let bars = create_test_bars(&[(100.0, 101.0, 99.0, 100.0), (100.0, 101.0, 99.0, 100.0)]);
        assert_eq!(
            atr(&bars, 14),
            Err(IndicatorError::InsufficientData {
                needed: 15,
                available: 2
            })
        );
    }
}
