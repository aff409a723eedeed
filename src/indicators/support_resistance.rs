//! Support and resistance bands from swing points
//!
//! A swing low (close strictly below both neighbours) is a support pivot, a
//! swing high a resistance pivot. Pivots of the same kind that sit within
//! `tolerance_pct` of each other collapse into one band.

use serde::{Deserialize, Serialize};

use super::require_len;
use crate::error::IndicatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    pub kind: LevelKind,
    pub lower: f64,
    pub upper: f64,
    pub touches: usize,
}

impl PriceBand {
    pub fn mid(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// Absolute distance from `price` to the band, zero when inside it
    pub fn distance_to(&self, price: f64) -> f64 {
        if price < self.lower {
            self.lower - price
        } else if price > self.upper {
            price - self.upper
        } else {
            0.0
        }
    }

    /// True when `price` is within `tolerance_pct` (fraction) of the band
    pub fn is_near(&self, price: f64, tolerance_pct: f64) -> bool {
        self.distance_to(price) <= price.abs() * tolerance_pct
    }
}

/// Detect support/resistance bands over the last `lookback` prices
///
/// Returns bands ordered by distance from the current (last) price, nearest first.
pub fn support_resistance(
    prices: &[f64],
    lookback: usize,
    tolerance_pct: f64,
) -> Result<Vec<PriceBand>, IndicatorError> {
    if lookback < 3 {
        return Err(IndicatorError::InvalidPeriod {
            reason: format!("lookback must be at least 3, got {}", lookback),
        });
    }
    require_len(prices, 3)?;

    let start = prices.len().saturating_sub(lookback);
    let recent = &prices[start..];

    let mut swing_lows = Vec::new();
    let mut swing_highs = Vec::new();
    for window in recent.windows(3) {
        let (prev, curr, next) = (window[0], window[1], window[2]);
        if curr < prev && curr < next {
            swing_lows.push(curr);
        }
        if curr > prev && curr > next {
            swing_highs.push(curr);
        }
    }

    let mut bands = merge_levels(LevelKind::Support, swing_lows, tolerance_pct);
    bands.extend(merge_levels(
        LevelKind::Resistance,
        swing_highs,
        tolerance_pct,
    ));

    let current = recent[recent.len() - 1];
    bands.sort_by(|a, b| a.distance_to(current).total_cmp(&b.distance_to(current)));

    Ok(bands)
}

fn merge_levels(kind: LevelKind, mut levels: Vec<f64>, tolerance_pct: f64) -> Vec<PriceBand> {
    levels.sort_by(|a, b| a.total_cmp(b));

    let mut bands: Vec<PriceBand> = Vec::new();
    for level in levels {
        match bands.last_mut() {
            Some(band) if (level - band.lower) <= band.lower.abs() * tolerance_pct => {
                band.upper = level;
                band.touches += 1;
            }
            _ => bands.push(PriceBand {
                kind,
                lower: level,
                upper: level,
                touches: 1,
            }),
        }
    }

    bands
}

/// Closest support band at or below `price`
pub fn nearest_support(bands: &[PriceBand], price: f64) -> Option<&PriceBand> {
    bands
        .iter()
        .filter(|b| b.kind == LevelKind::Support && b.lower <= price)
        .min_by(|a, b| a.distance_to(price).total_cmp(&b.distance_to(price)))
}

/// Closest resistance band at or above `price`
pub fn nearest_resistance(bands: &[PriceBand], price: f64) -> Option<&PriceBand> {
    bands
        .iter()
        .filter(|b| b.kind == LevelKind::Resistance && b.upper >= price)
        .min_by(|a, b| a.distance_to(price).total_cmp(&b.distance_to(price)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_swing_levels() {
        // Swing lows at 98 and 97, swing highs at 105 and 104
        let prices = vec![100.0, 98.0, 102.0, 105.0, 101.0, 97.0, 103.0, 104.0, 102.0];
        let bands = support_resistance(&prices, 20, 0.001).unwrap();

        let supports: Vec<_> = bands
            .iter()
            .filter(|b| b.kind == LevelKind::Support)
            .collect();
        let resistances: Vec<_> = bands
            .iter()
            .filter(|b| b.kind == LevelKind::Resistance)
            .collect();
        assert_eq!(supports.len(), 2);
        assert_eq!(resistances.len(), 2);
    }

    #[test]
    fn test_merges_nearby_levels() {
        // Lows at 2000 and 2004 are within 0.5% of each other
        let prices = vec![2010.0, 2000.0, 2020.0, 2030.0, 2004.0, 2015.0];
        let bands = support_resistance(&prices, 50, 0.005).unwrap();

        let support = bands
            .iter()
            .find(|b| b.kind == LevelKind::Support)
            .unwrap();
        assert_eq!(support.lower, 2000.0);
        assert_eq!(support.upper, 2004.0);
        assert_eq!(support.touches, 2);
    }

    #[test]
    fn test_bands_sorted_by_distance() {
        let prices = vec![
            100.0, 90.0, 100.0, 120.0, 100.0, 95.0, 100.0, 110.0, 104.0,
        ];
        let bands = support_resistance(&prices, 50, 0.001).unwrap();
        let current = 104.0;
        for pair in bands.windows(2) {
            assert!(pair[0].distance_to(current) <= pair[1].distance_to(current));
        }
    }

    #[test]
    fn test_lookback_limits_window() {
        // The old swing low at 50 falls outside a 5-point lookback
        let prices = vec![60.0, 50.0, 60.0, 70.0, 71.0, 72.0, 71.5, 73.0];
        let bands = support_resistance(&prices, 5, 0.001).unwrap();
        assert!(bands.iter().all(|b| b.lower > 50.0));
    }

    #[test]
    fn test_nearest_support_and_resistance() {
        let bands = vec![
            PriceBand {
                kind: LevelKind::Support,
                lower: 95.0,
                upper: 96.0,
                touches: 2,
            },
            PriceBand {
                kind: LevelKind::Support,
                lower: 90.0,
                upper: 90.0,
                touches: 1,
            },
            PriceBand {
                kind: LevelKind::Resistance,
                lower: 110.0,
                upper: 111.0,
                touches: 1,
            },
        ];
        assert_eq!(nearest_support(&bands, 100.0).unwrap().lower, 95.0);
        assert_eq!(nearest_resistance(&bands, 100.0).unwrap().lower, 110.0);
        assert!(nearest_resistance(&bands, 120.0).is_none());
    }

    #[test]
    fn test_band_proximity() {
        let band = PriceBand {
            kind: LevelKind::Support,
            lower: 2000.0,
            upper: 2004.0,
            touches: 2,
        };
        assert!(band.is_near(2002.0, 0.001)); // inside
        assert!(band.is_near(2007.0, 0.002)); // 3.0 away, tolerance ~4.0
        assert!(!band.is_near(2020.0, 0.002));
    }

    #[test]
    fn test_insufficient_data() {
        assert!(matches!(
            support_resistance(&[1.0, 2.0], 10, 0.01),
            Err(IndicatorError::InsufficientData { .. })
        ));
    }
}
