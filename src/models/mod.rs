use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar for the traded instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Flat bar where every price equals `price` (polled quotes)
    pub fn flat(symbol: &str, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// Extract close prices from bars
pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Direction of an order or position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Trading signal direction. `Hold` is the NONE signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

impl SignalDirection {
    pub fn side(&self) -> Option<Side> {
        match self {
            SignalDirection::Buy => Some(Side::Buy),
            SignalDirection::Sell => Some(Side::Sell),
            SignalDirection::Hold => None,
        }
    }
}

impl From<Side> for SignalDirection {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => SignalDirection::Buy,
            Side::Sell => SignalDirection::Sell,
        }
    }
}

/// Output of the strategy evaluator, consumed within a single cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub direction: SignalDirection,
    pub confidence: f64,
    pub stop_loss_distance: f64,
    pub take_profit_distance: f64,
    pub reference_price: f64,
    pub generated_at: DateTime<Utc>,
    pub reason: String,
}

impl Signal {
    pub fn hold(generated_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            direction: SignalDirection::Hold,
            confidence: 0.0,
            stop_loss_distance: 0.0,
            take_profit_distance: 0.0,
            reference_price: 0.0,
            generated_at,
            reason: reason.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != SignalDirection::Hold
    }
}

/// Broker-assigned order identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OrderRef(pub String);

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Market order with mandatory protective levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Execution report from the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OrderStatus {
    Pending,
    Filled(Fill),
    Rejected { reason: String },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_sign_and_opposite() {
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_signal_direction_side() {
        assert_eq!(SignalDirection::Buy.side(), Some(Side::Buy));
        assert_eq!(SignalDirection::Hold.side(), None);
        assert_eq!(SignalDirection::from(Side::Sell), SignalDirection::Sell);
    }

    #[test]
    fn test_hold_signal_not_actionable() {
        let signal = Signal::hold(Utc::now(), "no trend");
        assert!(!signal.is_actionable());
        assert_eq!(signal.confidence, 0.0);
        assert_eq!(signal.reason, "no trend");
    }

    #[test]
    fn test_flat_bar() {
        let bar = PriceBar::flat("XAUUSD", Utc::now(), 2400.0);
        assert_eq!(bar.open, 2400.0);
        assert_eq!(bar.low, 2400.0);
        assert_eq!(closes(&[bar]), vec![2400.0]);
    }
}
