// Risk management module
pub mod circuit_breakers;
pub mod manager;

pub use circuit_breakers::{AccountState, CircuitBreakerTrip, RiskLimits, TradingStatus};
pub use manager::{Approval, RiskManager, RiskRejection};
