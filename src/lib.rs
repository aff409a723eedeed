// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::AppConfig;
pub use engine::{ControlOutcome, TradingEngine};
pub use error::{BrokerError, ConfigError, EngineError, IndicatorError};
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
