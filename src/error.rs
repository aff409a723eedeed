use std::time::Duration;

use uuid::Uuid;

use crate::execution::position_manager::PositionStatus;
use crate::risk::RiskRejection;

/// Indicator-level failures. The strategy degrades these to a NONE signal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorError {
    #[error("insufficient data: need {needed} points, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("invalid indicator period: {reason}")]
    InvalidPeriod { reason: String },
}

/// Failures reported by the broker capability.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker call timed out")]
    Timeout,

    #[error("rate limited by broker")]
    RateLimited { retry_after: Option<Duration> },

    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("authentication failed: {reason}")]
    AuthFailure { reason: String },
}

impl BrokerError {
    /// Timeouts and rate limits may be retried with backoff; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Timeout | BrokerError::RateLimited { .. })
    }
}

/// Top-level error type for the decision engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error("invalid signal: {reason}")]
    InvalidSignal { reason: String },

    #[error("risk limit breached: {0}")]
    RiskLimitBreached(#[from] RiskRejection),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("illegal transition for position {id}: cannot {action} while {from:?}")]
    StateConflict {
        id: Uuid,
        from: PositionStatus,
        action: &'static str,
    },

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("concurrent position limit reached ({open}/{limit})")]
    ConcurrencyLimit { open: usize, limit: usize },
}

/// Configuration problems detected at load or validation time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid config value {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
