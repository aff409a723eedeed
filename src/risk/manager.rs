use serde::{Deserialize, Serialize};

use super::circuit_breakers::{AccountState, CircuitBreakerTrip, RiskLimits};
use crate::models::{Side, Signal};

/// Reasons the risk manager refuses a trade
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskRejection {
    #[error("no actionable signal")]
    NoSignal,

    #[error("invalid stop distance {distance}")]
    InvalidStopDistance { distance: f64 },

    #[error("trading halted: {reason}")]
    Halted { reason: String },

    #[error("drawdown {drawdown:.4} reached limit {limit:.4}")]
    DrawdownBreached { drawdown: f64, limit: f64 },

    #[error("daily loss {loss:.2} reached limit {limit:.2}")]
    DailyLossLimit { loss: f64, limit: f64 },

    #[error("weekly loss {loss:.2} reached limit {limit:.2}")]
    WeeklyLossLimit { loss: f64, limit: f64 },

    #[error("{open} positions open, limit {limit}")]
    MaxConcurrentPositions { open: usize, limit: usize },

    #[error("size {size} below minimum {minimum}")]
    SizeBelowMinimum { size: f64, minimum: f64 },
}

/// A sized trade cleared for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub side: Side,
    pub size: f64,
    pub reference_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Currency lost if the stop is hit at the reference price
    pub risk_amount: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    broker_max_size: Option<f64>,
}

/// Floor `size` to a multiple of `step`, tolerating float noise just below a step
fn floor_to_step(size: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return size;
    }
    let steps = (size / step + 1e-9).floor();
    steps * step
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            broker_max_size: None,
        }
    }

    /// Cap sizes at the broker's maximum order size as well
    pub fn with_broker_max_size(mut self, max_size: Option<f64>) -> Self {
        self.broker_max_size = max_size;
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Run circuit breakers against the account, halting on a drawdown breach
    ///
    /// Called every cycle, independent of whether a signal exists.
    pub fn check_circuit_breakers(&self, account: &mut AccountState) -> Result<(), RiskRejection> {
        if account.is_halted() {
            return Err(RiskRejection::Halted {
                reason: account.halt_reason.clone().unwrap_or_default(),
            });
        }

        match self.limits.check(account) {
            Ok(()) => Ok(()),
            Err(CircuitBreakerTrip::MaxDrawdown { drawdown }) => {
                account.halt(format!(
                    "drawdown {:.2}% >= {:.2}%",
                    drawdown * 100.0,
                    self.limits.max_drawdown_pct * 100.0
                ));
                Err(RiskRejection::DrawdownBreached {
                    drawdown,
                    limit: self.limits.max_drawdown_pct,
                })
            }
            Err(CircuitBreakerTrip::DailyLoss { loss }) => Err(RiskRejection::DailyLossLimit {
                loss,
                limit: self.limits.max_daily_loss,
            }),
            Err(CircuitBreakerTrip::WeeklyLoss { loss }) => Err(RiskRejection::WeeklyLossLimit {
                loss,
                limit: self.limits.max_weekly_loss,
            }),
        }
    }

    /// Approve and size a trade, or reject it
    ///
    /// `open_positions` counts PENDING and OPEN positions.
    pub fn assess(
        &self,
        signal: &Signal,
        account: &mut AccountState,
        open_positions: usize,
    ) -> Result<Approval, RiskRejection> {
        let side = signal.direction.side().ok_or(RiskRejection::NoSignal)?;

        let distance = signal.stop_loss_distance;
        if !distance.is_finite() || distance <= 0.0 || distance >= signal.reference_price {
            return Err(RiskRejection::InvalidStopDistance { distance });
        }

        self.check_circuit_breakers(account)?;

        if open_positions >= self.limits.max_concurrent_positions {
            return Err(RiskRejection::MaxConcurrentPositions {
                open: open_positions,
                limit: self.limits.max_concurrent_positions,
            });
        }

        let risk_budget = account.equity * self.limits.max_risk_per_trade_pct;
        let mut cap = self.limits.max_position_size;
        if let Some(broker_max) = self.broker_max_size {
            cap = cap.min(broker_max);
        }
        let size = floor_to_step((risk_budget / distance).min(cap), self.limits.size_step).min(cap);

        if size + 1e-12 < self.limits.min_position_size || size <= 0.0 {
            return Err(RiskRejection::SizeBelowMinimum {
                size,
                minimum: self.limits.min_position_size,
            });
        }

        let sign = side.sign();
        let approval = Approval {
            side,
            size,
            reference_price: signal.reference_price,
            stop_loss: signal.reference_price - sign * distance,
            take_profit: signal.reference_price + sign * signal.take_profit_distance,
            risk_amount: size * distance,
            confidence: signal.confidence,
        };

        tracing::info!(
            side = %approval.side,
            size = approval.size,
            stop_loss = approval.stop_loss,
            take_profit = approval.take_profit,
            risk = approval.risk_amount,
            "Trade approved"
        );

        Ok(approval)
    }
}
