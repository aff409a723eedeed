use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use super::broker::BrokerGateway;
use crate::error::{BrokerError, EngineError};
use crate::models::{Fill, OrderRef, OrderRequest, OrderStatus, Side};
use crate::risk::Approval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
    Error,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Pending => "PENDING",
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Divergence,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    /// Requested price until filled, then the actual fill price
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Best price since entry (high for longs, low for shorts)
    pub best_price: f64,
    pub status: PositionStatus,
    pub order_ref: Option<OrderRef>,
    pub submitted_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<f64>,
    pub error: Option<String>,
}

impl Position {
    /// New PENDING position
    pub fn new(
        symbol: &str,
        side: Side,
        size: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            stop_loss,
            take_profit,
            best_price: entry_price,
            status: PositionStatus::Pending,
            order_ref: None,
            submitted_at: now,
            opened_at: None,
            closed_at: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            error: None,
        }
    }

    /// PENDING or OPEN
    pub fn is_active(&self) -> bool {
        matches!(self.status, PositionStatus::Pending | PositionStatus::Open)
    }

    /// (price - entry) * size * sign(side)
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size * self.side.sign()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.status == PositionStatus::Open {
            self.pnl_at(price)
        } else {
            0.0
        }
    }

    pub fn stop_crossed(&self, price: f64) -> bool {
        match self.side {
            Side::Buy => price <= self.stop_loss,
            Side::Sell => price >= self.stop_loss,
        }
    }

    pub fn target_crossed(&self, price: f64) -> bool {
        match self.side {
            Side::Buy => price >= self.take_profit,
            Side::Sell => price <= self.take_profit,
        }
    }

    fn update_best_price(&mut self, price: f64) {
        let better = match self.side {
            Side::Buy => price > self.best_price,
            Side::Sell => price < self.best_price,
        };
        if better {
            self.best_price = price;
        }
    }

    fn ensure_status(
        &self,
        allowed: &[PositionStatus],
        action: &'static str,
    ) -> Result<(), EngineError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            let err = EngineError::StateConflict {
                id: self.id,
                from: self.status,
                action,
            };
            tracing::error!(position_id = %self.id, "{}", err);
            Err(err)
        }
    }
}

/// Result of closing a position
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub id: Uuid,
    pub reason: ExitReason,
    pub exit_price: f64,
    pub pnl: f64,
}

/// Owns every position and drives the PENDING -> OPEN -> CLOSED lifecycle
///
/// ERROR is reachable from PENDING or OPEN and is terminal. Illegal
/// transitions return `EngineError::StateConflict` and change nothing.
/// Only the most recent `history_capacity` CLOSED/ERROR positions are kept.
pub struct PositionManager {
    gateway: BrokerGateway,
    symbol: String,
    positions: VecDeque<Position>,
    max_concurrent: usize,
    fill_timeout: Duration,
    history_capacity: usize,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

impl PositionManager {
    pub fn new(
        gateway: BrokerGateway,
        symbol: impl Into<String>,
        max_concurrent: usize,
        fill_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            symbol: symbol.into(),
            positions: VecDeque::new(),
            max_concurrent,
            fill_timeout,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Get all retained positions, oldest first
    pub fn all_positions(&self) -> Vec<&Position> {
        self.positions.iter().collect()
    }

    /// PENDING and OPEN positions
    pub fn active_positions(&self) -> Vec<&Position> {
        self.positions.iter().filter(|p| p.is_active()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_active()).count()
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
            .collect()
    }

    /// The `n` most recently submitted positions, newest first
    pub fn recent_positions(&self, n: usize) -> Vec<Position> {
        self.positions.iter().rev().take(n).cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Position, EngineError> {
        self.positions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(EngineError::PositionNotFound(id))
    }

    /// Drop the oldest CLOSED/ERROR positions beyond the history capacity
    fn prune_history(&mut self) {
        let mut finished = self.positions.iter().filter(|p| !p.is_active()).count();
        while finished > self.history_capacity {
            let Some(index) = self.positions.iter().position(|p| !p.is_active()) else {
                break;
            };
            self.positions.remove(index);
            finished -= 1;
        }
    }

    /// Total unrealized P&L of OPEN positions at `price`
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.positions.iter().map(|p| p.unrealized_pnl(price)).sum()
    }

    /// Create a PENDING position from an approval and submit it
    ///
    /// A broker failure moves the position straight to ERROR; the order is
    /// never resubmitted.
    pub async fn open(&mut self, approval: &Approval, now: DateTime<Utc>) -> Result<Uuid, EngineError> {
        let sign = approval.side.sign();
        let stop_valid = approval.stop_loss.is_finite()
            && approval.stop_loss > 0.0
            && (approval.reference_price - approval.stop_loss) * sign > 0.0;
        if !stop_valid {
            return Err(EngineError::InvalidOrder {
                reason: format!(
                    "stop-loss {} is not on the losing side of {} for {}",
                    approval.stop_loss, approval.reference_price, approval.side
                ),
            });
        }
        if !(approval.size > 0.0) {
            return Err(EngineError::InvalidOrder {
                reason: format!("non-positive size {}", approval.size),
            });
        }

        let active = self.active_count();
        if active >= self.max_concurrent {
            return Err(EngineError::ConcurrencyLimit {
                open: active,
                limit: self.max_concurrent,
            });
        }

        let position = Position::new(
            &self.symbol,
            approval.side,
            approval.size,
            approval.reference_price,
            approval.stop_loss,
            approval.take_profit,
            now,
        );
        let id = position.id;
        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side: approval.side,
            size: approval.size,
            stop_loss: approval.stop_loss,
            take_profit: approval.take_profit,
        };
        self.positions.push_back(position);

        tracing::info!(
            position_id = %id,
            side = %request.side,
            size = request.size,
            price = approval.reference_price,
            stop_loss = request.stop_loss,
            take_profit = request.take_profit,
            "Submitting order"
        );

        match self.gateway.submit_order(&request).await {
            Ok(order_ref) => {
                tracing::info!(position_id = %id, order = %order_ref, "Order accepted");
                self.get_mut(id)?.order_ref = Some(order_ref);
                Ok(id)
            }
            Err(e) => {
                self.fail(id, &e)?;
                Err(e.into())
            }
        }
    }

    fn fail(&mut self, id: Uuid, error: &BrokerError) -> Result<(), EngineError> {
        tracing::error!(position_id = %id, "Broker error, marking position ERROR: {}", error);
        self.mark_error(id, error.to_string())
    }

    /// PENDING -> OPEN with the actual fill price (slippage is accepted)
    pub fn mark_filled(&mut self, id: Uuid, fill: &Fill) -> Result<(), EngineError> {
        let position = self.get_mut(id)?;
        position.ensure_status(&[PositionStatus::Pending], "fill")?;

        position.status = PositionStatus::Open;
        position.entry_price = fill.price;
        if fill.size > 0.0 {
            position.size = fill.size;
        }
        position.best_price = fill.price;
        position.opened_at = Some(fill.timestamp);

        tracing::info!(
            position_id = %id,
            side = %position.side,
            size = position.size,
            entry = position.entry_price,
            "Position opened"
        );
        Ok(())
    }

    /// PENDING|OPEN -> ERROR
    pub fn mark_error(&mut self, id: Uuid, reason: impl Into<String>) -> Result<(), EngineError> {
        let position = self.get_mut(id)?;
        position.ensure_status(&[PositionStatus::Pending, PositionStatus::Open], "fail")?;
        position.status = PositionStatus::Error;
        position.error = Some(reason.into());
        self.prune_history();
        Ok(())
    }

    /// Poll PENDING orders; returns ids of positions that opened
    ///
    /// Orders still unfilled after the fill timeout are cancelled and marked
    /// ERROR. If the cancel fails the position stays PENDING and the order
    /// status is queried again on the next call.
    pub async fn sync_pending(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let pending: Vec<(Uuid, Option<OrderRef>, DateTime<Utc>)> = self
            .positions
            .iter()
            .filter(|p| p.status == PositionStatus::Pending)
            .map(|p| (p.id, p.order_ref.clone(), p.submitted_at))
            .collect();

        let mut opened = Vec::new();
        for (id, order_ref, submitted_at) in pending {
            let Some(order_ref) = order_ref else {
                continue;
            };

            let result = match self.gateway.get_order_status(&order_ref).await {
                Ok(OrderStatus::Filled(fill)) => self.mark_filled(id, &fill).map(|_| opened.push(id)),
                Ok(OrderStatus::Rejected { reason }) => {
                    tracing::error!(position_id = %id, "Order rejected: {}", reason);
                    self.mark_error(id, format!("order rejected: {}", reason))
                }
                Ok(OrderStatus::Cancelled) => {
                    tracing::error!(position_id = %id, "Order cancelled by broker");
                    self.mark_error(id, "order cancelled by broker")
                }
                Ok(OrderStatus::Pending) if now - submitted_at >= self.fill_timeout => {
                    tracing::error!(
                        position_id = %id,
                        order = %order_ref,
                        "Order unfilled after {}s, cancelling",
                        self.fill_timeout.num_seconds()
                    );
                    match self.gateway.cancel_order(&order_ref).await {
                        Ok(()) => self.mark_error(id, "fill timeout"),
                        Err(e) => {
                            tracing::warn!(position_id = %id, "Cancel failed, keeping order PENDING: {}", e);
                            Ok(())
                        }
                    }
                }
                Ok(OrderStatus::Pending) => Ok(()),
                Err(e) => {
                    tracing::warn!(position_id = %id, "Order status unavailable: {}", e);
                    Ok(())
                }
            };

            if let Err(e) = result {
                tracing::error!(position_id = %id, "Failed to sync order: {}", e);
            }
        }

        opened
    }

    /// OPEN -> CLOSED through the broker
    ///
    /// A transient broker failure leaves the position OPEN for the next
    /// attempt; a fatal one moves it to ERROR.
    pub async fn close_position(
        &mut self,
        id: Uuid,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, EngineError> {
        let order_ref = {
            let position = self.get_mut(id)?;
            position.ensure_status(&[PositionStatus::Open], "close")?;
            position.order_ref.clone()
        };
        let order_ref = order_ref.ok_or_else(|| EngineError::InvalidOrder {
            reason: format!("position {} has no order reference", id),
        })?;

        let fill = match self.gateway.close_position(&order_ref).await {
            Ok(fill) => fill,
            Err(e) if e.is_retryable() => {
                tracing::warn!(position_id = %id, "Close failed, will retry: {}", e);
                return Err(e.into());
            }
            Err(e) => {
                self.fail(id, &e)?;
                return Err(e.into());
            }
        };

        let position = self.get_mut(id)?;
        let pnl = position.pnl_at(fill.price);
        position.status = PositionStatus::Closed;
        position.exit_price = Some(fill.price);
        position.closed_at = Some(now.max(fill.timestamp));
        position.exit_reason = Some(reason);
        position.realized_pnl = Some(pnl);

        tracing::info!(
            position_id = %id,
            reason = ?reason,
            entry = position.entry_price,
            exit = fill.price,
            pnl,
            "Position closed"
        );
        self.prune_history();

        Ok(ClosedTrade {
            id,
            reason,
            exit_price: fill.price,
            pnl,
        })
    }

    /// Track best prices and close OPEN positions whose stop or target is crossed
    pub async fn monitor(&mut self, price: f64, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let mut exits = Vec::new();
        for position in self
            .positions
            .iter_mut()
            .filter(|p| p.status == PositionStatus::Open)
        {
            position.update_best_price(price);
            if position.stop_crossed(price) {
                exits.push((position.id, ExitReason::StopLoss));
            } else if position.target_crossed(price) {
                exits.push((position.id, ExitReason::TakeProfit));
            }
        }

        let mut closed = Vec::new();
        for (id, reason) in exits {
            match self.close_position(id, reason, now).await {
                Ok(trade) => closed.push(trade),
                Err(e) => tracing::warn!(position_id = %id, "Exit not completed: {}", e),
            }
        }
        closed
    }
}
