use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::broker::{AccountInfoProvider, BrokerClient};
use crate::error::BrokerError;
use crate::models::{Fill, OrderRef, OrderRequest, OrderStatus, PriceBar, Side};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaperSettings {
    pub starting_price: f64,
    pub initial_balance: f64,
    /// Max fractional move per quote for the random walk, 0 keeps the price fixed
    pub volatility_pct: f64,
    /// Absolute price slippage applied against the trader on every fill
    pub slippage: f64,
    pub max_order_size: f64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            starting_price: 2400.0,
            initial_balance: 10_000.0,
            volatility_pct: 0.0005,
            slippage: 0.10,
            max_order_size: 50.0,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    side: Side,
    size: f64,
    status: OrderStatus,
    closed: bool,
}

#[derive(Debug)]
struct PaperState {
    price: f64,
    balance: f64,
    next_id: u64,
    orders: HashMap<String, PaperOrder>,
    submissions: usize,
    auto_fill: bool,
    latency: Option<Duration>,
    submit_failures: VecDeque<BrokerError>,
    cancel_failures: VecDeque<BrokerError>,
    quote_failures: VecDeque<BrokerError>,
}

/// In-memory simulated broker for paper trading and tests
///
/// Market orders fill immediately at the current price plus slippage unless
/// auto-fill is disabled, in which case they stay PENDING until
/// [`PaperBroker::fill_pending`] is called.
pub struct PaperBroker {
    settings: PaperSettings,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(settings: PaperSettings) -> Self {
        let state = PaperState {
            price: settings.starting_price,
            balance: settings.initial_balance,
            next_id: 1,
            orders: HashMap::new(),
            submissions: 0,
            auto_fill: true,
            latency: None,
            submit_failures: VecDeque::new(),
            cancel_failures: VecDeque::new(),
            quote_failures: VecDeque::new(),
        };
        Self {
            settings,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_price(&self, price: f64) {
        self.lock().price = price;
    }

    pub fn price(&self) -> f64 {
        self.lock().price
    }

    /// Overwrite the cash balance, e.g. to simulate an external loss
    pub fn set_balance(&self, balance: f64) {
        self.lock().balance = balance;
    }

    pub fn set_auto_fill(&self, enabled: bool) {
        self.lock().auto_fill = enabled;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Queue an error returned by the next `submit_order` call
    pub fn fail_next_submit(&self, error: BrokerError) {
        self.lock().submit_failures.push_back(error);
    }

    /// Queue an error returned by the next `cancel_order` call
    pub fn fail_next_cancel(&self, error: BrokerError) {
        self.lock().cancel_failures.push_back(error);
    }

    /// Queue an error returned by the next `get_quote` call
    pub fn fail_next_quote(&self, error: BrokerError) {
        self.lock().quote_failures.push_back(error);
    }

    /// Number of `submit_order` calls received, including failed ones
    pub fn submission_count(&self) -> usize {
        self.lock().submissions
    }

    /// Fill every PENDING order at the current price
    pub fn fill_pending(&self) {
        let mut state = self.lock();
        let price = state.price;
        let slippage = self.settings.slippage;
        for order in state.orders.values_mut() {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Filled(Fill {
                    price: price + order.side.sign() * slippage,
                    size: order.size,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn unrealized(state: &PaperState) -> f64 {
        state
            .orders
            .values()
            .filter(|o| !o.closed)
            .filter_map(|o| match &o.status {
                OrderStatus::Filled(fill) => {
                    Some((state.price - fill.price) * fill.size * o.side.sign())
                }
                _ => None,
            })
            .sum()
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_quote(&self, symbol: &str) -> Result<PriceBar, BrokerError> {
        self.simulate_latency().await;

        let mut state = self.lock();
        if let Some(error) = state.quote_failures.pop_front() {
            return Err(error);
        }

        if self.settings.volatility_pct > 0.0 {
            let step = rand::thread_rng()
                .gen_range(-self.settings.volatility_pct..=self.settings.volatility_pct);
            state.price *= 1.0 + step;
        }

        Ok(PriceBar::flat(symbol, Utc::now(), state.price))
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderRef, BrokerError> {
        self.simulate_latency().await;

        let mut state = self.lock();
        state.submissions += 1;
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }

        if !(order.size > 0.0) || order.size > self.settings.max_order_size {
            return Err(BrokerError::Rejected {
                reason: format!("invalid order size {}", order.size),
            });
        }

        let id = format!("PAPER-{}", state.next_id);
        state.next_id += 1;

        let status = if state.auto_fill {
            OrderStatus::Filled(Fill {
                price: state.price + order.side.sign() * self.settings.slippage,
                size: order.size,
                timestamp: Utc::now(),
            })
        } else {
            OrderStatus::Pending
        };

        state.orders.insert(
            id.clone(),
            PaperOrder {
                side: order.side,
                size: order.size,
                status,
                closed: false,
            },
        );

        Ok(OrderRef(id))
    }

    async fn get_order_status(&self, order: &OrderRef) -> Result<OrderStatus, BrokerError> {
        self.simulate_latency().await;

        let state = self.lock();
        Ok(state
            .orders
            .get(&order.0)
            .map(|o| o.status.clone())
            .unwrap_or_else(|| OrderStatus::Rejected {
                reason: format!("unknown order {}", order),
            }))
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<(), BrokerError> {
        self.simulate_latency().await;

        let mut state = self.lock();
        if let Some(error) = state.cancel_failures.pop_front() {
            return Err(error);
        }
        if let Some(o) = state.orders.get_mut(&order.0) {
            if o.status == OrderStatus::Pending {
                o.status = OrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn close_position(&self, order: &OrderRef) -> Result<Fill, BrokerError> {
        self.simulate_latency().await;

        let mut state = self.lock();
        let price = state.price;
        let slippage = self.settings.slippage;

        let paper_order = state
            .orders
            .get_mut(&order.0)
            .ok_or_else(|| BrokerError::Rejected {
                reason: format!("unknown order {}", order),
            })?;
        if paper_order.closed {
            return Err(BrokerError::Rejected {
                reason: format!("order {} already closed", order),
            });
        }
        let entry = match &paper_order.status {
            OrderStatus::Filled(fill) => fill.clone(),
            _ => {
                return Err(BrokerError::Rejected {
                    reason: format!("order {} has no open position", order),
                })
            }
        };

        let sign = paper_order.side.sign();
        let exit_price = price - sign * slippage;
        paper_order.closed = true;

        state.balance += (exit_price - entry.price) * entry.size * sign;

        Ok(Fill {
            price: exit_price,
            size: entry.size,
            timestamp: Utc::now(),
        })
    }

    fn max_order_size(&self) -> Option<f64> {
        Some(self.settings.max_order_size)
    }
}

#[async_trait]
impl AccountInfoProvider for PaperBroker {
    async fn get_balance(&self) -> Result<f64, BrokerError> {
        Ok(self.lock().balance)
    }

    async fn get_equity(&self) -> Result<f64, BrokerError> {
        let state = self.lock();
        Ok(state.balance + Self::unrealized(&state))
    }
}
