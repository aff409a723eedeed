use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::execution::position_manager::{ClosedTrade, ExitReason};
use crate::execution::{drain_queue, BarBuffer, BrokerGateway, PositionManager};
use crate::models::{PriceBar, Signal};
use crate::risk::{AccountState, RiskManager, RiskRejection};
use crate::strategy::{evaluate_history, ConfluenceStrategy, Strategy};

/// What happened to an evaluated signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalOutcome {
    Hold,
    Submitted { position_id: Uuid },
    Rejected { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal: Signal,
    pub outcome: SignalOutcome,
}

/// Summary of one engine cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub bars_ingested: usize,
    pub price: Option<f64>,
    pub halted: bool,
    /// Circuit breaker that blocked entries this cycle
    pub breaker: Option<RiskRejection>,
    pub filled: Vec<Uuid>,
    pub closed: Vec<ClosedTrade>,
    pub entry: Option<SignalRecord>,
    pub errors: Vec<String>,
}

impl CycleReport {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bars_ingested: 0,
            price: None,
            halted: false,
            breaker: None,
            filled: Vec::new(),
            closed: Vec::new(),
            entry: None,
            errors: Vec::new(),
        }
    }
}

/// All mutable engine state
///
/// Owned by the engine and only touched by one cycle at a time.
pub struct EngineContext {
    strategy: Box<dyn Strategy>,
    risk: RiskManager,
    positions: PositionManager,
    gateway: BrokerGateway,
    account: AccountState,
    bars: BarBuffer,
    quotes: Option<mpsc::Receiver<PriceBar>>,
    signal_log: VecDeque<SignalRecord>,
    signal_log_capacity: usize,
    /// Timestamp of the bar behind the last BUY/SELL that reached risk checks
    last_entry_bar: Option<DateTime<Utc>>,
}

impl EngineContext {
    /// Context running the confluence strategy from `config`
    pub fn new(config: &AppConfig, gateway: BrokerGateway, now: DateTime<Utc>) -> Self {
        let strategy = ConfluenceStrategy::new(config.indicators.clone(), config.strategy.clone());
        Self::with_strategy(config, gateway, Box::new(strategy), now)
    }

    pub fn with_strategy(
        config: &AppConfig,
        gateway: BrokerGateway,
        strategy: Box<dyn Strategy>,
        now: DateTime<Utc>,
    ) -> Self {
        let risk = RiskManager::new(config.risk.clone()).with_broker_max_size(gateway.max_order_size());
        let fill_timeout = Duration::seconds(gateway.settings().fill_timeout_secs as i64);
        let positions = PositionManager::new(
            gateway.clone(),
            config.symbol.clone(),
            config.risk.max_concurrent_positions,
            fill_timeout,
        )
        .with_history_capacity(config.position_history_capacity);

        Self {
            strategy,
            risk,
            positions,
            gateway,
            account: AccountState::new(config.initial_balance, now),
            bars: BarBuffer::new(config.history_bars),
            quotes: None,
            signal_log: VecDeque::with_capacity(config.signal_log_capacity),
            signal_log_capacity: config.signal_log_capacity.max(1),
            last_entry_bar: None,
        }
    }

    /// Read bars from this queue at the start of every cycle
    pub fn attach_feed(&mut self, quotes: mpsc::Receiver<PriceBar>) {
        self.quotes = Some(quotes);
    }

    pub fn detach_feed(&mut self) -> Option<mpsc::Receiver<PriceBar>> {
        self.quotes.take()
    }

    /// Append a bar directly to the history
    pub fn ingest(&mut self, bar: PriceBar) -> bool {
        self.bars.push(bar)
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn bars(&self) -> &BarBuffer {
        &self.bars
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Signal log, oldest first
    pub fn signal_log(&self) -> Vec<SignalRecord> {
        self.signal_log.iter().cloned().collect()
    }

    /// Operator override clearing a halt
    pub fn resume(&mut self) -> bool {
        self.account.resume()
    }

    fn log_signal(&mut self, record: SignalRecord) {
        if self.signal_log.len() >= self.signal_log_capacity {
            self.signal_log.pop_front();
        }
        self.signal_log.push_back(record);
    }

    /// Risk-check a signal and submit the approved trade
    pub async fn enter(&mut self, signal: &Signal, now: DateTime<Utc>) -> Result<Uuid, EngineError> {
        let active = self.positions.active_count();
        let approval = self.risk.assess(signal, &mut self.account, active)?;
        self.positions.open(&approval, now).await
    }

    /// Like [`EngineContext::enter`], but records the outcome in the signal log
    pub async fn try_enter(&mut self, signal: Signal, now: DateTime<Utc>) -> SignalRecord {
        let outcome = if !signal.is_actionable() {
            SignalOutcome::Hold
        } else {
            match self.enter(&signal, now).await {
                Ok(position_id) => SignalOutcome::Submitted { position_id },
                Err(EngineError::RiskLimitBreached(rejection)) => {
                    tracing::warn!(direction = ?signal.direction, "Signal rejected: {}", rejection);
                    SignalOutcome::Rejected {
                        reason: rejection.to_string(),
                    }
                }
                Err(e) => {
                    tracing::error!(direction = ?signal.direction, "Entry failed: {}", e);
                    SignalOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        let record = SignalRecord { signal, outcome };
        self.log_signal(record.clone());
        record
    }

    async fn refresh_account(&mut self, report: &mut CycleReport) {
        match self.gateway.get_balance().await {
            Ok(balance) => self.account.update_balance(balance),
            Err(e) => {
                tracing::warn!("Balance refresh failed: {}", e);
                report.errors.push(format!("balance: {}", e));
            }
        }
        match self.gateway.get_equity().await {
            Ok(equity) => self.account.update_equity(equity),
            Err(e) => {
                tracing::warn!("Equity refresh failed: {}", e);
                report.errors.push(format!("equity: {}", e));
            }
        }
    }

    async fn close_on_strategy_exits(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        let history = self.bars.bars();
        let exits: Vec<(Uuid, ExitReason)> = self
            .positions
            .open_positions()
            .into_iter()
            .filter_map(|p| self.strategy.check_exit(p, &history).map(|reason| (p.id, reason)))
            .collect();

        for (id, reason) in exits {
            match self.positions.close_position(id, reason, now).await {
                Ok(trade) => report.closed.push(trade),
                Err(e) => {
                    tracing::warn!(position_id = %id, "Strategy exit not completed: {}", e);
                    report.errors.push(e.to_string());
                }
            }
        }
    }

    /// Run one full decision cycle
    ///
    /// Failures inside a step are logged and reported; the cycle always
    /// runs to completion.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::new(now);

        if let Some(quotes) = self.quotes.as_mut() {
            for bar in drain_queue(quotes) {
                if self.bars.push(bar) {
                    report.bars_ingested += 1;
                }
            }
        }
        report.price = self.bars.latest().map(|b| b.close);

        self.refresh_account(&mut report).await;
        self.account.roll_periods(now);

        if let Err(rejection) = self.risk.check_circuit_breakers(&mut self.account) {
            tracing::warn!("Entries blocked: {}", rejection);
            report.breaker = Some(rejection);
        }

        report.filled = self.positions.sync_pending(now).await;

        if let Some(price) = report.price {
            let closed = self.positions.monitor(price, now).await;
            report.closed.extend(closed);
            self.close_on_strategy_exits(now, &mut report).await;
        }

        for trade in &report.closed {
            self.account.record_realized(trade.pnl);
        }

        let at_capacity = self.positions.active_count() >= self.risk.limits().max_concurrent_positions;
        if self.account.is_halted() {
            tracing::debug!("Halted, skipping entry evaluation");
        } else if at_capacity {
            tracing::debug!("At position capacity, skipping entry evaluation");
        } else if let Some(bar_time) = self.bars.latest().map(|b| b.timestamp) {
            if self.last_entry_bar.is_some_and(|acted| bar_time <= acted) {
                tracing::debug!(bar = %bar_time, "No new bar since the last entry signal");
            } else {
                let history = self.bars.bars();
                let signal = evaluate_history(self.strategy.as_ref(), &history, now);
                let record = self.try_enter(signal, now).await;
                if record.signal.is_actionable() {
                    self.last_entry_bar = Some(bar_time);
                }
                report.entry = Some(record);
            }
        }

        report.halted = self.account.is_halted();
        tracing::debug!(
            bars = self.bars.len(),
            price = ?report.price,
            equity = self.account.equity,
            open = self.positions.active_count(),
            halted = report.halted,
            "Cycle complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::BrokerSettings;
    use crate::execution::paper_broker::{PaperBroker, PaperSettings};
    use crate::execution::position_manager::PositionStatus;
    use crate::models::SignalDirection;
    use std::sync::Arc;

    fn setup() -> (Arc<PaperBroker>, EngineContext) {
        let config = AppConfig::default();
        let broker = Arc::new(PaperBroker::new(PaperSettings {
            starting_price: 2000.0,
            volatility_pct: 0.0,
            slippage: 0.0,
            ..config.paper_settings()
        }));
        let gateway = BrokerGateway::new(
            broker.clone(),
            broker.clone(),
            BrokerSettings {
                backoff_base_ms: 1,
                requests_per_second: 1000,
                ..Default::default()
            },
        );
        let context = EngineContext::new(&config, gateway, Utc::now());
        (broker, context)
    }

    fn buy_signal(now: DateTime<Utc>) -> Signal {
        Signal {
            direction: SignalDirection::Buy,
            confidence: 0.75,
            stop_loss_distance: 30.0,
            take_profit_distance: 60.0,
            reference_price: 2000.0,
            generated_at: now,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_without_bars_only_refreshes_account() {
        let (broker, mut context) = setup();
        broker.set_balance(10_250.0);

        let report = context.run_cycle(Utc::now()).await;
        assert_eq!(report.bars_ingested, 0);
        assert!(report.price.is_none());
        assert!(report.entry.is_none());
        assert!(report.errors.is_empty());
        assert_eq!(context.account().equity, 10_250.0);
        assert_eq!(context.account().peak_equity, 10_250.0);
    }

    #[tokio::test]
    async fn test_warmup_records_hold() {
        let (_broker, mut context) = setup();
        let now = Utc::now();
        for i in 0..10 {
            context.ingest(PriceBar::flat("XAUUSD", now + Duration::minutes(i), 2000.0));
        }

        let report = context.run_cycle(now + Duration::minutes(10)).await;
        let entry = report.entry.unwrap();
        assert_eq!(entry.outcome, SignalOutcome::Hold);
        assert!(entry.signal.reason.contains("warming up"));
        assert_eq!(context.signal_log().len(), 1);
    }

    #[tokio::test]
    async fn test_enter_then_stop_loss_on_next_cycle() {
        let (broker, mut context) = setup();
        let now = Utc::now();

        let record = context.try_enter(buy_signal(now), now).await;
        let SignalOutcome::Submitted { position_id } = record.outcome else {
            panic!("expected submission, got {:?}", record.outcome);
        };

        // Fill is picked up on the next cycle
        context.ingest(PriceBar::flat("XAUUSD", now, 2000.0));
        let report = context.run_cycle(now).await;
        assert_eq!(report.filled, vec![position_id]);

        broker.set_price(1965.0);
        context.ingest(PriceBar::flat("XAUUSD", now + Duration::minutes(1), 1965.0));
        let report = context.run_cycle(now + Duration::minutes(1)).await;

        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, ExitReason::StopLoss);
        let position = context.positions().get(position_id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert!(context.account().daily_pnl < 0.0);
    }

    #[tokio::test]
    async fn test_hold_signal_is_logged_without_submission() {
        let (broker, mut context) = setup();
        let now = Utc::now();
        let record = context.try_enter(Signal::hold(now, "flat"), now).await;
        assert_eq!(record.outcome, SignalOutcome::Hold);
        assert_eq!(broker.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_log_is_bounded() {
        let (_broker, mut context) = setup();
        let now = Utc::now();
        for i in 0..150 {
            context
                .try_enter(Signal::hold(now, format!("hold {}", i)), now)
                .await;
        }
        let log = context.signal_log();
        assert_eq!(log.len(), 100);
        assert_eq!(log[0].signal.reason, "hold 50");
    }

    #[tokio::test]
    async fn test_day_boundary_resets_peak_to_fresh_equity() {
        let (broker, mut context) = setup();
        let now = Utc::now();
        broker.set_balance(8_800.0);
        assert!(context.run_cycle(now).await.halted);

        broker.set_balance(8_000.0);
        let report = context.run_cycle(now + Duration::days(1)).await;
        assert!(!report.halted);
        assert_eq!(context.account().equity, 8_000.0);
        assert_eq!(context.account().peak_equity, 8_000.0);
    }

    #[test]
    fn test_drawdown_halts_and_rejects_entry() {
        let (broker, mut context) = setup();
        let now = Utc::now();
        broker.set_balance(8_800.0);

        tokio_test::block_on(async {
            let report = context.run_cycle(now).await;
            assert!(report.halted);
            assert!(matches!(
                report.breaker,
                Some(RiskRejection::DrawdownBreached { .. })
            ));

            let record = context.try_enter(buy_signal(now), now).await;
            assert!(matches!(record.outcome, SignalOutcome::Rejected { .. }));
        });
        assert_eq!(broker.submission_count(), 0);
        assert!(context.positions().all_positions().is_empty());

        assert!(context.resume());
        assert!(!context.account().is_halted());
    }
}
