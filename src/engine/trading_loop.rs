use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::context::{CycleReport, EngineContext, SignalRecord};
use crate::config::AppConfig;
use crate::execution::{BrokerGateway, Position, PriceFeed};
use crate::metrics::PerformanceSummary;
use crate::risk::AccountState;

/// Result of a control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Resumed,
    NotHalted,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    feed: PriceFeed,
}

/// Drives [`EngineContext`] cycles on a fixed interval with a price feed
///
/// Lifecycle: `new -> start -> stop`, restartable. Stopping waits for the
/// in-flight cycle and never closes positions.
pub struct TradingEngine {
    context: Arc<Mutex<EngineContext>>,
    gateway: BrokerGateway,
    symbol: String,
    poll_interval: Duration,
    feed_capacity: usize,
    running: Mutex<Option<RunningLoop>>,
    cycles: Arc<watch::Sender<u64>>,
}

impl TradingEngine {
    pub fn new(config: &AppConfig, gateway: BrokerGateway) -> Self {
        let context = EngineContext::new(config, gateway.clone(), Utc::now());
        Self::with_context(config, gateway, context)
    }

    pub fn with_context(config: &AppConfig, gateway: BrokerGateway, context: EngineContext) -> Self {
        let (cycles, _) = watch::channel(0);
        Self {
            context: Arc::new(Mutex::new(context)),
            gateway,
            symbol: config.symbol.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            feed_capacity: config.feed_capacity,
            running: Mutex::new(None),
            cycles: Arc::new(cycles),
        }
    }

    /// Override the cycle and quote polling interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawn the price feed and the cycle loop
    pub async fn start(&self) -> ControlOutcome {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return ControlOutcome::AlreadyRunning;
        }

        let (feed, quotes) = PriceFeed::spawn(
            self.gateway.clone(),
            self.symbol.clone(),
            self.poll_interval,
            self.feed_capacity,
        );
        self.context.lock().await.attach_feed(quotes);

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let context = self.context.clone();
        let cycles = self.cycles.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let report = context.lock().await.run_cycle(Utc::now()).await;
                        log_report(&report);
                        cycles.send_modify(|count| *count += 1);
                    }
                }
            }
        });

        *running = Some(RunningLoop {
            shutdown,
            task,
            feed,
        });
        tracing::info!(symbol = %self.symbol, interval_secs = self.poll_interval.as_secs_f64(), "Trading engine started");
        ControlOutcome::Started
    }

    /// Stop after the in-flight cycle; open positions are left as they are
    pub async fn stop(&self) -> ControlOutcome {
        let Some(mut running) = self.running.lock().await.take() else {
            return ControlOutcome::AlreadyStopped;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            tracing::error!("Trading loop task failed: {}", e);
        }
        running.feed.stop().await;
        self.context.lock().await.detach_feed();

        tracing::info!(symbol = %self.symbol, "Trading engine stopped");
        ControlOutcome::Stopped
    }

    /// Operator override clearing a drawdown halt
    pub async fn resume(&self) -> ControlOutcome {
        if self.context.lock().await.resume() {
            ControlOutcome::Resumed
        } else {
            ControlOutcome::NotHalted
        }
    }

    /// Run a single cycle outside the timer
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let report = self.context.lock().await.run_cycle(now).await;
        self.cycles.send_modify(|count| *count += 1);
        report
    }

    /// Watch the number of completed cycles
    pub fn subscribe_cycles(&self) -> watch::Receiver<u64> {
        self.cycles.subscribe()
    }

    pub async fn account_state(&self) -> AccountState {
        self.context.lock().await.account().clone()
    }

    /// Most recent positions, newest first
    pub async fn recent_positions(&self, n: usize) -> Vec<Position> {
        self.context.lock().await.positions().recent_positions(n)
    }

    pub async fn signal_log(&self) -> Vec<SignalRecord> {
        self.context.lock().await.signal_log()
    }

    pub async fn performance(&self) -> PerformanceSummary {
        let context = self.context.lock().await;
        PerformanceSummary::from_positions(context.positions().all_positions())
    }
}

fn log_report(report: &CycleReport) {
    for trade in &report.closed {
        tracing::info!(position_id = %trade.id, reason = ?trade.reason, pnl = trade.pnl, "Trade closed");
    }
    for error in &report.errors {
        tracing::warn!("Cycle error: {}", error);
    }
    if let Some(entry) = &report.entry {
        tracing::debug!(direction = ?entry.signal.direction, outcome = ?entry.outcome, "{}", entry.signal.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::BrokerSettings;
    use crate::execution::paper_broker::{PaperBroker, PaperSettings};

    fn engine() -> (Arc<PaperBroker>, TradingEngine) {
        let config = AppConfig::default();
        let broker = Arc::new(PaperBroker::new(config.paper_settings()));
        let gateway = BrokerGateway::new(
            broker.clone(),
            broker.clone(),
            BrokerSettings {
                requests_per_second: 1000,
                ..Default::default()
            },
        );
        let engine = TradingEngine::new(&config, gateway).with_poll_interval(Duration::from_millis(10));
        (broker, engine)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (_broker, engine) = engine();
        assert_eq!(engine.start().await, ControlOutcome::Started);
        assert_eq!(engine.start().await, ControlOutcome::AlreadyRunning);
        assert!(engine.is_running().await);
        assert_eq!(engine.stop().await, ControlOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_stopped() {
        let (_broker, engine) = engine();
        assert_eq!(engine.stop().await, ControlOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_cycles_run_and_bars_arrive() {
        let (_broker, engine) = engine();
        let mut cycles = engine.subscribe_cycles();
        engine.start().await;

        cycles.wait_for(|count| *count >= 3).await.unwrap();
        assert_eq!(engine.stop().await, ControlOutcome::Stopped);
        assert!(!engine.is_running().await);

        let log = engine.signal_log().await;
        assert!(!log.is_empty());
        assert!(log.iter().all(|r| !r.signal.is_actionable()));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (_broker, engine) = engine();
        engine.start().await;
        engine.stop().await;
        assert_eq!(engine.start().await, ControlOutcome::Started);
        assert_eq!(engine.stop().await, ControlOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_resume_when_not_halted() {
        let (_broker, engine) = engine();
        assert_eq!(engine.resume().await, ControlOutcome::NotHalted);
    }
}
