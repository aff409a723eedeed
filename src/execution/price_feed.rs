use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::broker::BrokerGateway;
use crate::models::PriceBar;

/// Background task polling quotes into a bounded queue
///
/// The trading loop drains the queue once per cycle. When the queue is full
/// the newest quote is dropped so the consumer always sees bars in order.
pub struct PriceFeed {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PriceFeed {
    /// Start polling `symbol` every `poll_interval`
    pub fn spawn(
        gateway: BrokerGateway,
        symbol: String,
        poll_interval: Duration,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<PriceBar>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(symbol = %symbol, interval_ms = poll_interval.as_millis() as u64, "Price feed started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match gateway.get_quote(&symbol).await {
                            Ok(bar) => match tx.try_send(bar) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(bar)) => {
                                    tracing::warn!(
                                        symbol = %bar.symbol,
                                        price = bar.close,
                                        "Quote queue full, dropping newest quote"
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => break,
                            },
                            Err(e) => tracing::warn!(symbol = %symbol, "Quote fetch failed: {}", e),
                        }
                    }
                }
            }

            tracing::info!(symbol = %symbol, "Price feed stopped");
        });

        (
            Self {
                shutdown,
                handle: Some(handle),
            },
            rx,
        )
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task to stop and wait for it; an in-flight quote completes first
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Price feed task failed: {}", e);
            }
        }
    }
}

/// Take every bar currently queued without waiting
pub fn drain_queue(rx: &mut mpsc::Receiver<PriceBar>) -> Vec<PriceBar> {
    let mut bars = Vec::new();
    while let Ok(bar) = rx.try_recv() {
        bars.push(bar);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::BrokerSettings;
    use crate::execution::paper_broker::{PaperBroker, PaperSettings};
    use std::sync::Arc;

    fn gateway() -> BrokerGateway {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        BrokerGateway::new(
            broker.clone(),
            broker,
            BrokerSettings {
                requests_per_second: 1000,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_feed_delivers_ordered_quotes() {
        let (mut feed, mut rx) =
            PriceFeed::spawn(gateway(), "XAUUSD".to_string(), Duration::from_millis(5), 64);
        assert!(feed.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        feed.stop().await;
        assert!(!feed.is_running());

        let bars = drain_queue(&mut rx);
        assert!(!bars.is_empty());
        assert!(bars.iter().all(|b| b.symbol == "XAUUSD"));
        for pair in bars.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (mut feed, mut rx) =
            PriceFeed::spawn(gateway(), "XAUUSD".to_string(), Duration::from_millis(2), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        feed.stop().await;

        let bars = drain_queue(&mut rx);
        assert_eq!(bars.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let (_tx, mut rx) = mpsc::channel::<PriceBar>(4);
        assert!(drain_queue(&mut rx).is_empty());
    }
}
