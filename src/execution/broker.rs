use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::BrokerError;
use crate::models::{Fill, OrderRef, OrderRequest, OrderStatus, PriceBar};

/// Order-routing capability of the external broker
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<PriceBar, BrokerError>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderRef, BrokerError>;

    async fn get_order_status(&self, order: &OrderRef) -> Result<OrderStatus, BrokerError>;

    async fn cancel_order(&self, order: &OrderRef) -> Result<(), BrokerError>;

    /// Flatten the position opened by `order` at market
    async fn close_position(&self, order: &OrderRef) -> Result<Fill, BrokerError>;

    /// Largest order the broker accepts, if it advertises one
    fn max_order_size(&self) -> Option<f64> {
        None
    }
}

/// Account balance/equity capability of the external broker
#[async_trait]
pub trait AccountInfoProvider: Send + Sync {
    async fn get_balance(&self) -> Result<f64, BrokerError>;

    async fn get_equity(&self) -> Result<f64, BrokerError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub call_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub requests_per_second: u32,
    /// PENDING orders older than this are cancelled and marked ERROR
    pub fill_timeout_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            max_retries: 3,
            backoff_base_ms: 250,
            requests_per_second: 10,
            fill_timeout_secs: 30,
        }
    }
}

// Type alias for the rate limiter to simplify signatures
type BrokerRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Broker access with per-call timeouts, throttling and retry policy
///
/// Idempotent calls (quotes, status, cancel, balance, equity) retry on
/// timeouts and rate limits. Order submission and position close retry only
/// on `RateLimited`, where the broker provably did not act on the request.
/// Submissions are serialised through a lock.
///
/// Cloneable; all clones share the same limiter and submission lock.
#[derive(Clone)]
pub struct BrokerGateway {
    client: Arc<dyn BrokerClient>,
    account: Arc<dyn AccountInfoProvider>,
    rate_limiter: Arc<BrokerRateLimiter>,
    submission_lock: Arc<Mutex<()>>,
    settings: BrokerSettings,
}

fn retry_transient(error: &BrokerError) -> bool {
    error.is_retryable()
}

fn retry_rate_limited(error: &BrokerError) -> bool {
    matches!(error, BrokerError::RateLimited { .. })
}

impl BrokerGateway {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        account: Arc<dyn AccountInfoProvider>,
        settings: BrokerSettings,
    ) -> Self {
        let rps = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Self {
            client,
            account,
            rate_limiter,
            submission_lock: Arc::new(Mutex::new(())),
            settings,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn max_order_size(&self) -> Option<f64> {
        self.client.max_order_size()
    }

    /// One throttled, time-bounded attempt
    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, BrokerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        self.rate_limiter.until_ready().await;

        let timeout = Duration::from_millis(self.settings.call_timeout_ms);
        match tokio::time::timeout(timeout, f()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.settings.call_timeout_ms, "Broker call timed out");
                Err(BrokerError::Timeout)
            }
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        should_retry: fn(&BrokerError) -> bool,
        f: F,
    ) -> Result<T, BrokerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.call(op, &f).await {
                Ok(value) => return Ok(value),
                Err(e) if should_retry(&e) && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let backoff = match &e {
                        BrokerError::RateLimited {
                            retry_after: Some(wait),
                        } => *wait,
                        _ => Duration::from_millis(
                            self.settings.backoff_base_ms * 2u64.pow(attempt - 1),
                        ),
                    };
                    tracing::warn!(
                        "{} failed: {}, retrying in {}ms (attempt {}/{})",
                        op,
                        e,
                        backoff.as_millis(),
                        attempt,
                        self.settings.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<PriceBar, BrokerError> {
        self.with_retry("get_quote", retry_transient, || {
            self.client.get_quote(symbol)
        })
        .await
    }

    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderRef, BrokerError> {
        let _guard = self.submission_lock.lock().await;
        self.with_retry("submit_order", retry_rate_limited, || {
            self.client.submit_order(order)
        })
        .await
    }

    pub async fn get_order_status(&self, order: &OrderRef) -> Result<OrderStatus, BrokerError> {
        self.with_retry("get_order_status", retry_transient, || {
            self.client.get_order_status(order)
        })
        .await
    }

    pub async fn cancel_order(&self, order: &OrderRef) -> Result<(), BrokerError> {
        self.with_retry("cancel_order", retry_transient, || {
            self.client.cancel_order(order)
        })
        .await
    }

    pub async fn close_position(&self, order: &OrderRef) -> Result<Fill, BrokerError> {
        self.with_retry("close_position", retry_rate_limited, || {
            self.client.close_position(order)
        })
        .await
    }

    pub async fn get_balance(&self) -> Result<f64, BrokerError> {
        self.with_retry("get_balance", retry_transient, || self.account.get_balance())
            .await
    }

    pub async fn get_equity(&self) -> Result<f64, BrokerError> {
        self.with_retry("get_equity", retry_transient, || self.account.get_equity())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::paper_broker::{PaperBroker, PaperSettings};
    use crate::models::Side;

    fn fast_settings() -> BrokerSettings {
        BrokerSettings {
            call_timeout_ms: 50,
            max_retries: 2,
            backoff_base_ms: 1,
            requests_per_second: 1000,
            fill_timeout_secs: 30,
        }
    }

    fn gateway_for(broker: Arc<PaperBroker>) -> BrokerGateway {
        BrokerGateway::new(broker.clone(), broker, fast_settings())
    }

    fn order() -> OrderRequest {
        OrderRequest {
            symbol: "XAUUSD".to_string(),
            side: Side::Buy,
            size: 0.1,
            stop_loss: 2370.0,
            take_profit: 2460.0,
        }
    }

    #[tokio::test]
    async fn test_quote_retries_on_timeout() {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        broker.fail_next_quote(BrokerError::Timeout);
        let gateway = gateway_for(broker.clone());

        let quote = gateway.get_quote("XAUUSD").await.unwrap();
        assert!(quote.close > 0.0);
    }

    #[tokio::test]
    async fn test_quote_gives_up_after_max_retries() {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        for _ in 0..3 {
            broker.fail_next_quote(BrokerError::Timeout);
        }
        let gateway = gateway_for(broker.clone());

        assert_eq!(gateway.get_quote("XAUUSD").await, Err(BrokerError::Timeout));
    }

    #[tokio::test]
    async fn test_submit_not_retried_on_rejection() {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        broker.fail_next_submit(BrokerError::Rejected {
            reason: "insufficient margin".to_string(),
        });
        let gateway = gateway_for(broker.clone());

        let result = gateway.submit_order(&order()).await;
        assert!(matches!(result, Err(BrokerError::Rejected { .. })));
        assert_eq!(broker.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_not_retried_on_timeout() {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        broker.fail_next_submit(BrokerError::Timeout);
        let gateway = gateway_for(broker.clone());

        assert_eq!(
            gateway.submit_order(&order()).await,
            Err(BrokerError::Timeout)
        );
        assert_eq!(broker.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_retried_on_rate_limit() {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        broker.fail_next_submit(BrokerError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        });
        let gateway = gateway_for(broker.clone());

        let order_ref = gateway.submit_order(&order()).await.unwrap();
        assert!(!order_ref.0.is_empty());
        assert_eq!(broker.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let broker = Arc::new(PaperBroker::new(PaperSettings::default()));
        broker.set_latency(Duration::from_millis(200));
        let gateway = BrokerGateway::new(
            broker.clone(),
            broker.clone(),
            BrokerSettings {
                max_retries: 0,
                ..fast_settings()
            },
        );

        assert_eq!(gateway.get_quote("XAUUSD").await, Err(BrokerError::Timeout));
    }
}
