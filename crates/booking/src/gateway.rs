//! Payment gateway trait, simulated implementation, and test double.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Errors from the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The charge was declined.
    #[error("Payment declined")]
    Declined,

    /// The gateway could not be reached or errored out.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// Result of a successful charge.
#[derive(Debug, Clone)]
pub struct ChargeResult {
    /// The charge ID assigned by the gateway.
    pub charge_id: String,
}

/// Trait for charging a buyer.
///
/// Implementations run outside the reservation transaction; the engine
/// wraps calls in a timeout and treats timeouts as declines.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges the given amount. Currency is an ISO 4217 code.
    async fn charge(&self, amount_cents: i64, currency: &str)
    -> Result<ChargeResult, GatewayError>;
}

/// Simulated gateway with random latency and a configurable approval
/// rate. Stands in for a real payment provider in demos and load tests.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentGateway {
    approval_rate: f64,
    min_latency: Duration,
    max_latency: Duration,
}

impl SimulatedPaymentGateway {
    /// Creates a gateway approving roughly 80% of charges with
    /// 200-800ms of latency.
    pub fn new() -> Self {
        Self {
            approval_rate: 0.8,
            min_latency: Duration::from_millis(200),
            max_latency: Duration::from_millis(800),
        }
    }

    /// Overrides the approval rate. Clamped to [0, 1].
    pub fn with_approval_rate(mut self, rate: f64) -> Self {
        self.approval_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Overrides the latency range.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }
}

impl Default for SimulatedPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(
        &self,
        amount_cents: i64,
        currency: &str,
    ) -> Result<ChargeResult, GatewayError> {
        // Roll before the await; ThreadRng cannot be held across it.
        let (latency, approved) = {
            let mut rng = rand::thread_rng();
            let latency = rng.gen_range(self.min_latency..=self.max_latency);
            (latency, rng.gen_bool(self.approval_rate))
        };

        tokio::time::sleep(latency).await;

        if !approved {
            tracing::info!(amount_cents, currency, "simulated gateway declined charge");
            return Err(GatewayError::Declined);
        }

        Ok(ChargeResult {
            charge_id: format!("ch_{}", uuid::Uuid::new_v4().simple()),
        })
    }
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: Vec<(i64, String)>,
    next_id: u32,
    fail_on_charge: bool,
    delay: Option<Duration>,
}

/// Deterministic in-memory gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to decline subsequent charges.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Injects latency before each charge resolves. Used to exercise
    /// the engine's payment timeout.
    pub fn set_delay(&self, delay: Duration) {
        self.state.write().unwrap().delay = Some(delay);
    }

    /// Returns the number of charges attempted, approved or not.
    pub fn charge_count(&self) -> usize {
        self.state.read().unwrap().next_id as usize
    }

    /// Returns the number of approved charges.
    pub fn approved_count(&self) -> usize {
        self.state.read().unwrap().charges.len()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(
        &self,
        amount_cents: i64,
        currency: &str,
    ) -> Result<ChargeResult, GatewayError> {
        let (delay, fail, charge_id) = {
            let mut state = self.state.write().unwrap();
            state.next_id += 1;
            (
                state.delay,
                state.fail_on_charge,
                format!("ch_{:04}", state.next_id),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(GatewayError::Declined);
        }

        self.state
            .write()
            .unwrap()
            .charges
            .push((amount_cents, currency.to_string()));

        Ok(ChargeResult { charge_id })
    }
}
