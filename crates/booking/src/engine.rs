//! The create-booking workflow.
//!
//! One engine call runs reserve → charge → compensate-on-failure:
//! stock decrement and ledger insert share a single unit of work,
//! payment happens outside it under a timeout, and a failed payment
//! undoes both writes. Replays are answered from the idempotency cache
//! when possible and from the ledger's unique key otherwise.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use common::TierId;
use storage::{LedgerInsert, NewBooking, ReservationStore, StockReservation};

use crate::bus::{StockChangeBus, StockChangeEvent};
use crate::cache::{DEFAULT_TTL, IdempotencyCache, IdempotencyRecord};
use crate::error::BookingError;
use crate::gateway::PaymentGateway;

/// How long the engine waits for the gateway before treating the
/// charge as declined.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A request to purchase tickets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub tier_id: TierId,
    pub user_email: String,
    pub quantity: i32,
    /// Client-claimed total, re-derived server side before any write.
    pub total_price_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
}

enum ReserveOutcome {
    Reserved {
        booking: storage::Booking,
        available_quantity: i32,
    },
    Replayed(storage::Booking),
}

/// Orchestrates booking creation over a store, a payment gateway, an
/// idempotency cache, and a stock-change bus.
///
/// The engine is stateless per call; mutual exclusion lives in the
/// store's conditional decrement.
pub struct BookingEngine<S, G, C>
where
    S: ReservationStore,
    G: PaymentGateway,
    C: IdempotencyCache,
{
    store: S,
    gateway: G,
    cache: C,
    bus: StockChangeBus,
    payment_timeout: Duration,
    cache_ttl: Duration,
}

impl<S, G, C> BookingEngine<S, G, C>
where
    S: ReservationStore,
    G: PaymentGateway,
    C: IdempotencyCache,
{
    /// Creates a new engine with the default payment timeout and cache
    /// TTL.
    pub fn new(store: S, gateway: G, cache: C, bus: StockChangeBus) -> Self {
        Self {
            store,
            gateway,
            cache,
            bus,
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            cache_ttl: DEFAULT_TTL,
        }
    }

    /// Overrides the payment timeout.
    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    /// Overrides the idempotency-record TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Creates a booking, or replays the stored response for a key the
    /// system has already completed.
    ///
    /// `path` is recorded in the idempotency record for audit.
    #[tracing::instrument(
        skip(self, request),
        fields(
            tier_id = %request.tier_id,
            quantity = request.quantity,
            idempotency_key = %request.idempotency_key,
        )
    )]
    pub async fn create(
        &self,
        request: CreateBookingRequest,
        path: &str,
    ) -> Result<storage::Booking, BookingError> {
        metrics::counter!("bookings_requested_total").increment(1);
        let workflow_start = Instant::now();

        // 1. Cache fast path. Cache failures degrade to a miss.
        match self.cache.find_by_key(&request.idempotency_key).await {
            Ok(Some(record)) => {
                metrics::counter!("bookings_idempotent_replays_total").increment(1);
                tracing::info!("replaying cached response");
                return Ok(record.response);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "idempotency cache read failed, treating as miss");
            }
        }

        // 2. Ledger backstop.
        if let Some(existing) = self
            .store
            .find_booking_by_key(&request.idempotency_key)
            .await?
        {
            metrics::counter!("bookings_idempotent_replays_total").increment(1);
            tracing::info!(booking_id = %existing.id, "replaying booking from ledger");
            return Ok(existing);
        }

        // 3. Tier must exist.
        let tier = self
            .store
            .find_tier(request.tier_id)
            .await?
            .ok_or(BookingError::TierNotFound(request.tier_id))?;

        // 4. Re-derive the price before any mutation. An overflowing
        // product can never match an honest client total, so it is
        // rejected the same way as a mismatch.
        let Some(expected_cents) = tier.price_cents.checked_mul(i64::from(request.quantity))
        else {
            return Err(BookingError::InvalidPayment {
                expected_cents: i64::MAX,
                claimed_cents: request.total_price_cents,
            });
        };
        if expected_cents != request.total_price_cents {
            return Err(BookingError::InvalidPayment {
                expected_cents,
                claimed_cents: request.total_price_cents,
            });
        }

        // 5. Decrement stock and insert the ledger row in one unit.
        let (booking, available_quantity) = match self.reserve(&request).await? {
            ReserveOutcome::Reserved {
                booking,
                available_quantity,
            } => (booking, available_quantity),
            ReserveOutcome::Replayed(existing) => {
                metrics::counter!("bookings_idempotent_replays_total").increment(1);
                return Ok(existing);
            }
        };

        // 6. Charge outside the transaction; timeout counts as decline.
        let charge = tokio::time::timeout(
            self.payment_timeout,
            self.gateway
                .charge(request.total_price_cents, &request.currency),
        )
        .await;

        let failure = match charge {
            Ok(Ok(result)) => {
                tracing::info!(charge_id = %result.charge_id, "payment approved");
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "gateway timed out after {}ms",
                self.payment_timeout.as_millis()
            )),
        };

        // 7. Any payment failure undoes both writes.
        if let Some(reason) = failure {
            metrics::counter!("bookings_payment_failed_total").increment(1);
            tracing::warn!(booking_id = %booking.id, reason, "payment failed, compensating");
            self.compensate(&booking).await?;
            return Err(BookingError::PaymentFailed(reason));
        }

        // 8. Announce the new stock level and cache the response.
        self.bus.publish(StockChangeEvent {
            concert_id: tier.concert_id,
            tier_id: tier.id,
            available_quantity,
        });

        let record = IdempotencyRecord {
            key: request.idempotency_key.clone(),
            user_email: request.user_email.clone(),
            path: path.to_string(),
            request: serde_json::to_value(&request).unwrap_or(serde_json::Value::Null),
            response: booking.clone(),
            status: 201,
            created_at: Utc::now(),
        };
        if let Err(e) = self.cache.create(record, self.cache_ttl).await {
            tracing::warn!(error = %e, "idempotency cache write failed");
        }

        metrics::counter!("bookings_created_total").increment(1);
        metrics::histogram!("booking_workflow_duration_seconds")
            .record(workflow_start.elapsed().as_secs_f64());
        tracing::info!(booking_id = %booking.id, available_quantity, "booking created");

        Ok(booking)
    }

    /// Subscribes to stock-change events published by this engine.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StockChangeEvent> {
        self.bus.subscribe()
    }

    /// Runs the conditional decrement and ledger insert in one unit of
    /// work. Every path explicitly commits or rolls back.
    async fn reserve(&self, request: &CreateBookingRequest) -> Result<ReserveOutcome, BookingError> {
        let mut unit = self.store.begin().await?;

        let available_quantity = match unit
            .reserve_stock(request.tier_id, request.quantity)
            .await
        {
            Ok(StockReservation::Reserved { available_quantity }) => available_quantity,
            Ok(StockReservation::Insufficient) => {
                unit.rollback().await?;
                metrics::counter!("bookings_oversell_rejected_total").increment(1);
                return Err(BookingError::OutOfStock(request.tier_id));
            }
            Err(e) => {
                unit.rollback().await?;
                return Err(e.into());
            }
        };

        let new_booking = NewBooking {
            tier_id: request.tier_id,
            user_email: request.user_email.clone(),
            quantity: request.quantity,
            total_price_cents: request.total_price_cents,
            idempotency_key: request.idempotency_key.clone(),
        };

        match unit.insert_booking(new_booking).await {
            Ok(LedgerInsert::Created(booking)) => {
                unit.commit().await?;
                Ok(ReserveOutcome::Reserved {
                    booking,
                    available_quantity,
                })
            }
            Ok(LedgerInsert::DuplicateKey) => {
                // A concurrent request with the same key won between the
                // backstop read and this insert. Hand back its booking.
                unit.rollback().await?;
                match self
                    .store
                    .find_booking_by_key(&request.idempotency_key)
                    .await?
                {
                    Some(existing) => Ok(ReserveOutcome::Replayed(existing)),
                    None => Err(BookingError::Conflict(format!(
                        "booking for key {} was compensated mid-flight",
                        request.idempotency_key
                    ))),
                }
            }
            Err(e) => {
                unit.rollback().await?;
                Err(e.into())
            }
        }
    }

    /// Undoes a committed reservation after a failed payment. Both the
    /// ledger delete and the stock release must succeed.
    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn compensate(&self, booking: &storage::Booking) -> Result<(), BookingError> {
        let deleted = self.store.delete_booking(booking.id).await;
        let released = self
            .store
            .release_stock(booking.tier_id, booking.quantity)
            .await;

        match (deleted, released) {
            (Ok(()), Ok(())) => {
                tracing::info!("compensation completed");
                Ok(())
            }
            (deleted, released) => {
                metrics::counter!("bookings_compensation_failed_total").increment(1);
                let reason = [deleted.err(), released.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                tracing::error!(reason, "compensation failed, manual repair required");
                Err(BookingError::CompensationFailed {
                    booking_id: booking.id.to_string(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryIdempotencyCache;
    use crate::gateway::InMemoryPaymentGateway;
    use common::ConcertId;
    use storage::{InMemoryReservationStore, TicketTier};

    const PRICE_CENTS: i64 = 5_000;

    async fn setup(
        stock: i32,
    ) -> (
        BookingEngine<InMemoryReservationStore, InMemoryPaymentGateway, InMemoryIdempotencyCache>,
        InMemoryReservationStore,
        InMemoryPaymentGateway,
        InMemoryIdempotencyCache,
        TierId,
    ) {
        let store = InMemoryReservationStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let cache = InMemoryIdempotencyCache::new();
        let bus = StockChangeBus::new();

        let tier = TicketTier {
            id: TierId::new(),
            concert_id: ConcertId::new(),
            name: "General Admission".to_string(),
            price_cents: PRICE_CENTS,
            total_quantity: stock,
            available_quantity: stock,
            created_at: Utc::now(),
        };
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let engine = BookingEngine::new(store.clone(), gateway.clone(), cache.clone(), bus);
        (engine, store, gateway, cache, tier_id)
    }

    fn request(tier_id: TierId, quantity: i32, key: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            tier_id,
            user_email: "buyer@example.com".to_string(),
            quantity,
            total_price_cents: PRICE_CENTS * i64::from(quantity),
            currency: "USD".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn happy_path_books_charges_and_publishes() {
        let (engine, store, gateway, cache, tier_id) = setup(10).await;
        let mut events = engine.subscribe();

        let booking = engine
            .create(request(tier_id, 3, "key-happy-path-1"), "/bookings")
            .await
            .unwrap();

        assert_eq!(booking.quantity, 3);
        assert_eq!(booking.total_price_cents, 15_000);
        assert_eq!(store.available_quantity(tier_id).await, Some(7));
        assert_eq!(store.booking_count().await, 1);
        assert_eq!(gateway.charge_count(), 1);
        assert_eq!(cache.len(), 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.tier_id, tier_id);
        assert_eq!(event.available_quantity, 7);
    }

    #[tokio::test]
    async fn cache_hit_replays_without_side_effects() {
        let (engine, store, gateway, _cache, tier_id) = setup(10).await;

        let first = engine
            .create(request(tier_id, 2, "key-cache-replay"), "/bookings")
            .await
            .unwrap();
        let second = engine
            .create(request(tier_id, 2, "key-cache-replay"), "/bookings")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.available_quantity(tier_id).await, Some(8));
        assert_eq!(store.booking_count().await, 1);
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn ledger_backstop_replays_when_cache_is_cold() {
        let (engine, store, gateway, cache, tier_id) = setup(10).await;

        let first = engine
            .create(request(tier_id, 2, "key-ledger-replay"), "/bookings")
            .await
            .unwrap();
        cache.clear();

        let second = engine
            .create(request(tier_id, 2, "key-ledger-replay"), "/bookings")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.available_quantity(tier_id).await, Some(8));
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn unknown_tier_is_rejected() {
        let (engine, _store, gateway, _cache, _tier_id) = setup(10).await;

        let missing = TierId::new();
        let err = engine
            .create(request(missing, 1, "key-unknown-tier"), "/bookings")
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::TierNotFound(id) if id == missing));
        assert_eq!(gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn price_mismatch_is_rejected_before_any_mutation() {
        let (engine, store, gateway, cache, tier_id) = setup(10).await;
        let mut events = engine.subscribe();

        let mut tampered = request(tier_id, 2, "key-price-tamper");
        tampered.total_price_cents = 1;

        let err = engine.create(tampered, "/bookings").await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidPayment {
                expected_cents: 10_000,
                claimed_cents: 1,
            }
        ));

        assert_eq!(store.available_quantity(tier_id).await, Some(10));
        assert_eq!(store.booking_count().await, 0);
        assert_eq!(gateway.charge_count(), 0);
        assert!(cache.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn overflowing_price_product_is_rejected_before_any_mutation() {
        let (engine, store, gateway, _cache, _tier_id) = setup(10).await;

        let tier = TicketTier {
            id: TierId::new(),
            concert_id: ConcertId::new(),
            name: "Numeric Edge".to_string(),
            price_cents: i64::MAX,
            total_quantity: 10,
            available_quantity: 10,
            created_at: Utc::now(),
        };
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut oversized = request(tier_id, 2, "key-price-overflow");
        oversized.total_price_cents = i64::MAX;

        let err = engine.create(oversized, "/bookings").await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidPayment { .. }));
        assert_eq!(store.available_quantity(tier_id).await, Some(10));
        assert_eq!(store.booking_count().await, 0);
        assert_eq!(gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn oversized_request_is_out_of_stock() {
        let (engine, store, gateway, _cache, tier_id) = setup(2).await;

        let err = engine
            .create(request(tier_id, 3, "key-oversell"), "/bookings")
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::OutOfStock(id) if id == tier_id));
        assert_eq!(store.available_quantity(tier_id).await, Some(2));
        assert_eq!(store.booking_count().await, 0);
        assert_eq!(gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn declined_payment_restores_stock_and_removes_the_booking() {
        let (engine, store, gateway, cache, tier_id) = setup(10).await;
        let mut events = engine.subscribe();
        gateway.set_fail_on_charge(true);

        let err = engine
            .create(request(tier_id, 4, "key-declined"), "/bookings")
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::PaymentFailed(_)));
        assert_eq!(store.available_quantity(tier_id).await, Some(10));
        assert_eq!(store.booking_count().await, 0);
        assert_eq!(gateway.charge_count(), 1);
        assert!(cache.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn retry_after_decline_reattempts_the_purchase() {
        let (engine, store, gateway, _cache, tier_id) = setup(10).await;
        gateway.set_fail_on_charge(true);

        let err = engine
            .create(request(tier_id, 1, "key-retry-after-fail"), "/bookings")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::PaymentFailed(_)));

        gateway.set_fail_on_charge(false);
        let booking = engine
            .create(request(tier_id, 1, "key-retry-after-fail"), "/bookings")
            .await
            .unwrap();

        assert_eq!(booking.quantity, 1);
        assert_eq!(store.available_quantity(tier_id).await, Some(9));
        assert_eq!(gateway.charge_count(), 2);
    }

    #[tokio::test]
    async fn slow_gateway_counts_as_a_decline() {
        let (engine, store, gateway, _cache, tier_id) = setup(10).await;
        gateway.set_delay(Duration::from_millis(100));
        let engine = engine.with_payment_timeout(Duration::from_millis(10));

        let err = engine
            .create(request(tier_id, 2, "key-gateway-timeout"), "/bookings")
            .await
            .unwrap_err();

        match err {
            BookingError::PaymentFailed(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected PaymentFailed, got {other:?}"),
        }
        assert_eq!(store.available_quantity(tier_id).await, Some(10));
        assert_eq!(store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn each_committed_booking_publishes_its_own_quantity() {
        let (engine, _store, _gateway, _cache, tier_id) = setup(10).await;
        let mut events = engine.subscribe();

        engine
            .create(request(tier_id, 3, "key-event-seq-1"), "/bookings")
            .await
            .unwrap();
        engine
            .create(request(tier_id, 2, "key-event-seq-2"), "/bookings")
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap().available_quantity, 7);
        assert_eq!(events.recv().await.unwrap().available_quantity, 5);
        assert!(events.try_recv().is_err());
    }
}
