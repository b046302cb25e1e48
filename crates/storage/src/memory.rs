use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use common::{BookingId, TierId};

use crate::Result;
use crate::model::{Booking, NewBooking, TicketTier};
use crate::store::{
    LedgerInsert, ReservationStore, ReservationUnit, StockReservation, validate_quantity,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tiers: HashMap<TierId, TicketTier>,
    bookings: Vec<Booking>,
}

/// In-memory inventory store and booking ledger for testing.
///
/// Mirrors the Postgres contract, including the duplicate-key outcome on
/// insert. A unit takes the whole-store mutex for its lifetime and works
/// on a copy that is swapped in on commit; that serializes writers more
/// coarsely than row locking but preserves the same observable
/// guarantees.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryReservationStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tier directly, bypassing provisioning. Test setup only.
    pub async fn insert_tier(&self, tier: TicketTier) {
        self.state.lock().await.tiers.insert(tier.id, tier);
    }

    /// Returns a tier's current remaining stock.
    pub async fn available_quantity(&self, tier_id: TierId) -> Option<i32> {
        self.state
            .lock()
            .await
            .tiers
            .get(&tier_id)
            .map(|t| t.available_quantity)
    }

    /// Returns the total number of committed bookings.
    pub async fn booking_count(&self) -> usize {
        self.state.lock().await.bookings.len()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn begin(&self) -> Result<Box<dyn ReservationUnit + '_>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryUnit { guard, work }))
    }

    async fn find_tier(&self, tier_id: TierId) -> Result<Option<TicketTier>> {
        Ok(self.state.lock().await.tiers.get(&tier_id).cloned())
    }

    async fn find_booking_by_key(&self, key: &str) -> Result<Option<Booking>> {
        Ok(self
            .state
            .lock()
            .await
            .bookings
            .iter()
            .find(|b| b.idempotency_key == key)
            .cloned())
    }

    async fn release_stock(&self, tier_id: TierId, quantity: i32) -> Result<()> {
        validate_quantity(quantity)?;

        let mut state = self.state.lock().await;
        match state.tiers.get_mut(&tier_id) {
            Some(tier) => tier.available_quantity += quantity,
            None => tracing::warn!(%tier_id, quantity, "tier missing during stock release"),
        }
        Ok(())
    }

    async fn delete_booking(&self, booking_id: BookingId) -> Result<()> {
        self.state
            .lock()
            .await
            .bookings
            .retain(|b| b.id != booking_id);
        Ok(())
    }
}

/// A unit of work over a copy of the store state.
///
/// Holds the store mutex until committed, rolled back, or dropped, so
/// concurrent units observe each other's effects in sequence.
struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl ReservationUnit for MemoryUnit {
    async fn reserve_stock(&mut self, tier_id: TierId, quantity: i32) -> Result<StockReservation> {
        validate_quantity(quantity)?;

        match self.work.tiers.get_mut(&tier_id) {
            Some(tier) if tier.available_quantity >= quantity => {
                tier.available_quantity -= quantity;
                Ok(StockReservation::Reserved {
                    available_quantity: tier.available_quantity,
                })
            }
            // A missing tier matches zero rows, same as insufficiency.
            _ => Ok(StockReservation::Insufficient),
        }
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<LedgerInsert> {
        if self
            .work
            .bookings
            .iter()
            .any(|b| b.idempotency_key == booking.idempotency_key)
        {
            return Ok(LedgerInsert::DuplicateKey);
        }

        let created = booking.into_booking(BookingId::new(), Utc::now());
        self.work.bookings.push(created.clone());
        Ok(LedgerInsert::Created(created))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        *self.guard = self.work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Dropping the guard without swapping discards the copy.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use common::ConcertId;

    fn tier_with_stock(available: i32) -> TicketTier {
        TicketTier {
            id: TierId::new(),
            concert_id: ConcertId::new(),
            name: "General Admission".to_string(),
            price_cents: 5_000,
            total_quantity: available,
            available_quantity: available,
            created_at: Utc::now(),
        }
    }

    fn new_booking(tier_id: TierId, key: &str) -> NewBooking {
        NewBooking {
            tier_id,
            user_email: "buyer@example.com".to_string(),
            quantity: 2,
            total_price_cents: 10_000,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn reserve_decrements_and_reports_new_quantity() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(10);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        let outcome = unit.reserve_stock(tier_id, 3).await.unwrap();
        assert_eq!(
            outcome,
            StockReservation::Reserved {
                available_quantity: 7
            }
        );
        unit.commit().await.unwrap();

        assert_eq!(store.available_quantity(tier_id).await, Some(7));
    }

    #[tokio::test]
    async fn reserve_beyond_stock_is_insufficient_and_changes_nothing() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(2);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        let outcome = unit.reserve_stock(tier_id, 3).await.unwrap();
        assert_eq!(outcome, StockReservation::Insufficient);
        unit.commit().await.unwrap();

        assert_eq!(store.available_quantity(tier_id).await, Some(2));
    }

    #[tokio::test]
    async fn reserve_unknown_tier_is_insufficient() {
        let store = InMemoryReservationStore::new();
        let mut unit = store.begin().await.unwrap();
        let outcome = unit.reserve_stock(TierId::new(), 1).await.unwrap();
        assert_eq!(outcome, StockReservation::Insufficient);
        unit.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn rollback_discards_both_writes() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(5);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        unit.reserve_stock(tier_id, 2).await.unwrap();
        unit.insert_booking(new_booking(tier_id, "key-rollback-1")).await.unwrap();
        unit.rollback().await.unwrap();

        assert_eq!(store.available_quantity(tier_id).await, Some(5));
        assert_eq!(store.booking_count().await, 0);
        assert!(
            store
                .find_booking_by_key("key-rollback-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_reported_not_inserted() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(5);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        let first = unit.insert_booking(new_booking(tier_id, "key-duplicated")).await.unwrap();
        assert!(matches!(first, LedgerInsert::Created(_)));
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        let second = unit.insert_booking(new_booking(tier_id, "key-duplicated")).await.unwrap();
        assert_eq!(second, LedgerInsert::DuplicateKey);
        unit.rollback().await.unwrap();

        assert_eq!(store.booking_count().await, 1);
    }

    #[tokio::test]
    async fn release_restores_stock() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(5);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        unit.reserve_stock(tier_id, 4).await.unwrap();
        unit.commit().await.unwrap();

        store.release_stock(tier_id, 4).await.unwrap();
        assert_eq!(store.available_quantity(tier_id).await, Some(5));
    }

    #[tokio::test]
    async fn delete_booking_removes_the_row() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(5);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        let LedgerInsert::Created(booking) =
            unit.insert_booking(new_booking(tier_id, "key-deleted-1")).await.unwrap()
        else {
            panic!("insert should succeed");
        };
        unit.commit().await.unwrap();

        store.delete_booking(booking.id).await.unwrap();
        assert_eq!(store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn non_positive_quantities_are_rejected() {
        let store = InMemoryReservationStore::new();
        let tier = tier_with_stock(5);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut unit = store.begin().await.unwrap();
        let err = unit.reserve_stock(tier_id, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuantity(0)));
        unit.rollback().await.unwrap();

        let err = store.release_stock(tier_id, -1).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuantity(-1)));
    }

    #[tokio::test]
    async fn concurrent_units_serialize_and_never_oversell() {
        let store = Arc::new(InMemoryReservationStore::new());
        let tier = tier_with_stock(3);
        let tier_id = tier.id;
        store.insert_tier(tier).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut unit = store.begin().await.unwrap();
                match unit.reserve_stock(tier_id, 1).await.unwrap() {
                    StockReservation::Reserved { .. } => {
                        unit.insert_booking(NewBooking {
                            tier_id,
                            user_email: "buyer@example.com".to_string(),
                            quantity: 1,
                            total_price_cents: 5_000,
                            idempotency_key: format!("key-concurrent-{i}"),
                        })
                        .await
                        .unwrap();
                        unit.commit().await.unwrap();
                        true
                    }
                    StockReservation::Insufficient => {
                        unit.rollback().await.unwrap();
                        false
                    }
                }
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            if handle.await.unwrap() {
                reserved += 1;
            }
        }

        assert_eq!(reserved, 3);
        assert_eq!(store.available_quantity(tier_id).await, Some(0));
        assert_eq!(store.booking_count().await, 3);
    }
}
