//! Booking creation endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use booking::{BookingEngine, CreateBookingRequest, IdempotencyCache, PaymentGateway};
use common::TierId;
use serde::{Deserialize, Serialize};
use storage::{Booking, ReservationStore};

use crate::error::ApiError;

/// Largest ticket count a single booking may request.
const MAX_QUANTITY: i32 = 10;
/// Shortest accepted idempotency key.
const MIN_KEY_LENGTH: usize = 10;

/// Shared application state accessible from all handlers.
pub struct AppState<S, G, C>
where
    S: ReservationStore,
    G: PaymentGateway,
    C: IdempotencyCache,
{
    pub engine: BookingEngine<S, G, C>,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateBookingPayload {
    pub tier_id: TierId,
    pub user_email: String,
    pub quantity: i32,
    pub total_price_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub tier_id: String,
    pub user_email: String,
    pub quantity: i32,
    pub total_price_cents: i64,
    pub idempotency_key: String,
    pub created_at: String,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id.to_string(),
            tier_id: booking.tier_id.to_string(),
            user_email: booking.user_email,
            quantity: booking.quantity,
            total_price_cents: booking.total_price_cents,
            idempotency_key: booking.idempotency_key,
            created_at: booking.created_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /bookings — purchase tickets.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S, G, C>(
    State(state): State<Arc<AppState<S, G, C>>>,
    Json(payload): Json<CreateBookingPayload>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError>
where
    S: ReservationStore + 'static,
    G: PaymentGateway + 'static,
    C: IdempotencyCache + 'static,
{
    validate(&payload)?;

    let request = CreateBookingRequest {
        tier_id: payload.tier_id,
        user_email: payload.user_email,
        quantity: payload.quantity,
        total_price_cents: payload.total_price_cents,
        currency: payload.currency,
        idempotency_key: payload.idempotency_key,
    };

    let booking = state.engine.create(request, "/bookings").await?;

    Ok((StatusCode::CREATED, Json(booking.into())))
}

fn validate(payload: &CreateBookingPayload) -> Result<(), ApiError> {
    if payload.quantity < 1 || payload.quantity > MAX_QUANTITY {
        return Err(ApiError::BadRequest(format!(
            "quantity must be between 1 and {MAX_QUANTITY}"
        )));
    }
    if payload.idempotency_key.len() < MIN_KEY_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "idempotency_key must be at least {MIN_KEY_LENGTH} characters"
        )));
    }
    if payload.currency.len() != 3 {
        return Err(ApiError::BadRequest(
            "currency must be a 3-letter ISO code".to_string(),
        ));
    }
    if !payload.user_email.contains('@') {
        return Err(ApiError::BadRequest(
            "user_email must be a valid email address".to_string(),
        ));
    }
    if payload.total_price_cents < 0 {
        return Err(ApiError::BadRequest(
            "total_price_cents must not be negative".to_string(),
        ));
    }
    Ok(())
}
