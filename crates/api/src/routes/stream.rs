//! Server-sent events stream of stock-level changes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use booking::{IdempotencyCache, PaymentGateway};
use futures_util::Stream;
use storage::ReservationStore;
use tokio::sync::broadcast::error::RecvError;

use crate::routes::bookings::AppState;

/// GET /bookings/stream — SSE feed of stock changes.
///
/// Each committed booking yields one `stock-change` event with the
/// post-decrement quantity. Subscribers joining late see only future
/// events; a lagged subscriber silently skips what it missed.
pub async fn stock_events<S, G, C>(
    State(state): State<Arc<AppState<S, G, C>>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: ReservationStore + 'static,
    G: PaymentGateway + 'static,
    C: IdempotencyCache + 'static,
{
    let receiver = state.engine.subscribe();

    let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(change) => {
                    let event = Event::default().event("stock-change").json_data(&change);
                    match event {
                        Ok(event) => return Some((Ok::<_, Infallible>(event), receiver)),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode stock event");
                            continue;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE subscriber lagged behind the stock bus");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
