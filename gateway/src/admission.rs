//! Process-wide bound on concurrent in-flight requests.

use crate::envelope::Envelope;
use crate::metrics_defs::ADMISSION_REJECTED;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::Value;
use shared::counter;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore around the whole gateway. Acquisition never blocks:
/// when the bound is reached, excess requests are rejected with 503 rather
/// than queued behind the head of the line.
#[derive(Clone)]
pub struct AdmissionLimiter {
    permits: Arc<Semaphore>,
}

impl AdmissionLimiter {
    pub fn new(limit: usize) -> Self {
        AdmissionLimiter {
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

pub async fn admit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match state.limiter.try_acquire() {
        // The permit is released when it drops, after the response is
        // built — on success, error, and unwind paths alike.
        Some(_permit) => next.run(req).await,
        None => {
            counter!(ADMISSION_REJECTED).increment(1);
            let envelope = Envelope::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "too many in-flight requests".to_string(),
                Value::Null,
                String::new(),
            );
            (StatusCode::SERVICE_UNAVAILABLE, Json(envelope)).into_response()
        }
    }
}
