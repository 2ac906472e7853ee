//! Unauthenticated routes: health, config bootstrap, and the OTP flows
//! proxied to the auth service.

use crate::envelope::Reply;
use crate::errors::GatewayError;
use crate::query::JsonBody;
use crate::state::AppState;
use axum::extract::State;
use serde_json::{Value, json};

pub async fn ping(State(state): State<AppState>) -> Reply {
    Reply::ok(
        json!({
            "message": "pong",
            "in_flight_capacity": state.limiter.available(),
        }),
        None,
    )
}

/// Public configuration snapshot used by clients at startup. Secrets and
/// internal endpoints never appear here.
pub async fn bootstrap(State(state): State<AppState>) -> Reply {
    Reply::ok(
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "default_page_limit": state.config.default_page_limit,
        }),
        None,
    )
}

pub async fn otp_request(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Reply, GatewayError> {
    forward_otp(&state, "v1/otp/request", body).await
}

pub async fn otp_verify(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Reply, GatewayError> {
    forward_otp(&state, "v1/otp/verify", body).await
}

pub async fn otp_register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Reply, GatewayError> {
    forward_otp(&state, "v1/otp/register", body).await
}

async fn forward_otp(state: &AppState, path: &str, body: Value) -> Result<Reply, GatewayError> {
    let (status, response) = state
        .auth
        .post_passthrough(path, &body)
        .await
        .map_err(|e| GatewayError::BadEnvironment(e.to_string()))?;

    Ok(Reply::with_status(status, response, None))
}
