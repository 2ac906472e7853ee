//! Route binding and middleware assembly.
//!
//! Middleware order, outermost first: CORS → panic recovery → admission
//! limiter → (per group) authenticator → handler.

use crate::admission;
use crate::auth;
use crate::envelope::Envelope;
use crate::handlers::{admin, items, public, schema};
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use http::{Method, StatusCode, header};
use serde_json::Value;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};

pub fn router(state: AppState) -> Router {
    let user = user_routes(state.clone());
    let admin = admin_routes(state.clone());

    Router::new()
        .merge(public_routes())
        .nest("/v1", user.clone())
        .nest("/v2", user.clone())
        .nest("/v3", user)
        .nest("/admin", admin)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            admission::admit,
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer())
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(public::ping))
        .route("/config", get(public::bootstrap))
        .route("/otp/request", post(public::otp_request))
        .route("/otp/verify", post(public::otp_verify))
        .route("/otp/register", post(public::otp_register))
}

fn user_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/items/many-to-many",
            put(items::append_many2many).delete(items::delete_many2many),
        )
        .route(
            "/items/{collection}",
            get(items::list).post(items::create),
        )
        .route(
            "/items/{collection}/many",
            post(items::create_many)
                .put(items::update_many)
                .delete(items::delete_many),
        )
        .route("/items/{collection}/grouped", get(items::list_grouped))
        .route("/items/{collection}/aggregation", post(items::aggregation))
        .route(
            "/items/{collection}/{id}",
            get(items::get_single)
                .put(items::update)
                .delete(items::delete),
        )
        .route(
            "/collections",
            get(schema::list_collections).post(schema::create_collection),
        )
        .route("/fields/{collection}", get(schema::list_fields))
        .route(
            "/automation",
            get(schema::list_automation).post(schema::create_automation),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            auth::require_user,
        ))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/companies", get(admin::list_companies))
        .route("/projects", get(admin::list_projects))
        .layer(axum::middleware::from_fn_with_state(
            state,
            auth::require_admin,
        ))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Recovered handler panics become the standard 500 envelope.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> http::Response<axum::body::Body> {
    let envelope = Envelope::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected error".to_string(),
        Value::Null,
        String::new(),
    );
    let body = serde_json::to_vec(&envelope).unwrap_or_default();

    http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| {
            http::Response::new(axum::body::Body::empty())
        })
}
