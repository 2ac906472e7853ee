//! Schema pass-throughs: collections, fields, and custom-event management.
//! These follow the uniform shape of the item handlers minus the event
//! pipeline; schema mutations are still audited.

use crate::audit::VersionHistoryEntry;
use crate::auth::AuthInfo;
use crate::context::TenantRefs;
use crate::envelope::Reply;
use crate::errors::GatewayError;
use crate::pipeline::{backend_error, resolve_bundle};
use crate::query::{JsonBody, ListParams, WriteBody};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use http::{HeaderMap, Method};
use serde_json::Value;

pub async fn list_collections(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    passthrough_read(&state, &principal, &headers, &params, "v1/collections", &[]).await
}

pub async fn create_collection(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    passthrough_write(
        &state,
        &principal,
        &headers,
        &params,
        "v1/collections",
        "collection",
        body.data,
    )
    .await
}

pub async fn list_fields(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    passthrough_read(
        &state,
        &principal,
        &headers,
        &params,
        &format!("v1/fields/{collection}"),
        &[],
    )
    .await
}

pub async fn list_automation(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    passthrough_read(
        &state,
        &principal,
        &headers,
        &params,
        "v1/custom-events",
        &[],
    )
    .await
}

pub async fn create_automation(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    passthrough_write(
        &state,
        &principal,
        &headers,
        &params,
        "v1/custom-events",
        "custom event",
        body.data,
    )
    .await
}

async fn passthrough_read(
    state: &AppState,
    principal: &crate::auth::Principal,
    headers: &HeaderMap,
    params: &ListParams,
    path: &str,
    extra_query: &[(&str, &str)],
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(principal, headers, params)?;
    let (binding, bundle) = resolve_bundle(state, &tenant).await?;

    let response = bundle
        .builder(binding.node_class, binding.dialect)
        .get_passthrough(&binding, path, extra_query)
        .await
        .map_err(backend_error)?;

    Ok(Reply::ok(response.data, response.custom_message))
}

async fn passthrough_write(
    state: &AppState,
    principal: &crate::auth::Principal,
    headers: &HeaderMap,
    params: &ListParams,
    path: &str,
    entity: &str,
    data: Value,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(principal, headers, params)?;
    let (binding, bundle) = resolve_bundle(state, &tenant).await?;
    let builder = bundle.builder(binding.node_class, binding.dialect);

    let result = builder
        .write_passthrough(&binding, Method::POST, path, &data)
        .await;

    let (current, response_value) = match &result {
        Ok(response) => (response.data.clone(), response.data.clone()),
        Err(err) => (Value::Null, Value::String(err.to_string())),
    };

    state.audit.record_version_history(
        bundle.audit_writer(binding.dialect).clone(),
        VersionHistoryEntry {
            actor_id: tenant.user_id.clone(),
            source: "schema".to_string(),
            action: format!("CREATE {entity}"),
            collection: String::new(),
            previous: Value::Null,
            current,
            request: data,
            response: response_value,
            project_id: binding.resource_environment_id.clone(),
            recorded_at: Utc::now(),
        },
    );

    let response = result.map_err(backend_error)?;
    Ok(Reply::created(response.data, response.custom_message))
}
