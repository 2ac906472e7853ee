//! The item endpoints: the write family drives the full custom-event
//! pipeline; the read family goes through the result cache.

use crate::auth::AuthInfo;
use crate::backend::Many2ManyBody;
use crate::cache::ResultCache;
use crate::context::TenantRefs;
use crate::envelope::Reply;
use crate::errors::GatewayError;
use crate::pipeline::{BuilderOp, MutationContext, backend_error, resolve_bundle, run_mutation};
use crate::query::{JsonBody, ListParams, ListQuery, WriteBody, canonical_json};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;

pub async fn create(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection,
            op: BuilderOp::Create { data: body.data },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn create_many(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection,
            op: BuilderOp::CreateMany { data: body.data },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn update(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection,
            op: BuilderOp::Update {
                id,
                data: body.data,
            },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn update_many(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection,
            op: BuilderOp::UpdateMany { data: body.data },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn delete(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection,
            op: BuilderOp::Delete { id },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn delete_many(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    let ids = extract_id_list(&body.data)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection,
            op: BuilderOp::DeleteMany { ids },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn append_many2many(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<Many2ManyBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection: body.table_from.clone(),
            op: BuilderOp::AppendMany2Many { body },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn delete_many2many(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<Many2ManyBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    run_mutation(
        &state,
        &tenant,
        principal.role_id.as_deref(),
        MutationContext {
            collection: body.table_from.clone(),
            op: BuilderOp::DeleteMany2Many { body },
            from_ofs: params.from_ofs(),
            block_builder: params.block_builder(),
        },
    )
    .await
}

pub async fn get_single(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    let (binding, bundle) = resolve_bundle(&state, &tenant).await?;

    let response = bundle
        .builder(binding.node_class, binding.dialect)
        .get_single(&binding, &collection, &id)
        .await
        .map_err(backend_error)?;

    Ok(Reply::ok(response.data, response.custom_message))
}

pub async fn list(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    run_list(state, principal, collection, params, headers, false).await
}

pub async fn list_grouped(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Reply, GatewayError> {
    run_list(state, principal, collection, params, headers, true).await
}

async fn run_list(
    state: AppState,
    principal: crate::auth::Principal,
    collection: String,
    params: ListParams,
    headers: HeaderMap,
    grouped: bool,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    let query = ListQuery::parse(params.data.as_deref())?;
    let (limit, offset) = params.paging(state.config.default_page_limit);

    let (binding, bundle) = resolve_bundle(&state, &tenant).await?;
    let query_value = query.to_value();

    let cache_key = query.is_cached.unwrap_or(false).then(|| {
        ResultCache::key(
            &collection,
            &canonical_json(&serde_json::json!({
                "query": query_value,
                "grouped": grouped,
                "limit": limit,
                "offset": offset,
            })),
            &binding.resource_environment_id,
        )
    });

    if let Some(key) = &cache_key
        && let Some(cached) = state.cache.get(key)
        && let Ok(data) = serde_json::from_slice::<Value>(&cached)
    {
        return Ok(Reply::ok(data, None));
    }

    let builder = bundle.builder(binding.node_class, binding.dialect);
    let response = if grouped {
        builder
            .list_grouped(&binding, &collection, &query_value, limit, offset)
            .await
    } else {
        builder
            .list(&binding, &collection, &query_value, limit, offset)
            .await
    }
    .map_err(backend_error)?;

    store_cached(&state, cache_key, &response.data);
    Ok(Reply::ok(response.data, response.custom_message))
}

pub async fn aggregation(
    State(state): State<AppState>,
    AuthInfo(principal): AuthInfo,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<WriteBody>,
) -> Result<Reply, GatewayError> {
    let tenant = TenantRefs::derive(&principal, &headers, &params)?;
    let (binding, bundle) = resolve_bundle(&state, &tenant).await?;

    let pipelines = body.data.get("pipelines").cloned().unwrap_or(Value::Null);
    let is_cached = body
        .data
        .get("is_cached")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let cache_key = is_cached.then(|| {
        ResultCache::key(
            &collection,
            &canonical_json(&serde_json::json!({ "pipelines": pipelines })),
            &binding.resource_environment_id,
        )
    });

    if let Some(key) = &cache_key
        && let Some(cached) = state.cache.get(key)
        && let Ok(data) = serde_json::from_slice::<Value>(&cached)
    {
        return Ok(Reply::ok(data, None));
    }

    let response = bundle
        .builder(binding.node_class, binding.dialect)
        .aggregate(&binding, &collection, &pipelines)
        .await
        .map_err(backend_error)?;

    store_cached(&state, cache_key, &response.data);
    Ok(Reply::ok(response.data, response.custom_message))
}

/// Cache writes log and move on; they can never fail the request.
fn store_cached(state: &AppState, key: Option<String>, data: &Value) {
    let Some(key) = key else { return };
    match serde_json::to_vec(data) {
        Ok(bytes) => state.cache.set(key, Bytes::from(bytes)),
        Err(e) => tracing::warn!(error = %e, "result not cacheable"),
    }
}

fn extract_id_list(data: &Value) -> Result<Vec<String>, GatewayError> {
    let ids = data.get("ids").and_then(Value::as_array).ok_or_else(|| {
        GatewayError::BadRequest("delete-many body requires data.ids".to_string())
    })?;

    ids.iter()
        .map(|id| {
            id.as_str()
                .map(String::from)
                .ok_or_else(|| GatewayError::BadRequest("ids must be strings".to_string()))
        })
        .collect()
}
