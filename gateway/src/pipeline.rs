//! The orchestration every item mutation goes through.
//!
//! The sequence is identical across single, multiple, and many-to-many
//! variants; only the method label, the identifier list, and the payload
//! shape change:
//!
//! resolve tenant → pick clients → BEFORE events → backend write →
//! audit (async) → AFTER events → envelope.

use crate::audit::VersionHistoryEntry;
use crate::backend::{BackendError, BackendResponse, BuilderClient, Many2ManyBody, ServiceBundle};
use crate::context::TenantRefs;
use crate::envelope::Reply;
use crate::errors::GatewayError;
use crate::events::{ActionMoment, EventMethod, InvocationBase, list_events};
use crate::registry::namespace_for;
use crate::state::AppState;
use chrono::Utc;
use http::StatusCode;
use resolver::types::{ResourceBinding, ServiceKind};
use serde_json::Value;
use std::sync::Arc;

/// One builder mutation, carrying exactly the parts that differ between
/// the endpoint variants.
#[derive(Clone, Debug)]
pub enum BuilderOp {
    Create { data: Value },
    CreateMany { data: Value },
    Update { id: String, data: Value },
    UpdateMany { data: Value },
    Delete { id: String },
    DeleteMany { ids: Vec<String> },
    AppendMany2Many { body: Many2ManyBody },
    DeleteMany2Many { body: Many2ManyBody },
}

impl BuilderOp {
    pub fn method(&self) -> EventMethod {
        match self {
            BuilderOp::Create { .. } => EventMethod::Create,
            BuilderOp::CreateMany { .. } => EventMethod::CreateMany,
            BuilderOp::Update { .. } => EventMethod::Update,
            BuilderOp::UpdateMany { .. } => EventMethod::MultipleUpdate,
            BuilderOp::Delete { .. } => EventMethod::Delete,
            BuilderOp::DeleteMany { .. } => EventMethod::DeleteMany,
            BuilderOp::AppendMany2Many { .. } => EventMethod::AppendMany2many,
            BuilderOp::DeleteMany2Many { .. } => EventMethod::DeleteMany2many,
        }
    }

    /// Ids the operation acts on, as far as they are known before the
    /// backend call. Creates have none yet.
    pub fn object_ids(&self) -> Vec<String> {
        match self {
            BuilderOp::Create { .. } | BuilderOp::CreateMany { .. } => Vec::new(),
            BuilderOp::Update { id, .. } | BuilderOp::Delete { id } => vec![id.clone()],
            BuilderOp::DeleteMany { ids } => ids.clone(),
            BuilderOp::UpdateMany { data } => extract_guids(data),
            BuilderOp::AppendMany2Many { body } | BuilderOp::DeleteMany2Many { body } => {
                vec![body.id_from.clone(), body.id_to.clone()]
            }
        }
    }

    /// The request payload as delivered to custom events.
    pub fn payload(&self) -> Value {
        match self {
            BuilderOp::Create { data }
            | BuilderOp::CreateMany { data }
            | BuilderOp::Update { data, .. }
            | BuilderOp::UpdateMany { data } => data.clone(),
            BuilderOp::Delete { id } => serde_json::json!({ "id": id }),
            BuilderOp::DeleteMany { ids } => serde_json::json!({ "ids": ids }),
            BuilderOp::AppendMany2Many { body } | BuilderOp::DeleteMany2Many { body } => {
                serde_json::to_value(body).unwrap_or_default()
            }
        }
    }

    pub fn success_status(&self) -> StatusCode {
        match self {
            BuilderOp::Create { .. } | BuilderOp::CreateMany { .. } => StatusCode::CREATED,
            _ => StatusCode::OK,
        }
    }
}

fn extract_guids(data: &Value) -> Vec<String> {
    match data {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("guid").and_then(Value::as_str))
            .map(String::from)
            .collect(),
        Value::Object(map) => match map.get("objects") {
            Some(objects) => extract_guids(objects),
            None => map
                .get("guid")
                .and_then(Value::as_str)
                .map(|guid| vec![guid.to_string()])
                .unwrap_or_default(),
        },
        _ => Vec::new(),
    }
}

/// Inputs a mutation handler hands to the pipeline.
pub struct MutationContext {
    pub collection: String,
    pub op: BuilderOp,
    /// Executors calling back into the gateway set `from-ofs=true`; the
    /// custom-event pipeline is skipped entirely then.
    pub from_ofs: bool,
    pub block_builder: bool,
}

/// Resolves the tenant and returns its binding plus client bundle. Shared
/// by the read and write paths.
pub async fn resolve_bundle(
    state: &AppState,
    tenant: &TenantRefs,
) -> Result<(ResourceBinding, Arc<ServiceBundle>), GatewayError> {
    let binding = state
        .resolver
        .resolve(
            &tenant.project_id,
            &tenant.environment_id,
            ServiceKind::Builder,
        )
        .await?;

    let bundle = state
        .registry
        .get_or_build(&namespace_for(&binding), &state.endpoints)
        .await?;

    Ok((binding, bundle))
}

pub async fn run_mutation(
    state: &AppState,
    tenant: &TenantRefs,
    role_id: Option<&str>,
    ctx: MutationContext,
) -> Result<Reply, GatewayError> {
    let (binding, bundle) = resolve_bundle(state, tenant).await?;
    let builder = bundle.builder(binding.node_class, binding.dialect);
    let method = ctx.op.method();

    let (before, after) = if ctx.from_ofs {
        (Vec::new(), Vec::new())
    } else {
        list_events(builder, &binding, &ctx.collection, method, role_id).await?
    };

    let base = InvocationBase {
        object_ids: ctx.op.object_ids(),
        collection: ctx.collection.clone(),
        object_data: ctx.op.payload(),
        object_data_before_update: None,
        method,
        moment: ActionMoment::Before,
        user_id: tenant.user_id.clone(),
        role_id: role_id.map(String::from),
        project_id: tenant.project_id.clone(),
        environment_id: tenant.environment_id.clone(),
        resource_environment_id: binding.resource_environment_id.clone(),
        serverless_base_url: state.config.serverless_base_url.to_string(),
        container_base_domain: state.config.container_base_domain.clone(),
        workflow_base_url: state.config.workflow_base_url.to_string(),
    };

    if !before.is_empty()
        && let Err(failure) = state
            .invoker
            .invoke_all(&before, &base, builder, &state.audit)
            .await
    {
        return Err(GatewayError::InvalidArgument(format!(
            "{} in {}",
            failure.error, failure.function_name
        )));
    }

    // Snapshot the object before single-item updates and deletes so the
    // audit entry and AFTER events can carry the previous value.
    let previous = match (&ctx.op, method.snapshots_previous()) {
        (BuilderOp::Update { id, .. }, true) | (BuilderOp::Delete { id }, true) => builder
            .get_single_slim(&binding, &ctx.collection, id)
            .await
            .ok()
            .map(|response| response.data),
        _ => None,
    };

    let result = execute(builder, &binding, &ctx).await;

    record_audit(state, &binding, &bundle, tenant, &ctx, &previous, &result);

    let response = result.map_err(backend_error)?;

    if !after.is_empty() {
        let after_base = InvocationBase {
            moment: ActionMoment::After,
            object_data_before_update: previous,
            ..base
        };
        if let Err(failure) = state
            .invoker
            .invoke_all(&after, &after_base, builder, &state.audit)
            .await
        {
            return Err(GatewayError::InvalidArgument(format!(
                "{} in {}",
                failure.error, failure.function_name
            )));
        }
    }

    Ok(Reply::with_status(
        ctx.op.success_status(),
        response.data,
        response.custom_message,
    ))
}

async fn execute(
    builder: &BuilderClient,
    binding: &ResourceBinding,
    ctx: &MutationContext,
) -> Result<BackendResponse, BackendError> {
    let collection = &ctx.collection;
    let block = ctx.block_builder;

    match &ctx.op {
        BuilderOp::Create { data } => builder.create(binding, collection, data, block).await,
        BuilderOp::CreateMany { data } => {
            builder.create_many(binding, collection, data, block).await
        }
        BuilderOp::Update { id, data } => {
            builder.update(binding, collection, id, data, block).await
        }
        BuilderOp::UpdateMany { data } => {
            builder.update_many(binding, collection, data, block).await
        }
        BuilderOp::Delete { id } => builder.delete(binding, collection, id, block).await,
        BuilderOp::DeleteMany { ids } => builder.delete_many(binding, collection, ids, block).await,
        BuilderOp::AppendMany2Many { body } => builder.append_many2many(binding, body).await,
        BuilderOp::DeleteMany2Many { body } => builder.delete_many2many(binding, body).await,
    }
}

fn record_audit(
    state: &AppState,
    binding: &ResourceBinding,
    bundle: &ServiceBundle,
    tenant: &TenantRefs,
    ctx: &MutationContext,
    previous: &Option<Value>,
    result: &Result<BackendResponse, BackendError>,
) {
    let (current, response) = match result {
        Ok(response) => (response.data.clone(), response.data.clone()),
        Err(err) => (Value::Null, Value::String(err.to_string())),
    };

    let entry = VersionHistoryEntry {
        actor_id: tenant.user_id.clone(),
        source: "items".to_string(),
        action: format!("{} item", ctx.op.method().as_str()),
        collection: ctx.collection.clone(),
        previous: previous.clone().unwrap_or(Value::Null),
        current,
        request: ctx.op.payload(),
        response,
        project_id: binding.resource_environment_id.clone(),
        recorded_at: Utc::now(),
    };

    state
        .audit
        .record_version_history(bundle.audit_writer(binding.dialect).clone(), entry);
}

/// Maps a builder failure onto the gateway taxonomy: coded failures keep
/// their mapped status, transport failures are a bad environment.
pub fn backend_error(err: BackendError) -> GatewayError {
    match err {
        BackendError::Status {
            code,
            message,
            custom_message,
        } => GatewayError::Rpc {
            code,
            message,
            custom_message,
        },
        other => GatewayError::BadEnvironment(other.to_string()),
    }
}
