//! User-defined custom events: the hooks a tenant attaches to item
//! mutations. Definitions are owned by the builder backend; the gateway
//! fetches them read-only per request and splits them into BEFORE and
//! AFTER lists.

use crate::backend::{BackendError, BuilderClient};
use crate::errors::GatewayError;
use resolver::types::ResourceBinding;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The mutation a custom event is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventMethod {
    Create,
    CreateMany,
    Update,
    MultipleUpdate,
    Delete,
    DeleteMany,
    AppendMany2many,
    DeleteMany2many,
}

impl EventMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventMethod::Create => "CREATE",
            EventMethod::CreateMany => "CREATE_MANY",
            EventMethod::Update => "UPDATE",
            EventMethod::MultipleUpdate => "MULTIPLE_UPDATE",
            EventMethod::Delete => "DELETE",
            EventMethod::DeleteMany => "DELETE_MANY",
            EventMethod::AppendMany2many => "APPEND_MANY2MANY",
            EventMethod::DeleteMany2many => "DELETE_MANY2MANY",
        }
    }

    /// Whether an audit entry snapshots the object before the mutation.
    pub const fn snapshots_previous(&self) -> bool {
        matches!(self, EventMethod::Update | EventMethod::Delete)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionMoment {
    Before,
    After,
}

impl ActionMoment {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActionMoment::Before => "BEFORE",
            ActionMoment::After => "AFTER",
        }
    }
}

/// Which executor runs a function. This set is closed: an unknown wire
/// value fails event deserialization up front instead of a 500 at
/// invocation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutorKind {
    /// Serverless platform.
    Function,
    /// Container runtime.
    Knative,
    /// Workflow engine webhook.
    Workflow,
}

/// How the caller relates to an invocation. The labels follow the source
/// platform: SYNC runs detached with its result discarded, ASYNC (the
/// default) is awaited and its error aborts the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMode {
    Sync,
    #[default]
    Async,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Function {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ExecutorKind,
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub request_mode: RequestMode,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CustomEvent {
    pub id: String,
    pub collection: String,
    pub method: EventMethod,
    pub moment: ActionMoment,
    #[serde(default)]
    pub functions: Vec<Function>,
    /// Overrides the function's own path when set.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Everything an invocation payload is composed from, minus the
/// event-specific attributes merged in per event.
#[derive(Clone, Debug)]
pub struct InvocationBase {
    pub object_ids: Vec<String>,
    pub collection: String,
    pub object_data: Value,
    pub object_data_before_update: Option<Value>,
    pub method: EventMethod,
    pub moment: ActionMoment,
    pub user_id: Option<String>,
    pub role_id: Option<String>,
    pub project_id: String,
    pub environment_id: String,
    pub resource_environment_id: String,
    pub serverless_base_url: String,
    pub container_base_domain: String,
    pub workflow_base_url: String,
}

impl InvocationBase {
    /// Builds the payload for one event: the base context with the event's
    /// attributes merged over it. Attribute keys win on collision.
    pub fn compose(&self, event: &CustomEvent) -> Value {
        let mut map = Map::new();
        map.insert("ids".into(), serde_json::json!(self.object_ids));
        map.insert("table_slug".into(), Value::String(self.collection.clone()));
        map.insert("object_data".into(), self.object_data.clone());
        if let Some(before) = &self.object_data_before_update {
            map.insert("object_data_before_update".into(), before.clone());
        }
        map.insert(
            "method".into(),
            Value::String(self.method.as_str().to_string()),
        );
        map.insert(
            "action_moment".into(),
            Value::String(self.moment.as_str().to_string()),
        );
        map.insert("user_id".into(), to_value_or_null(&self.user_id));
        map.insert("role_id".into(), to_value_or_null(&self.role_id));
        map.insert(
            "project_id".into(),
            Value::String(self.project_id.clone()),
        );
        map.insert(
            "environment_id".into(),
            Value::String(self.environment_id.clone()),
        );
        map.insert(
            "resource_environment_id".into(),
            Value::String(self.resource_environment_id.clone()),
        );
        map.insert(
            "serverless_base_url".into(),
            Value::String(self.serverless_base_url.clone()),
        );
        map.insert(
            "container_base_domain".into(),
            Value::String(self.container_base_domain.clone()),
        );
        map.insert(
            "workflow_base_url".into(),
            Value::String(self.workflow_base_url.clone()),
        );

        for (key, value) in &event.attributes {
            map.insert(key.clone(), value.clone());
        }

        Value::Object(map)
    }
}

fn to_value_or_null(value: &Option<String>) -> Value {
    match value {
        Some(v) => Value::String(v.clone()),
        None => Value::Null,
    }
}

/// Fetches the events for (collection, method) and partitions them by
/// moment. The caller's role is passed through so the backend filters out
/// events that role cannot trigger.
pub async fn list_events(
    builder: &BuilderClient,
    binding: &ResourceBinding,
    collection: &str,
    method: EventMethod,
    role_id: Option<&str>,
) -> Result<(Vec<CustomEvent>, Vec<CustomEvent>), GatewayError> {
    let response = builder
        .list_custom_events(binding, collection, method.as_str(), role_id)
        .await
        .map_err(|err| match err {
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
        })?;

    let events: Vec<CustomEvent> = match response.data {
        Value::Null => Vec::new(),
        data => serde_json::from_value(data).map_err(|e| {
            GatewayError::Internal(format!("invalid custom event definition: {e}"))
        })?,
    };

    Ok(events
        .into_iter()
        .partition(|event| event.moment == ActionMoment::Before))
}
