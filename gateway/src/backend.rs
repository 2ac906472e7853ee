//! Typed clients for the builder backends.
//!
//! The builder service owns schema (collections/fields/relations) and data
//! (items). It comes in two dialects, document-store and relational, and a
//! tenant may be pinned to a dedicated node. A `ServiceBundle` holds one
//! client per reachable variant and picks the right one per request.

use crate::config::Config;
use http::Method;
use reqwest::Url;
use resolver::types::{Dialect, NodeClass, ResourceBinding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::status::RpcCode;
use std::time::Duration;

const NO_BODY: Option<&Value> = None;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The backend answered with a status code of its own.
    #[error("{message}")]
    Status {
        code: RpcCode,
        message: String,
        custom_message: String,
    },

    #[error("backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Successful backend reply: the payload plus an optional user-facing
/// message that must reach the caller verbatim.
#[derive(Debug, Default, Deserialize)]
pub struct BackendResponse {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub custom_message: Option<String>,
}

#[derive(Deserialize)]
struct FailureBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    custom_message: String,
}

/// Endpoint set a bundle is built from; derived from the process config.
#[derive(Clone, Debug)]
pub struct BackendEndpoints {
    pub document_url: Url,
    pub relational_url: Url,
    pub document_dedicated_url: Option<Url>,
    pub relational_dedicated_url: Option<Url>,
    pub builder_timeout: Duration,
    pub bulk_write_timeout: Duration,
}

impl BackendEndpoints {
    pub fn from_config(config: &Config) -> Self {
        BackendEndpoints {
            document_url: config.builder_document_url.clone(),
            relational_url: config.builder_relational_url.clone(),
            document_dedicated_url: config.builder_document_dedicated_url.clone(),
            relational_dedicated_url: config.builder_relational_dedicated_url.clone(),
            builder_timeout: config.builder_timeout,
            bulk_write_timeout: config.bulk_write_timeout,
        }
    }
}

/// Ids of the rows a many-to-many edit connects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Many2ManyBody {
    pub table_from: String,
    pub id_from: String,
    pub table_to: String,
    pub id_to: String,
}

/// One long-lived JSON-over-HTTP channel to a builder instance.
#[derive(Clone)]
#[derive(Debug)]
pub struct BuilderClient {
    client: reqwest::Client,
    base_url: Url,
    bulk_timeout: Duration,
}

impl BuilderClient {
    pub fn new(base_url: Url, timeout: Duration, bulk_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        BuilderClient {
            client,
            base_url,
            bulk_timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_single_slim(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        id: &str,
    ) -> Result<BackendResponse, BackendError> {
        self.request(
            Method::GET,
            &format!("v1/items/{collection}/{id}"),
            &[
                ("project_id", binding.resource_environment_id.as_str()),
                ("slim", "true"),
            ],
            NO_BODY,
            None,
        )
        .await
    }

    pub async fn get_single(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        id: &str,
    ) -> Result<BackendResponse, BackendError> {
        self.request(
            Method::GET,
            &format!("v1/items/{collection}/{id}"),
            &[("project_id", binding.resource_environment_id.as_str())],
            NO_BODY,
            None,
        )
        .await
    }

    pub async fn create(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        data: &Value,
        block_builder: bool,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::POST,
            &format!("v1/items/{collection}"),
            binding,
            data,
            block_builder,
            false,
        )
        .await
    }

    pub async fn create_many(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        data: &Value,
        block_builder: bool,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::POST,
            &format!("v1/items/{collection}/many"),
            binding,
            data,
            block_builder,
            true,
        )
        .await
    }

    pub async fn update(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        id: &str,
        data: &Value,
        block_builder: bool,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::PUT,
            &format!("v1/items/{collection}/{id}"),
            binding,
            data,
            block_builder,
            false,
        )
        .await
    }

    pub async fn update_many(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        data: &Value,
        block_builder: bool,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::PUT,
            &format!("v1/items/{collection}/many"),
            binding,
            data,
            block_builder,
            true,
        )
        .await
    }

    pub async fn delete(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        id: &str,
        block_builder: bool,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::DELETE,
            &format!("v1/items/{collection}/{id}"),
            binding,
            &Value::Null,
            block_builder,
            false,
        )
        .await
    }

    pub async fn delete_many(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        ids: &[String],
        block_builder: bool,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::DELETE,
            &format!("v1/items/{collection}/many"),
            binding,
            &serde_json::json!({ "ids": ids }),
            block_builder,
            true,
        )
        .await
    }

    pub async fn append_many2many(
        &self,
        binding: &ResourceBinding,
        body: &Many2ManyBody,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::PUT,
            "v1/many-to-many",
            binding,
            &serde_json::to_value(body).unwrap_or_default(),
            false,
            false,
        )
        .await
    }

    pub async fn delete_many2many(
        &self,
        binding: &ResourceBinding,
        body: &Many2ManyBody,
    ) -> Result<BackendResponse, BackendError> {
        self.write(
            Method::DELETE,
            "v1/many-to-many",
            binding,
            &serde_json::to_value(body).unwrap_or_default(),
            false,
            false,
        )
        .await
    }

    /// List items. `query` is the canonicalised list query JSON forwarded
    /// opaquely; the backend interprets filters and view fields.
    pub async fn list(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        query: &Value,
        limit: u32,
        offset: u32,
    ) -> Result<BackendResponse, BackendError> {
        self.request(
            Method::POST,
            &format!("v1/items/{collection}/list"),
            &[
                ("limit", &limit.to_string()),
                ("offset", &offset.to_string()),
            ],
            Some(&serde_json::json!({
                "project_id": binding.resource_environment_id,
                "collection": collection,
                "query": query,
            })),
            None,
        )
        .await
    }

    /// Grouped list: same inputs as [`Self::list`], rows grouped by the
    /// backend view definition.
    pub async fn list_grouped(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        query: &Value,
        limit: u32,
        offset: u32,
    ) -> Result<BackendResponse, BackendError> {
        self.request(
            Method::POST,
            &format!("v1/items/{collection}/grouped"),
            &[
                ("limit", &limit.to_string()),
                ("offset", &offset.to_string()),
            ],
            Some(&serde_json::json!({
                "project_id": binding.resource_environment_id,
                "collection": collection,
                "query": query,
            })),
            None,
        )
        .await
    }

    pub async fn aggregate(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        pipelines: &Value,
    ) -> Result<BackendResponse, BackendError> {
        self.request(
            Method::POST,
            &format!("v1/items/{collection}/aggregate"),
            &[],
            Some(&serde_json::json!({
                "project_id": binding.resource_environment_id,
                "collection": collection,
                "pipelines": pipelines,
            })),
            None,
        )
        .await
    }

    /// Fetches the custom events bound to (collection, method), filtered by
    /// the caller's role on the backend side.
    pub async fn list_custom_events(
        &self,
        binding: &ResourceBinding,
        collection: &str,
        method: &str,
        role_id: Option<&str>,
    ) -> Result<BackendResponse, BackendError> {
        let mut query: Vec<(&str, &str)> = vec![
            ("project_id", binding.resource_environment_id.as_str()),
            ("collection", collection),
            ("method", method),
        ];
        if let Some(role) = role_id {
            query.push(("role_id", role));
        }

        self.request(Method::GET, "v1/custom-events", &query, NO_BODY, None)
            .await
    }

    pub async fn write_version_history(&self, entry: &Value) -> Result<(), BackendError> {
        self.request(Method::POST, "v1/version-history", &[], Some(entry), None)
            .await?;
        Ok(())
    }

    pub async fn write_function_log(&self, entry: &Value) -> Result<(), BackendError> {
        self.request(Method::POST, "v1/function-logs", &[], Some(entry), None)
            .await?;
        Ok(())
    }

    /// Schema pass-through read, e.g. collections or field listings.
    pub async fn get_passthrough(
        &self,
        binding: &ResourceBinding,
        path: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<BackendResponse, BackendError> {
        let mut query: Vec<(&str, &str)> =
            vec![("project_id", binding.resource_environment_id.as_str())];
        query.extend_from_slice(extra_query);

        self.request(Method::GET, path, &query, NO_BODY, None).await
    }

    /// Schema pass-through write.
    pub async fn write_passthrough(
        &self,
        binding: &ResourceBinding,
        method: Method,
        path: &str,
        data: &Value,
    ) -> Result<BackendResponse, BackendError> {
        self.request(
            method,
            path,
            &[],
            Some(&serde_json::json!({
                "project_id": binding.resource_environment_id,
                "data": data,
            })),
            None,
        )
        .await
    }

    /// Cheap readiness probe used while constructing a bundle.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let url = self.join("health")?;
        let response = self.client.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Status {
                code: RpcCode::Unavailable,
                message: format!("builder health returned {}", response.status()),
                custom_message: String::new(),
            })
        }
    }

    async fn write(
        &self,
        method: Method,
        path: &str,
        binding: &ResourceBinding,
        data: &Value,
        block_builder: bool,
        bulk: bool,
    ) -> Result<BackendResponse, BackendError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if block_builder {
            query.push(("block_builder", "true"));
        }

        let timeout = bulk.then_some(self.bulk_timeout);

        self.request(
            method,
            path,
            &query,
            Some(&serde_json::json!({
                "project_id": binding.resource_environment_id,
                "data": data,
            })),
            timeout,
        )
        .await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<BackendResponse, BackendError> {
        let mut url = self.join(path)?;
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }

        let mut builder = self.client.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<BackendResponse>().await.unwrap_or_default());
        }

        match response.json::<FailureBody>().await {
            Ok(body) => Err(BackendError::Status {
                code: RpcCode::from_wire(&body.code),
                message: if body.message.is_empty() {
                    format!("builder returned {status}")
                } else {
                    body.message
                },
                custom_message: body.custom_message,
            }),
            Err(_) => Err(BackendError::Status {
                code: RpcCode::Unknown,
                message: format!("builder returned {status}"),
                custom_message: String::new(),
            }),
        }
    }

    fn join(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))
    }
}

/// The typed client handles for one backend cluster. Constructed on first
/// use for a namespace and retained process-wide; handles are never mutated
/// after construction.
#[derive(Debug)]
pub struct ServiceBundle {
    builder_document: BuilderClient,
    builder_relational: BuilderClient,
    builder_document_dedicated: Option<BuilderClient>,
    builder_relational_dedicated: Option<BuilderClient>,
}

impl ServiceBundle {
    pub fn new(endpoints: &BackendEndpoints) -> Self {
        let make = |url: &Url| {
            BuilderClient::new(
                url.clone(),
                endpoints.builder_timeout,
                endpoints.bulk_write_timeout,
            )
        };

        ServiceBundle {
            builder_document: make(&endpoints.document_url),
            builder_relational: make(&endpoints.relational_url),
            builder_document_dedicated: endpoints.document_dedicated_url.as_ref().map(make),
            builder_relational_dedicated: endpoints.relational_dedicated_url.as_ref().map(make),
        }
    }

    /// Picks the builder handle for a tenant. Dedicated tenants use the
    /// dedicated endpoint for their dialect when one is configured.
    pub fn builder(&self, node_class: NodeClass, dialect: Dialect) -> &BuilderClient {
        match (node_class, dialect) {
            (NodeClass::Dedicated, Dialect::DocumentStore) => self
                .builder_document_dedicated
                .as_ref()
                .unwrap_or(&self.builder_document),
            (NodeClass::Dedicated, Dialect::Relational) => self
                .builder_relational_dedicated
                .as_ref()
                .unwrap_or(&self.builder_relational),
            (NodeClass::Shared, Dialect::DocumentStore) => &self.builder_document,
            (NodeClass::Shared, Dialect::Relational) => &self.builder_relational,
        }
    }

    /// The handle the audit recorder writes through for a dialect.
    pub fn audit_writer(&self, dialect: Dialect) -> &BuilderClient {
        match dialect {
            Dialect::DocumentStore => &self.builder_document,
            Dialect::Relational => &self.builder_relational,
        }
    }

    /// Probes every configured endpoint once.
    pub async fn ping(&self) -> Result<(), BackendError> {
        self.builder_document.ping().await?;
        self.builder_relational.ping().await?;
        Ok(())
    }
}
