use crate::metrics_defs::{BINDING_CACHE_HIT, BINDING_CACHE_MISS};
use crate::project_service::{ProjectService, ProjectServiceError};
use crate::types::{ResourceBinding, ServiceKind};
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;
use uuid::Uuid;

const CACHE_SIZE: u64 = 10_000;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("malformed {field} id: {value}")]
    InvalidId { field: &'static str, value: String },

    #[error(transparent)]
    ProjectService(#[from] ProjectServiceError),
}

/// Resolves (project, environment, service kind) to the backend resource
/// serving that tenant. Successful bindings are cached for a short TTL so
/// hot tenants do not hammer the project service.
///
/// This is the single place that encodes the rule "the backend's project id
/// is the binding's `resource_environment_id`".
pub struct Resolver {
    project_service: ProjectService,
    cache: Cache<String, ResourceBinding>,
}

impl Resolver {
    pub fn new(project_service: ProjectService, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_SIZE)
            .time_to_live(cache_ttl)
            .build();

        Resolver {
            project_service,
            cache,
        }
    }

    /// Both ids must be well-formed UUIDs; anything else is rejected before
    /// any RPC is issued.
    pub async fn resolve(
        &self,
        project_id: &str,
        environment_id: &str,
        service_kind: ServiceKind,
    ) -> Result<ResourceBinding, ResolveError> {
        validate_uuid("project", project_id)?;
        validate_uuid("environment", environment_id)?;

        let key = format!("{project_id}:{environment_id}:{}", service_kind.as_str());

        if let Some(binding) = self.cache.get(&key) {
            counter!(BINDING_CACHE_HIT).increment(1);
            return Ok(binding);
        }
        counter!(BINDING_CACHE_MISS).increment(1);

        let binding = self
            .project_service
            .fetch_binding(project_id, environment_id, service_kind)
            .await?;

        self.cache.insert(key, binding.clone());
        Ok(binding)
    }

    pub fn project_service(&self) -> &ProjectService {
        &self.project_service
    }

    /// Drops every cached binding. Used when an environment is migrated.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

fn validate_uuid(field: &'static str, value: &str) -> Result<(), ResolveError> {
    Uuid::parse_str(value).map_err(|_| ResolveError::InvalidId {
        field,
        value: value.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PROJECT: &str = "3f7b0136-6f0f-4e6a-9f3e-0a4f9e1c2d5b";
    const ENVIRONMENT: &str = "7d1c9a22-41a5-4b5e-8a6e-93d2f8b1c4e7";

    async fn spawn_project_service(calls: Arc<AtomicUsize>) -> String {
        let router = Router::new().route(
            "/v1/resource-bindings",
            get(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Json(serde_json::json!({
                        "project_id": PROJECT,
                        "environment_id": ENVIRONMENT,
                        "resource_environment_id": "9e8d7c6b-5a49-4838-2716-0594a3b2c1d0",
                        "node_class": "dedicated",
                        "dialect": "relational",
                        "service_kind": "BUILDER",
                    }))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn resolver_for(base: String) -> Resolver {
        Resolver::new(
            ProjectService::new(base, Duration::from_secs(5)),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_rejects_malformed_ids_before_any_rpc() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_project_service(calls.clone()).await;
        let resolver = resolver_for(base);

        let err = resolver
            .resolve("not-a-uuid", ENVIRONMENT, ServiceKind::Builder)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidId { field: "project", .. }
        ));

        let err = resolver
            .resolve(PROJECT, "123", ServiceKind::Builder)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidId {
                field: "environment",
                ..
            }
        ));

        // No RPC traffic for either rejection.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_binding_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_project_service(calls.clone()).await;
        let resolver = resolver_for(base);

        let first = resolver
            .resolve(PROJECT, ENVIRONMENT, ServiceKind::Builder)
            .await
            .unwrap();
        let second = resolver
            .resolve(PROJECT, ENVIRONMENT, ServiceKind::Builder)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.resource_environment_id,
            "9e8d7c6b-5a49-4838-2716-0594a3b2c1d0"
        );
        // Second resolve served from cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
