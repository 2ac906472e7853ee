//! Per-tenant pool of backend client bundles.

use crate::backend::{BackendEndpoints, ServiceBundle};
use crate::metrics_defs::{BUNDLE_BUILT, BUNDLE_EVICTED};
use parking_lot::RwLock;
use resolver::types::ResourceBinding;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

const BUILD_RETRIES: u32 = 3;
const BUILD_BASE_DELAY_MS: u64 = 250;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("cannot reach backend for namespace {namespace}: {reason}")]
    BadEnvironment { namespace: String, reason: String },
}

/// The registry key for a binding: one bundle per tenant backend cluster.
pub fn namespace_for(binding: &ResourceBinding) -> String {
    format!(
        "{}:{}",
        binding.resource_environment_id,
        binding.service_kind.as_str()
    )
}

/// Process-wide mapping from namespace to an immutable bundle handle.
///
/// Reads are the hot path; inserts happen once per tenant. The lock is
/// never held across an await — bundle construction happens outside it,
/// serialised by a separate build mutex so N simultaneous first-time
/// lookups construct the bundle exactly once.
pub struct ClientRegistry {
    bundles: RwLock<HashMap<String, Arc<ServiceBundle>>>,
    build_lock: Mutex<()>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            bundles: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<ServiceBundle>> {
        self.bundles.read().get(namespace).cloned()
    }

    /// Inserts, replacing any prior bundle atomically.
    pub fn put(&self, namespace: &str, bundle: ServiceBundle) {
        self.bundles
            .write()
            .insert(namespace.to_string(), Arc::new(bundle));
    }

    pub fn remove(&self, namespace: &str) {
        if self.bundles.write().remove(namespace).is_some() {
            counter!(BUNDLE_EVICTED).increment(1);
        }
    }

    /// Returns the bundle for `namespace`, constructing it on first access.
    ///
    /// Construction probes the backend endpoints with exponential backoff;
    /// exhausting the retries surfaces as a bad-environment error, and the
    /// registry is left unchanged so the next request retries cleanly.
    pub async fn get_or_build(
        &self,
        namespace: &str,
        endpoints: &BackendEndpoints,
    ) -> Result<Arc<ServiceBundle>, RegistryError> {
        if let Some(bundle) = self.get(namespace) {
            return Ok(bundle);
        }

        let _guard = self.build_lock.lock().await;

        // Another caller may have built it while we waited for the lock.
        if let Some(bundle) = self.get(namespace) {
            return Ok(bundle);
        }

        let bundle = self.build_with_retries(namespace, endpoints).await?;
        let bundle = Arc::new(bundle);
        self.bundles
            .write()
            .insert(namespace.to_string(), bundle.clone());
        counter!(BUNDLE_BUILT).increment(1);

        Ok(bundle)
    }

    async fn build_with_retries(
        &self,
        namespace: &str,
        endpoints: &BackendEndpoints,
    ) -> Result<ServiceBundle, RegistryError> {
        let mut retries = 0;

        loop {
            let bundle = ServiceBundle::new(endpoints);
            match bundle.ping().await {
                Ok(()) => return Ok(bundle),
                Err(err) if retries < BUILD_RETRIES => {
                    let delay = BUILD_BASE_DELAY_MS * 2_u64.pow(retries);
                    tracing::warn!(
                        namespace,
                        error = %err,
                        retry_in_ms = delay,
                        "builder probe failed, retrying"
                    );
                    sleep(Duration::from_millis(delay)).await;
                    retries += 1;
                }
                Err(err) => {
                    return Err(RegistryError::BadEnvironment {
                        namespace: namespace.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::MockBuilder;
    use resolver::types::{Dialect, NodeClass, ServiceKind};

    fn binding(resource_environment_id: &str) -> ResourceBinding {
        ResourceBinding {
            project_id: "p".into(),
            environment_id: "e".into(),
            resource_environment_id: resource_environment_id.into(),
            node_class: NodeClass::Shared,
            dialect: Dialect::DocumentStore,
            service_kind: ServiceKind::Builder,
        }
    }

    #[test]
    fn test_namespace_includes_tenant_and_kind() {
        assert_eq!(namespace_for(&binding("abc")), "abc:BUILDER");
    }

    #[tokio::test]
    async fn test_single_flight_construction() {
        let mock = MockBuilder::spawn().await;
        let endpoints = mock.endpoints();
        let registry = Arc::new(ClientRegistry::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let endpoints = endpoints.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_build("tenant:BUILDER", &endpoints).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // Eight concurrent first-time lookups, one construction: the mock
        // saw exactly one probe per configured endpoint (document and
        // relational share the mock here).
        assert_eq!(mock.health_probes(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_environment() {
        // Nothing listens on this port.
        let url = url::Url::parse("http://127.0.0.1:1/").unwrap();
        let endpoints = BackendEndpoints {
            document_url: url.clone(),
            relational_url: url,
            document_dedicated_url: None,
            relational_dedicated_url: None,
            builder_timeout: Duration::from_millis(200),
            bulk_write_timeout: Duration::from_millis(200),
        };

        let registry = ClientRegistry::new();
        let err = registry
            .get_or_build("tenant:BUILDER", &endpoints)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::BadEnvironment { .. }));
        // The failure did not poison the registry.
        assert!(registry.get("tenant:BUILDER").is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_and_remove_evicts() {
        let mock = MockBuilder::spawn().await;
        let endpoints = mock.endpoints();
        let registry = ClientRegistry::new();

        registry.put("ns", ServiceBundle::new(&endpoints));
        assert!(registry.get("ns").is_some());

        registry.put("ns", ServiceBundle::new(&endpoints));
        assert!(registry.get("ns").is_some());

        registry.remove("ns");
        assert!(registry.get("ns").is_none());
    }
}
