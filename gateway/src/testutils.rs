//! Mock upstream services for tests: builder backend, auth service,
//! project service, and function executor. Each records enough about the
//! traffic it sees for tests to assert on call counts and payloads.

use crate::backend::{BackendEndpoints, BuilderClient};
use crate::config::Config;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn test_config() -> Config {
    let placeholder: HashMap<String, String> = [
        ("AUTH_SERVICE_URL", "http://127.0.0.1:1"),
        ("PROJECT_SERVICE_URL", "http://127.0.0.1:1"),
        ("BUILDER_DOCUMENT_URL", "http://127.0.0.1:1"),
        ("BUILDER_RELATIONAL_URL", "http://127.0.0.1:1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Config::from_lookup(&move |key: &str| placeholder.get(key).cloned()).unwrap()
}

#[derive(Clone, Debug)]
pub struct RecordedWrite {
    pub method: String,
    pub path: String,
    pub body: Value,
}

#[derive(Default)]
struct BuilderInner {
    health_probes: AtomicUsize,
    version_history: AtomicUsize,
    version_history_fails: AtomicBool,
    version_history_bodies: Mutex<Vec<Value>>,
    function_logs: AtomicUsize,
    custom_events: Mutex<Vec<Value>>,
    writes: Mutex<Vec<RecordedWrite>>,
    write_failure: Mutex<Option<(u16, Value)>>,
    list_calls: AtomicUsize,
    list_bodies: Mutex<Vec<Value>>,
    list_delay: Mutex<Option<Duration>>,
    aggregate_calls: AtomicUsize,
    project_ids: Mutex<Vec<String>>,
}

impl BuilderInner {
    fn observe_project_id(&self, project_id: Option<&str>) {
        if let Some(project_id) = project_id {
            self.project_ids.lock().push(project_id.to_string());
        }
    }
}

/// Mock builder backend. Serves every endpoint the gateway's
/// `BuilderClient` talks to and records the traffic.
pub struct MockBuilder {
    addr: SocketAddr,
    inner: Arc<BuilderInner>,
}

impl MockBuilder {
    pub async fn spawn() -> Self {
        let inner = Arc::new(BuilderInner::default());
        let addr = spawn_router(Self::router(inner.clone())).await;
        MockBuilder { addr, inner }
    }

    fn router(inner: Arc<BuilderInner>) -> Router {
        Router::new()
            .route(
                "/health",
                get(|State(s): State<Arc<BuilderInner>>| async move {
                    s.health_probes.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }),
            )
            .route(
                "/v1/custom-events",
                get(
                    |State(s): State<Arc<BuilderInner>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        s.observe_project_id(params.get("project_id").map(String::as_str));
                        let method = params.get("method").cloned().unwrap_or_default();
                        let events: Vec<Value> = s
                            .custom_events
                            .lock()
                            .iter()
                            .filter(|event| event["method"] == json!(method))
                            .cloned()
                            .collect();
                        Json(json!({ "data": events }))
                    },
                ),
            )
            .route(
                "/v1/items/{collection}/{id}",
                get(
                    |State(s): State<Arc<BuilderInner>>,
                     Path((_, id)): Path<(String, String)>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        s.observe_project_id(params.get("project_id").map(String::as_str));
                        Json(json!({
                            "data": { "guid": id, "name": "previous-state" }
                        }))
                    },
                )
                .put(Self::record_write)
                .delete(Self::record_write),
            )
            .route(
                "/v1/items/{collection}",
                post(Self::record_write)
                    .put(Self::record_write)
                    .delete(Self::record_write),
            )
            .route(
                "/v1/items/{collection}/many",
                post(Self::record_write)
                    .put(Self::record_write)
                    .delete(Self::record_write),
            )
            .route(
                "/v1/many-to-many",
                put(Self::record_write).delete(Self::record_write),
            )
            .route(
                "/v1/items/{collection}/list",
                post(
                    |State(s): State<Arc<BuilderInner>>, Json(body): Json<Value>| async move {
                        let delay = *s.list_delay.lock();
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        s.list_calls.fetch_add(1, Ordering::SeqCst);
                        s.observe_project_id(body.get("project_id").and_then(Value::as_str));
                        s.list_bodies.lock().push(body);
                        Json(json!({
                            "data": { "count": 1, "response": [{"guid": "item-1"}] }
                        }))
                    },
                ),
            )
            .route(
                "/v1/items/{collection}/aggregate",
                post(
                    |State(s): State<Arc<BuilderInner>>, Json(body): Json<Value>| async move {
                        let n = s.aggregate_calls.fetch_add(1, Ordering::SeqCst);
                        s.observe_project_id(body.get("project_id").and_then(Value::as_str));
                        Json(json!({
                            "data": { "groups": [{"_id": "a"}], "serial": n }
                        }))
                    },
                ),
            )
            .route(
                "/v1/version-history",
                post(
                    |State(s): State<Arc<BuilderInner>>, Json(body): Json<Value>| async move {
                        if s.version_history_fails.load(Ordering::SeqCst) {
                            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                        }
                        s.version_history_bodies.lock().push(body);
                        s.version_history.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::OK, Json(json!({})))
                    },
                ),
            )
            .route(
                "/v1/function-logs",
                post(|State(s): State<Arc<BuilderInner>>| async move {
                    s.function_logs.fetch_add(1, Ordering::SeqCst);
                    Json(json!({}))
                }),
            )
            .with_state(inner)
    }

    async fn record_write(
        State(s): State<Arc<BuilderInner>>,
        method: axum::http::Method,
        uri: Uri,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        s.observe_project_id(body.get("project_id").and_then(Value::as_str));

        let failure = s.write_failure.lock().clone();
        if let Some((status, failure_body)) = failure {
            return (
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(failure_body),
            );
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        s.writes.lock().push(RecordedWrite {
            method: method.to_string(),
            path: uri.path().to_string(),
            body: body.clone(),
        });

        let mut response = match data {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        response.insert("guid".to_string(), json!("generated-guid"));
        (StatusCode::OK, Json(json!({ "data": Value::Object(response) })))
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn endpoints(&self) -> BackendEndpoints {
        BackendEndpoints {
            document_url: self.url(),
            relational_url: self.url(),
            document_dedicated_url: None,
            relational_dedicated_url: None,
            builder_timeout: Duration::from_secs(4),
            bulk_write_timeout: Duration::from_secs(30),
        }
    }

    pub fn client(&self) -> BuilderClient {
        BuilderClient::new(self.url(), Duration::from_secs(4), Duration::from_secs(30))
    }

    pub fn health_probes(&self) -> usize {
        self.inner.health_probes.load(Ordering::SeqCst)
    }

    pub fn version_history_writes(&self) -> usize {
        self.inner.version_history.load(Ordering::SeqCst)
    }

    pub fn function_log_writes(&self) -> usize {
        self.inner.function_logs.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn aggregate_calls(&self) -> usize {
        self.inner.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn break_version_history(&self) {
        self.inner
            .version_history_fails
            .store(true, Ordering::SeqCst);
    }

    pub fn version_history_bodies(&self) -> Vec<Value> {
        self.inner.version_history_bodies.lock().clone()
    }

    pub fn fail_writes(&self, http_status: u16, body: Value) {
        *self.inner.write_failure.lock() = Some((http_status, body));
    }

    pub fn clear_write_failure(&self) {
        *self.inner.write_failure.lock() = None;
    }

    pub fn delay_lists(&self, delay: Duration) {
        *self.inner.list_delay.lock() = Some(delay);
    }

    pub fn list_bodies(&self) -> Vec<Value> {
        self.inner.list_bodies.lock().clone()
    }

    pub fn set_custom_events(&self, events: Vec<Value>) {
        *self.inner.custom_events.lock() = events;
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.inner.writes.lock().clone()
    }

    pub fn observed_project_ids(&self) -> Vec<String> {
        self.inner.project_ids.lock().clone()
    }

    pub async fn wait_for_version_history(&self, n: usize) {
        for _ in 0..100 {
            if self.version_history_writes() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} version history writes");
    }

    pub async fn wait_for_function_logs(&self, n: usize) {
        for _ in 0..100 {
            if self.function_log_writes() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} function log writes");
    }
}

#[derive(Default)]
struct ExecutorInner {
    paths: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
    failures: Mutex<HashMap<String, String>>,
    delay: Mutex<Option<Duration>>,
}

/// Mock function executor: accepts any POST, records the order of paths
/// invoked, and answers `{status, data}` bodies.
pub struct MockExecutor {
    addr: SocketAddr,
    inner: Arc<ExecutorInner>,
}

impl MockExecutor {
    pub async fn spawn() -> Self {
        let inner = Arc::new(ExecutorInner::default());

        let state = inner.clone();
        let router = Router::new().fallback(move |uri: Uri, Json(body): Json<Value>| {
            let state = state.clone();
            async move {
                let path = uri.path().to_string();
                let delay = *state.delay.lock();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                state.paths.lock().push(path.clone());
                state.bodies.lock().push(body);

                let failure = state.failures.lock().get(&path).cloned();
                match failure {
                    Some(message) => Json(json!({
                        "status": "error",
                        "data": { "message": message },
                    })),
                    None => Json(json!({
                        "status": "done",
                        "data": { "result": "ok" },
                    })),
                }
            }
        });

        let addr = spawn_router(router).await;
        MockExecutor { addr, inner }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn fail_path(&self, path: &str, message: &str) {
        self.inner
            .failures
            .lock()
            .insert(path.to_string(), message.to_string());
    }

    pub fn delay_all(&self, delay: Duration) {
        *self.inner.delay.lock() = Some(delay);
    }

    pub fn invoked_paths(&self) -> Vec<String> {
        self.inner.paths.lock().clone()
    }

    pub fn invocation_bodies(&self) -> Vec<Value> {
        self.inner.bodies.lock().clone()
    }
}

#[derive(Default)]
struct AuthInner {
    user_tokens: Mutex<HashMap<String, Value>>,
    admin_tokens: Mutex<HashMap<String, Value>>,
    expired_tokens: Mutex<Vec<String>>,
    api_keys: Mutex<HashMap<String, (String, String)>>,
    checks: AtomicUsize,
}

/// Mock auth service.
pub struct MockAuth {
    addr: SocketAddr,
    inner: Arc<AuthInner>,
}

impl MockAuth {
    pub async fn spawn() -> Self {
        let inner = Arc::new(AuthInner::default());

        let router = Router::new()
            .route(
                "/v1/has-access-user",
                post(
                    |State(s): State<Arc<AuthInner>>, Json(body): Json<Value>| async move {
                        s.checks.fetch_add(1, Ordering::SeqCst);
                        let token = body["token"].as_str().unwrap_or_default().to_string();

                        if s.expired_tokens.lock().contains(&token) {
                            return (
                                StatusCode::FORBIDDEN,
                                Json(json!({
                                    "code": "SESSION_EXPIRED",
                                    "message": "session expired",
                                })),
                            );
                        }

                        match s.user_tokens.lock().get(&token) {
                            Some(principal) => (StatusCode::OK, Json(principal.clone())),
                            None => (
                                StatusCode::FORBIDDEN,
                                Json(json!({
                                    "code": "PERMISSION_DENIED",
                                    "message": "access denied",
                                })),
                            ),
                        }
                    },
                ),
            )
            .route(
                "/v1/has-access-superadmin",
                post(
                    |State(s): State<Arc<AuthInner>>, Json(body): Json<Value>| async move {
                        let token = body["token"].as_str().unwrap_or_default().to_string();
                        match s.admin_tokens.lock().get(&token) {
                            Some(principal) => (StatusCode::OK, Json(principal.clone())),
                            None => (
                                StatusCode::FORBIDDEN,
                                Json(json!({
                                    "code": "PERMISSION_DENIED",
                                    "message": "not an admin",
                                })),
                            ),
                        }
                    },
                ),
            )
            .route(
                "/v1/api-keys/environment",
                get(
                    |State(s): State<Arc<AuthInner>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        let key = params.get("key").cloned().unwrap_or_default();
                        match s.api_keys.lock().get(&key) {
                            Some((project_id, environment_id)) => (
                                StatusCode::OK,
                                Json(json!({
                                    "project_id": project_id,
                                    "environment_id": environment_id,
                                })),
                            ),
                            None => (
                                StatusCode::FORBIDDEN,
                                Json(json!({
                                    "code": "PERMISSION_DENIED",
                                    "message": "api key revoked",
                                })),
                            ),
                        }
                    },
                ),
            )
            .route(
                "/v1/otp/request",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({ "sent": true, "channel": body["channel"] }))
                }),
            )
            .with_state(inner.clone());

        let addr = spawn_router(router).await;
        MockAuth { addr, inner }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn allow_user(&self, token: &str, principal: Value) {
        self.inner
            .user_tokens
            .lock()
            .insert(token.to_string(), principal);
    }

    pub fn allow_admin(&self, token: &str, principal: Value) {
        self.inner
            .admin_tokens
            .lock()
            .insert(token.to_string(), principal);
    }

    pub fn expire_token(&self, token: &str) {
        self.inner.expired_tokens.lock().push(token.to_string());
    }

    pub fn allow_api_key(&self, key: &str, project_id: &str, environment_id: &str) {
        self.inner
            .api_keys
            .lock()
            .insert(key.to_string(), (project_id.into(), environment_id.into()));
    }
}

#[derive(Default)]
struct ProjectInner {
    binding: Mutex<Option<Value>>,
    fetches: AtomicUsize,
}

/// Mock company/project service answering resource-binding lookups.
pub struct MockProjectService {
    addr: SocketAddr,
    inner: Arc<ProjectInner>,
}

impl MockProjectService {
    pub async fn spawn() -> Self {
        let inner = Arc::new(ProjectInner::default());

        let router = Router::new()
            .route(
                "/v1/resource-bindings",
                get(
                    |State(s): State<Arc<ProjectInner>>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        s.fetches.fetch_add(1, Ordering::SeqCst);
                        let configured = s.binding.lock().clone();
                        match configured {
                            Some(binding) => (StatusCode::OK, Json(binding)),
                            None => (
                                StatusCode::OK,
                                Json(json!({
                                    "project_id": params.get("project_id"),
                                    "environment_id": params.get("environment_id"),
                                    "resource_environment_id": RESOURCE_ENVIRONMENT_ID,
                                    "node_class": "shared",
                                    "dialect": "document_store",
                                    "service_kind": "BUILDER",
                                })),
                            ),
                        }
                    },
                ),
            )
            .route(
                "/v1/companies",
                get(|| async { Json(json!({ "companies": [{"name": "acme"}] })) }),
            )
            .with_state(inner.clone());

        let addr = spawn_router(router).await;
        MockProjectService { addr, inner }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn set_binding(&self, binding: Value) {
        *self.inner.binding.lock() = Some(binding);
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }
}

/// The tenant key every default mock binding carries.
pub const RESOURCE_ENVIRONMENT_ID: &str = "5c9d8e7f-6a5b-4c3d-2e1f-098a7b6c5d4e";

/// Well-formed UUIDs for tests that pass id validation.
pub const TEST_PROJECT_ID: &str = "3f7b0136-6f0f-4e6a-9f3e-0a4f9e1c2d5b";
pub const TEST_ENVIRONMENT_ID: &str = "7d1c9a22-41a5-4b5e-8a6e-93d2f8b1c4e7";
