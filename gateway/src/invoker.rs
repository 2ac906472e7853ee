//! Routes custom-event invocations to the right executor backend.

use crate::audit::{AuditRecorder, FunctionLog};
use crate::backend::BuilderClient;
use crate::config::Config;
use crate::events::{CustomEvent, ExecutorKind, Function, InvocationBase, RequestMode};
use crate::metrics_defs::{EVENT_DURATION_MS, EVENT_INVOCATIONS};
use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use shared::{counter, histogram};
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum InvokeError {
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The function ran and reported `status: "error"`.
    #[error("{0}")]
    Failed(String),

    #[error("cannot build executor URL for path {0}")]
    BadPath(String),
}

/// The failing function's name travels with the error so the caller can
/// name it in the response.
#[derive(Debug)]
pub struct EventFailure {
    pub function_name: String,
    pub error: InvokeError,
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Value,
}

/// Stateless dispatcher over the three executor backends. No retries: the
/// executor runtimes own their own retry policies.
#[derive(Clone)]
pub struct FunctionInvoker {
    client: reqwest::Client,
    serverless_base_url: Url,
    container_base_domain: String,
    workflow_base_url: Url,
}

impl FunctionInvoker {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        FunctionInvoker {
            client,
            serverless_base_url: config.serverless_base_url.clone(),
            container_base_domain: config.container_base_domain.clone(),
            workflow_base_url: config.workflow_base_url.clone(),
        }
    }

    /// Executor selection is a closed mapping on the function's declared
    /// kind; the URL shape is fixed per executor.
    pub fn resolve_url(&self, kind: ExecutorKind, path: &str) -> Result<Url, InvokeError> {
        let url = match kind {
            ExecutorKind::Function => self.serverless_base_url.join(path).ok(),
            ExecutorKind::Knative => {
                Url::parse(&format!("http://{path}.{}", self.container_base_domain)).ok()
            }
            ExecutorKind::Workflow => self
                .workflow_base_url
                .join(&format!("webhook/{path}"))
                .ok(),
        };
        url.ok_or_else(|| InvokeError::BadPath(path.to_string()))
    }

    /// POSTs `{data: payload}` and decodes the executor's reply.
    pub async fn invoke(&self, url: Url, payload: &Value) -> Result<Value, InvokeError> {
        counter!(EVENT_INVOCATIONS).increment(1);

        let response = self
            .client
            .post(url.clone())
            .json(&serde_json::json!({ "data": payload }))
            .send()
            .await
            .map_err(|source| InvokeError::Transport {
                url: url.to_string(),
                source,
            })?;

        let body = response
            .json::<InvokeResponse>()
            .await
            .map_err(|source| InvokeError::Transport {
                url: url.to_string(),
                source,
            })?;

        if body.status == "error" {
            let message = body
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("function returned an error")
                .to_string();
            return Err(InvokeError::Failed(message));
        }

        Ok(body.data)
    }

    /// Invokes the events in list order. Only the first function of each
    /// event is triggered. The first failing awaited invocation aborts and
    /// is returned with its function name; detached (SYNC) invocations are
    /// handed to the background queue and never observed.
    pub async fn invoke_all(
        &self,
        events: &[CustomEvent],
        base: &InvocationBase,
        log_writer: &BuilderClient,
        audit: &AuditRecorder,
    ) -> Result<(), EventFailure> {
        for event in events {
            let Some(function) = event.functions.first() else {
                continue;
            };

            let path = event.path.as_deref().unwrap_or(&function.path);
            let url = match self.resolve_url(function.kind, path) {
                Ok(url) => url,
                Err(error) => {
                    return Err(EventFailure {
                        function_name: function.name.clone(),
                        error,
                    });
                }
            };

            let payload = base.compose(event);

            match function.request_mode {
                RequestMode::Sync => {
                    self.spawn_detached(function, url, payload, base, log_writer, audit);
                }
                RequestMode::Async => {
                    let sent_at = Utc::now();
                    let started = Instant::now();
                    let result = self.invoke(url, &payload).await;
                    let duration = started.elapsed();
                    histogram!(EVENT_DURATION_MS).record(duration.as_millis() as f64);

                    audit.record_function_log(
                        log_writer.clone(),
                        function_log(function, base, sent_at, duration, &result),
                    );

                    if let Err(error) = result {
                        return Err(EventFailure {
                            function_name: function.name.clone(),
                            error,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_detached(
        &self,
        function: &Function,
        url: Url,
        payload: Value,
        base: &InvocationBase,
        log_writer: &BuilderClient,
        audit: &AuditRecorder,
    ) {
        let invoker = self.clone();
        let function = function.clone();
        let label = function.name.clone();
        let base = base.clone();
        let log_writer = log_writer.clone();
        let recorder = audit.clone();

        audit.spawn_detached(&label, async move {
            let sent_at = Utc::now();
            let started = Instant::now();
            let result = invoker.invoke(url, &payload).await;

            // The result is discarded; only the log records the outcome.
            recorder.record_function_log(
                log_writer,
                function_log(&function, &base, sent_at, started.elapsed(), &result),
            );
        });
    }
}

fn function_log(
    function: &Function,
    base: &InvocationBase,
    sent_at: chrono::DateTime<Utc>,
    duration: Duration,
    result: &Result<Value, InvokeError>,
) -> FunctionLog {
    let response_size = match result {
        Ok(value) => serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0),
        Err(_) => 0,
    };

    FunctionLog {
        function_id: function.id.clone(),
        collection: base.collection.clone(),
        method: base.method.as_str().to_string(),
        moment: base.moment.as_str().to_string(),
        sent_at,
        completed_at: Utc::now(),
        duration_ms: duration.as_millis() as u64,
        status: if result.is_ok() { "success" } else { "error" }.to_string(),
        response_size,
    }
}
