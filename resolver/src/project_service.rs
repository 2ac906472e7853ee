const BASE_DELAY: u64 = 250;

use crate::types::{ResourceBinding, ServiceKind};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use shared::status::RpcCode;
use std::time::Duration;
use tokio::time::sleep;

/// Error body the company/project service returns on failure.
#[derive(Deserialize)]
struct FailureBody {
    code: String,
    message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ProjectServiceError {
    #[error("project service transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("{message}")]
    Backend { code: RpcCode, message: String },
    #[error("project service unavailable")]
    RetriesExceeded,
}

/// Client for the company/project service, the control plane that knows
/// which backend resource serves each (project, environment) pair.
pub struct ProjectService {
    client: reqwest::Client,
    base_url: String,
}

impl ProjectService {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        ProjectService {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetches the binding for one tenant. 429/5xx responses are retried
    /// with exponential backoff, up to 3 attempts per call.
    pub async fn fetch_binding(
        &self,
        project_id: &str,
        environment_id: &str,
        service_kind: ServiceKind,
    ) -> Result<ResourceBinding, ProjectServiceError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let mut url = Url::parse(&format!("{}/v1/resource-bindings", self.base_url))
            .map_err(|e| ProjectServiceError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("project_id", project_id)
            .append_pair("environment_id", environment_id)
            .append_pair("service_kind", service_kind.as_str());

        let mut retries = 0;

        loop {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.json::<ResourceBinding>().await?);
            }

            if RETRIABLE_STATUS_CODES.contains(&status) && retries < 3 {
                // Backoff between retries
                let retry_millis = BASE_DELAY * 2_u64.pow(retries);
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            if RETRIABLE_STATUS_CODES.contains(&status) {
                return Err(ProjectServiceError::RetriesExceeded);
            }

            // Non-retriable failure: surface the backend's own code.
            return match response.json::<FailureBody>().await {
                Ok(body) => Err(ProjectServiceError::Backend {
                    code: RpcCode::from_wire(&body.code),
                    message: body.message,
                }),
                Err(_) => Err(ProjectServiceError::Backend {
                    code: RpcCode::Unknown,
                    message: format!("project service returned {status}"),
                }),
            };
        }
    }

    /// Admin passthrough: list companies visible to the caller.
    pub async fn list_companies(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<serde_json::Value, ProjectServiceError> {
        self.get_passthrough("/v1/companies", &[("limit", limit), ("offset", offset)])
            .await
    }

    /// Admin passthrough: list projects of a company.
    pub async fn list_projects(
        &self,
        company_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<serde_json::Value, ProjectServiceError> {
        let mut url = Url::parse(&format!("{}/v1/projects", self.base_url))
            .map_err(|e| ProjectServiceError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("company_id", company_id)
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        self.send(url).await
    }

    async fn get_passthrough(
        &self,
        path: &str,
        query: &[(&str, u32)],
    ) -> Result<serde_json::Value, ProjectServiceError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ProjectServiceError::InvalidUrl(e.to_string()))?;
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, &value.to_string());
        }

        self.send(url).await
    }

    async fn send(&self, url: Url) -> Result<serde_json::Value, ProjectServiceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match response.json::<FailureBody>().await {
            Ok(body) => Err(ProjectServiceError::Backend {
                code: RpcCode::from_wire(&body.code),
                message: body.message,
            }),
            Err(_) => Err(ProjectServiceError::Backend {
                code: RpcCode::Unknown,
                message: format!("project service returned {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dialect, NodeClass};
    use axum::{Json, Router, extract::Query, http::StatusCode, routing::get};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn binding_json(project_id: &str, environment_id: &str) -> serde_json::Value {
        serde_json::json!({
            "project_id": project_id,
            "environment_id": environment_id,
            "resource_environment_id": "11111111-2222-3333-4444-555555555555",
            "node_class": "shared",
            "dialect": "document_store",
            "service_kind": "BUILDER",
        })
    }

    #[tokio::test]
    async fn test_fetch_binding() {
        let router = Router::new().route(
            "/v1/resource-bindings",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(binding_json(&params["project_id"], &params["environment_id"]))
            }),
        );
        let base = spawn_server(router).await;

        let service = ProjectService::new(base, Duration::from_secs(5));
        let binding = service
            .fetch_binding("p-1", "e-1", ServiceKind::Builder)
            .await
            .unwrap();

        assert_eq!(binding.project_id, "p-1");
        assert_eq!(
            binding.resource_environment_id,
            "11111111-2222-3333-4444-555555555555"
        );
        assert_eq!(binding.node_class, NodeClass::Shared);
        assert_eq!(binding.dialect, Dialect::DocumentStore);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let router = Router::new().route(
            "/v1/resource-bindings",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(binding_json("p", "e")))
                    }
                }
            }),
        );
        let base = spawn_server(router).await;

        let service = ProjectService::new(base, Duration::from_secs(5));
        let binding = service
            .fetch_binding("p", "e", ServiceKind::Builder)
            .await
            .unwrap();

        assert_eq!(binding.project_id, "p");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_maps_code() {
        let router = Router::new().route(
            "/v1/resource-bindings",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({
                        "code": "NOT_FOUND",
                        "message": "no such environment",
                    })),
                )
            }),
        );
        let base = spawn_server(router).await;

        let service = ProjectService::new(base, Duration::from_secs(5));
        let err = service
            .fetch_binding("p", "e", ServiceKind::Builder)
            .await
            .unwrap_err();

        match err {
            ProjectServiceError::Backend { code, message } => {
                assert_eq!(code, RpcCode::NotFound);
                assert_eq!(message, "no such environment");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
