//! Credential validation against the auth service.
//!
//! Three credential shapes reach the gateway: user bearer tokens, admin
//! bearer tokens, and API keys. All of them resolve to a [`Principal`]
//! attached to the request before any handler runs.

use crate::errors::GatewayError;
use crate::state::AppState;
use axum::extract::{MatchedPath, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderMap, StatusCode};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use shared::status::RpcCode;
use std::time::Duration;

pub const AUTHORIZATION: &str = "authorization";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const RESOURCE_ID_HEADER: &str = "resource-id";
pub const ENVIRONMENT_ID_HEADER: &str = "environment-id";
pub const PLATFORM_TYPE_HEADER: &str = "platform-type";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    User,
    Admin,
    ApiKey,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccessGrant {
    pub collection: String,
    pub object_id: String,
}

/// Identity extracted from an inbound credential. Read-only after the
/// authenticator constructs it.
#[derive(Clone, Debug)]
pub struct Principal {
    pub kind: AuthKind,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub role_id: Option<String>,
    pub client_type_id: Option<String>,
    pub grants: Vec<AccessGrant>,
    pub project_id: Option<String>,
    pub environment_id: Option<String>,
}

/// Extractor for the principal a middleware attached earlier. A missing
/// principal on an authenticated route is a wiring bug, reported as
/// Forbidden with an explicit message rather than a generic 500.
pub struct AuthInfo(pub Principal);

impl<S> axum::extract::FromRequestParts<S> for AuthInfo
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthInfo)
            .ok_or_else(|| {
                GatewayError::Forbidden("no principal attached to request context".to_string())
            })
    }
}

#[derive(Deserialize)]
struct PrincipalBody {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    role_id: Option<String>,
    #[serde(default)]
    client_type_id: Option<String>,
    #[serde(default)]
    grants: Vec<AccessGrant>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    environment_id: Option<String>,
}

impl PrincipalBody {
    fn into_principal(self, kind: AuthKind) -> Principal {
        Principal {
            kind,
            user_id: self.user_id,
            session_id: self.session_id,
            role_id: self.role_id,
            client_type_id: self.client_type_id,
            grants: self.grants,
            project_id: self.project_id,
            environment_id: self.environment_id,
        }
    }
}

#[derive(Deserialize)]
struct ApiKeyEnvironment {
    project_id: String,
    environment_id: String,
}

#[derive(Deserialize)]
struct FailureBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("session expired")]
    Expired,

    #[error("{0}")]
    Denied(String),

    #[error("{message}")]
    Backend { code: RpcCode, message: String },

    #[error("auth service transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid auth URL: {0}")]
    InvalidUrl(String),
}

/// Client for the auth service.
pub struct AuthClient {
    client: reqwest::Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        AuthClient { client, base_url }
    }

    pub async fn has_access_user(
        &self,
        token: &str,
        path: &str,
        method: &str,
        table_slug: Option<&str>,
        platform_type: Option<&str>,
    ) -> Result<Principal, AuthError> {
        self.check_access(
            "v1/has-access-user",
            token,
            path,
            method,
            table_slug,
            platform_type,
        )
        .await
        .map(|body| body.into_principal(AuthKind::User))
    }

    pub async fn has_access_super_admin(
        &self,
        token: &str,
        path: &str,
        method: &str,
        platform_type: Option<&str>,
    ) -> Result<Principal, AuthError> {
        self.check_access(
            "v1/has-access-superadmin",
            token,
            path,
            method,
            None,
            platform_type,
        )
        .await
        .map(|body| body.into_principal(AuthKind::Admin))
    }

    pub async fn environment_for_api_key(&self, key: &str) -> Result<Principal, AuthError> {
        let url = self.join("v1/api-keys/environment")?;
        let response = self
            .client
            .get(url)
            .query(&[("key", key)])
            .send()
            .await?;

        if response.status().is_success() {
            let env = response.json::<ApiKeyEnvironment>().await?;
            return Ok(Principal {
                kind: AuthKind::ApiKey,
                user_id: None,
                session_id: None,
                role_id: None,
                client_type_id: None,
                grants: Vec::new(),
                project_id: Some(env.project_id),
                environment_id: Some(env.environment_id),
            });
        }

        Err(Self::failure(response).await)
    }

    /// Forwards an OTP flow body unchanged and hands back the auth
    /// service's status and body for the public handlers to re-wrap.
    pub async fn post_passthrough(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<(StatusCode, Value), AuthError> {
        let url = self.join(path)?;
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn check_access(
        &self,
        endpoint: &str,
        token: &str,
        path: &str,
        method: &str,
        table_slug: Option<&str>,
        platform_type: Option<&str>,
    ) -> Result<PrincipalBody, AuthError> {
        let url = self.join(endpoint)?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "token": token,
                "path": path,
                "method": method,
                "table_slug": table_slug,
                "platform_type": platform_type,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json::<PrincipalBody>().await?);
        }

        Err(Self::failure(response).await)
    }

    async fn failure(response: reqwest::Response) -> AuthError {
        let status = response.status();
        match response.json::<FailureBody>().await {
            Ok(body) => match body.code.as_str() {
                "SESSION_EXPIRED" | "TOKEN_EXPIRED" => AuthError::Expired,
                "PERMISSION_DENIED" | "USER_INACTIVE" => AuthError::Denied(body.message),
                code => AuthError::Backend {
                    code: RpcCode::from_wire(code),
                    message: body.message,
                },
            },
            Err(_) => AuthError::Backend {
                code: RpcCode::Unknown,
                message: format!("auth service returned {status}"),
            },
        }
    }

    fn join(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::InvalidUrl(e.to_string()))
    }
}

/// Middleware for the user route groups: bearer tokens and API keys.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let principal = authenticate(
        &state,
        req.headers(),
        req.extensions().get::<MatchedPath>(),
        req.uri().path(),
        req.method().as_str(),
        false,
    )
    .await?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Middleware for the admin route group.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let principal = authenticate(
        &state,
        req.headers(),
        req.extensions().get::<MatchedPath>(),
        req.uri().path(),
        req.method().as_str(),
        true,
    )
    .await?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    matched: Option<&MatchedPath>,
    path: &str,
    method: &str,
    admin: bool,
) -> Result<Principal, GatewayError> {
    let authorization = header_str(headers, AUTHORIZATION)
        .ok_or_else(|| GatewayError::Forbidden("authorization header required".to_string()))?;

    if authorization.eq_ignore_ascii_case("api-key") {
        let key = header_str(headers, API_KEY_HEADER)
            .ok_or_else(|| GatewayError::Forbidden("X-API-KEY header required".to_string()))?
            .to_string();

        // API-key failures propagate the auth service's own status.
        return state.auth.environment_for_api_key(&key).await.map_err(|err| match err {
            AuthError::Backend { code, message } => GatewayError::Rpc {
                code,
                message,
                custom_message: String::new(),
            },
            other => GatewayError::Unauthorized(other.to_string()),
        });
    }

    let token = authorization
        .strip_prefix("Bearer ")
        .ok_or_else(|| GatewayError::Forbidden("unsupported authorization scheme".to_string()))?
        .to_string();

    // Permissions are checked against the route template, not the concrete
    // path, so `/v2/items/orders` and `/v2/items/products` share one
    // permission key. The concrete slug still reaches the auth service so
    // it can scope grants to that table.
    let (permission_path, table_slug) = match matched {
        Some(matched) => {
            let pattern = matched.as_str().to_string();
            let slug = extract_collection(&pattern, path);
            (pattern, slug)
        }
        None => (path.to_string(), None),
    };

    let platform_type = header_str(headers, PLATFORM_TYPE_HEADER);

    let result = if admin {
        state
            .auth
            .has_access_super_admin(&token, &permission_path, method, platform_type)
            .await
    } else {
        state
            .auth
            .has_access_user(
                &token,
                &permission_path,
                method,
                table_slug.as_deref(),
                platform_type,
            )
            .await
    };

    result.map_err(|err| match err {
        AuthError::Expired => {
            GatewayError::Forbidden("session expired, please sign in again".to_string())
        }
        AuthError::Denied(message) => GatewayError::Forbidden(message),
        other => GatewayError::Unauthorized(other.to_string()),
    })
}

/// Returns the concrete value of the `{collection}` segment by lining the
/// route template up against the real path.
pub fn extract_collection(pattern: &str, path: &str) -> Option<String> {
    let pattern_segments = pattern.trim_matches('/').split('/');
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    for (i, segment) in pattern_segments.enumerate() {
        if segment == "{collection}" {
            return path_segments.get(i).map(|s| s.to_string());
        }
    }
    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
