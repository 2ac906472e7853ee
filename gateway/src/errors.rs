use crate::envelope::Envelope;
use crate::registry::RegistryError;
use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use resolver::ResolveError;
use resolver::project_service::ProjectServiceError;
use serde_json::Value;
use shared::status::RpcCode;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A backend returned a status code; the HTTP status is mapped from it
    /// and `custom_message` is propagated verbatim.
    #[error("{message}")]
    Rpc {
        code: RpcCode,
        message: String,
        custom_message: String,
    },

    #[error("cannot reach backend environment: {0}")]
    BadEnvironment(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Rpc { code, .. } => code.http_status(),
            GatewayError::BadEnvironment(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn custom_message(&self) -> String {
        match self {
            GatewayError::Rpc { custom_message, .. } => custom_message.clone(),
            _ => String::new(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.http_status();
        let text = self.to_string();

        let envelope = Envelope::new(code, text.clone(), Value::String(text), self.custom_message());
        (code, Json(envelope)).into_response()
    }
}

impl From<ResolveError> for GatewayError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidId { .. } => GatewayError::InvalidArgument(err.to_string()),
            ResolveError::ProjectService(inner) => inner.into(),
        }
    }
}

impl From<ProjectServiceError> for GatewayError {
    fn from(err: ProjectServiceError) -> Self {
        match err {
            ProjectServiceError::Backend { code, message } => GatewayError::Rpc {
                code,
                message,
                custom_message: String::new(),
            },
            ProjectServiceError::Transport(_)
            | ProjectServiceError::InvalidUrl(_)
            | ProjectServiceError::RetriesExceeded => GatewayError::BadEnvironment(err.to_string()),
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        GatewayError::BadEnvironment(err.to_string())
    }
}
