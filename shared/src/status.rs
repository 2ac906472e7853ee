//! Status codes spoken by the backend services.
//!
//! Backends report failures as a gRPC-style status code plus a message and an
//! optional user-facing `custom_message`. The gateway never forwards the code
//! itself; it is mapped onto an HTTP status here and rendered through the
//! response envelope.

use http::StatusCode;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcCode {
    Ok,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Internal,
    // Codes this gateway has no specific handling for collapse to Unknown
    // rather than failing deserialization.
    #[serde(other)]
    Unknown,
}

impl RpcCode {
    /// Parses the wire representation. Unrecognized codes become `Unknown`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "OK" => RpcCode::Ok,
            "INVALID_ARGUMENT" => RpcCode::InvalidArgument,
            "NOT_FOUND" => RpcCode::NotFound,
            "ALREADY_EXISTS" => RpcCode::AlreadyExists,
            "PERMISSION_DENIED" => RpcCode::PermissionDenied,
            "UNAUTHENTICATED" => RpcCode::Unauthenticated,
            "FAILED_PRECONDITION" => RpcCode::FailedPrecondition,
            "RESOURCE_EXHAUSTED" => RpcCode::ResourceExhausted,
            "UNAVAILABLE" => RpcCode::Unavailable,
            "DEADLINE_EXCEEDED" => RpcCode::DeadlineExceeded,
            "INTERNAL" => RpcCode::Internal,
            _ => RpcCode::Unknown,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RpcCode::Ok => "OK",
            RpcCode::InvalidArgument => "INVALID_ARGUMENT",
            RpcCode::NotFound => "NOT_FOUND",
            RpcCode::AlreadyExists => "ALREADY_EXISTS",
            RpcCode::PermissionDenied => "PERMISSION_DENIED",
            RpcCode::Unauthenticated => "UNAUTHENTICATED",
            RpcCode::FailedPrecondition => "FAILED_PRECONDITION",
            RpcCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            RpcCode::Unavailable => "UNAVAILABLE",
            RpcCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            RpcCode::Internal => "INTERNAL",
            RpcCode::Unknown => "UNKNOWN",
        }
    }

    /// The HTTP status a backend failure with this code surfaces as.
    pub fn http_status(&self) -> StatusCode {
        match self {
            RpcCode::Ok => StatusCode::OK,
            RpcCode::InvalidArgument => StatusCode::BAD_REQUEST,
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::AlreadyExists => StatusCode::CONFLICT,
            RpcCode::PermissionDenied => StatusCode::FORBIDDEN,
            RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            RpcCode::FailedPrecondition => StatusCode::BAD_REQUEST,
            RpcCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            RpcCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            RpcCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            RpcCode::Internal | RpcCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
