//! The fixed response wrapper every endpoint writes.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub status: String,
    pub description: String,
    pub data: Value,
    pub custom_message: String,
}

impl Envelope {
    pub fn new(code: StatusCode, description: String, data: Value, custom_message: String) -> Self {
        Envelope {
            status: status_label(code),
            description,
            data,
            custom_message,
        }
    }
}

/// Short status string carried in the envelope, e.g. "Created".
pub fn status_label(code: StatusCode) -> String {
    code.canonical_reason()
        .unwrap_or("Unknown Status")
        .to_string()
}

/// A success reply: an HTTP status plus the envelope around the payload.
#[derive(Debug)]
pub struct Reply {
    pub code: StatusCode,
    pub envelope: Envelope,
}

impl Reply {
    pub fn ok(data: Value, custom_message: Option<String>) -> Self {
        Reply::with_status(StatusCode::OK, data, custom_message)
    }

    pub fn created(data: Value, custom_message: Option<String>) -> Self {
        Reply::with_status(StatusCode::CREATED, data, custom_message)
    }

    pub fn no_content() -> Self {
        Reply {
            code: StatusCode::NO_CONTENT,
            envelope: Envelope::new(
                StatusCode::NO_CONTENT,
                String::new(),
                Value::Null,
                String::new(),
            ),
        }
    }

    pub fn with_status(code: StatusCode, data: Value, custom_message: Option<String>) -> Self {
        Reply {
            code,
            envelope: Envelope::new(
                code,
                status_label(code),
                data,
                custom_message.unwrap_or_default(),
            ),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        if self.code == StatusCode::NO_CONTENT {
            return self.code.into_response();
        }
        (self.code, Json(self.envelope)).into_response()
    }
}
