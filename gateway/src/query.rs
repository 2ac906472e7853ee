//! Decoding of list-request inputs.
//!
//! Item payloads are arbitrary key/value maps forwarded opaquely; they are
//! carried as `serde_json::Value` end to end. Collection schemas live in
//! the backend, so the gateway never types them.

use crate::errors::GatewayError;
use serde::Deserialize;
use serde_json::{Map, Value};

const FILTER_OPERATORS: &[&str] = &["$eq", "$gte", "$gt", "$lte", "$lt", "$in"];

/// Query-string parameters common to the item endpoints.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListParams {
    /// JSON-encoded [`ListQuery`].
    pub data: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// 1-indexed alternative to `offset`.
    pub page: Option<u32>,
    /// Set by executors calling back into the gateway; disables the
    /// custom-event pipeline to avoid infinite recursion.
    #[serde(rename = "from-ofs")]
    pub from_ofs: Option<String>,
    /// Serialises updates on the backend side.
    pub block_builder: Option<String>,
    /// Tenant fallbacks for callers whose principal carries no pointers.
    #[serde(rename = "Project-Id")]
    pub project_id: Option<String>,
    #[serde(rename = "Environment-Id")]
    pub environment_id: Option<String>,
    #[serde(rename = "User-Id")]
    pub user_id: Option<String>,
}

impl ListParams {
    pub fn from_ofs(&self) -> bool {
        self.from_ofs.as_deref() == Some("true")
    }

    pub fn block_builder(&self) -> bool {
        self.block_builder.as_deref() == Some("true")
    }

    /// Resolves paging: `page` is 1-indexed and wins over `offset` when
    /// both are present.
    pub fn paging(&self, default_limit: u32) -> (u32, u32) {
        let limit = self.limit.unwrap_or(default_limit);
        let offset = match self.page {
            Some(page) => page.saturating_sub(1).saturating_mul(limit),
            None => self.offset.unwrap_or(0),
        };
        (limit, offset)
    }
}

/// The decoded `data` query parameter of a list endpoint. Known fields are
/// lifted out; everything else is a per-field filter forwarded to the
/// backend after validation.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub view_fields: Vec<String>,
    #[serde(default)]
    pub with_relations: Option<bool>,
    #[serde(default)]
    pub language_setting: Option<String>,
    #[serde(default)]
    pub builder_service_view_id: Option<String>,
    #[serde(default)]
    pub is_cached: Option<bool>,
    #[serde(flatten)]
    pub filters: Map<String, Value>,
}

impl ListQuery {
    /// Parses the raw `data` parameter. Absent means "no query".
    pub fn parse(raw: Option<&str>) -> Result<Self, GatewayError> {
        let Some(raw) = raw else {
            return Ok(ListQuery::default());
        };

        let query: ListQuery = serde_json::from_str(raw)
            .map_err(|e| GatewayError::BadRequest(format!("malformed data parameter: {e}")))?;
        query.validate_filters()?;
        Ok(query)
    }

    /// A filter value is either a literal (equality) or an operator map
    /// whose keys all come from the supported set.
    fn validate_filters(&self) -> Result<(), GatewayError> {
        for (field, value) in &self.filters {
            if let Value::Object(operators) = value {
                for op in operators.keys() {
                    if op.starts_with('$') && !FILTER_OPERATORS.contains(&op.as_str()) {
                        return Err(GatewayError::BadRequest(format!(
                            "unsupported filter operator {op} on field {field}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// The query as forwarded to the backend.
    pub fn to_value(&self) -> Value {
        let mut map = self.filters.clone();
        if let Some(search) = &self.search {
            map.insert("search".to_string(), Value::String(search.clone()));
        }
        if !self.view_fields.is_empty() {
            map.insert(
                "view_fields".to_string(),
                Value::Array(
                    self.view_fields
                        .iter()
                        .map(|f| Value::String(f.clone()))
                        .collect(),
                ),
            );
        }
        if let Some(with_relations) = self.with_relations {
            map.insert("with_relations".to_string(), Value::Bool(with_relations));
        }
        if let Some(language) = &self.language_setting {
            map.insert(
                "language_setting".to_string(),
                Value::String(language.clone()),
            );
        }
        if let Some(view_id) = &self.builder_service_view_id {
            map.insert(
                "builder_service_view_id".to_string(),
                Value::String(view_id.clone()),
            );
        }
        Value::Object(map)
    }
}

/// Serialises a JSON value with object keys sorted recursively, so two
/// structurally equal queries always produce the same cache key.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by_key(|(key, _)| *key);
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).unwrap_or_default());
                    out.push(':');
                    write(value, out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Request body shape shared by the write endpoints.
#[derive(Debug, Deserialize)]
pub struct WriteBody {
    #[serde(default)]
    pub data: Value,
}

/// JSON body extractor that rejects with the gateway's envelope instead of
/// axum's plain-text 400.
pub struct JsonBody<T>(pub T);

impl<S, T> axum::extract::FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = GatewayError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        Ok(JsonBody(value))
    }
}
