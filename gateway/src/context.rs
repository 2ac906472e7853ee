//! Explicit per-request state threaded through handlers.

use crate::auth::{ENVIRONMENT_ID_HEADER, Principal, RESOURCE_ID_HEADER};
use crate::errors::GatewayError;
use crate::query::ListParams;
use http::HeaderMap;

/// The tenant a request acts on. Pointers come from the principal when the
/// credential carries them (API keys always do), with the `Resource-Id` /
/// `Environment-Id` headers and the query-string fallbacks behind them.
#[derive(Clone, Debug)]
pub struct TenantRefs {
    pub project_id: String,
    pub environment_id: String,
    pub user_id: Option<String>,
}

impl TenantRefs {
    pub fn derive(
        principal: &Principal,
        headers: &HeaderMap,
        params: &ListParams,
    ) -> Result<Self, GatewayError> {
        let project_id = principal
            .project_id
            .clone()
            .or_else(|| header_value(headers, RESOURCE_ID_HEADER))
            .or_else(|| params.project_id.clone())
            .ok_or_else(|| GatewayError::InvalidArgument("project id not provided".to_string()))?;

        let environment_id = principal
            .environment_id
            .clone()
            .or_else(|| header_value(headers, ENVIRONMENT_ID_HEADER))
            .or_else(|| params.environment_id.clone())
            .ok_or_else(|| {
                GatewayError::InvalidArgument("environment id not provided".to_string())
            })?;

        let user_id = principal.user_id.clone().or_else(|| params.user_id.clone());

        Ok(TenantRefs {
            project_id,
            environment_id,
            user_id,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
