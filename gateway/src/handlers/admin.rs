//! Admin routes: company and project management pass-throughs against the
//! project service. Guarded by the admin authenticator.

use crate::envelope::Reply;
use crate::errors::GatewayError;
use crate::state::AppState;
use axum::extract::{Query, State};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct AdminParams {
    pub company_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AdminParams {
    fn paging(&self, default_limit: u32) -> (u32, u32) {
        (self.limit.unwrap_or(default_limit), self.offset.unwrap_or(0))
    }
}

pub async fn list_companies(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
) -> Result<Reply, GatewayError> {
    let (limit, offset) = params.paging(state.config.default_page_limit);

    let data = state
        .resolver
        .project_service()
        .list_companies(limit, offset)
        .await
        .map_err(GatewayError::from)?;

    Ok(Reply::ok(data, None))
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
) -> Result<Reply, GatewayError> {
    let company_id = params.company_id.clone().ok_or_else(|| {
        GatewayError::InvalidArgument("company_id is required".to_string())
    })?;
    let (limit, offset) = params.paging(state.config.default_page_limit);

    let data = state
        .resolver
        .project_service()
        .list_projects(&company_id, limit, offset)
        .await
        .map_err(GatewayError::from)?;

    Ok(Reply::ok(data, None))
}
