use axum::{
    Json,
    extract::{Query, Request, State},
};
use chrono::SecondsFormat;
use std::sync::Arc;

use crate::app::API_ROUTES;
use crate::error::ApiError;
use crate::gate::request_client;
use crate::models::{QuotaQuery, QuotaResponse};
use crate::state::AppState;

// Remaining quota on the general API preset, does not count as a request
pub async fn quota_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuotaQuery>,
    request: Request,
) -> Result<Json<QuotaResponse>, ApiError> {
    let client = request_client(&request);
    let path = match query.path.as_deref() {
        None => API_ROUTES[0],
        Some(path) if API_ROUTES.contains(&path) => path,
        Some(path) => {
            return Err(ApiError::BadRequest(format!(
                "No general API quota for {}",
                path
            )));
        }
    };
    let resource = state.api_limits.resource(path);

    let status = state
        .limiter
        .status(&client, resource, &state.api_limits)
        .await;

    Ok(Json(QuotaResponse {
        limit: status.limit,
        remaining: status.remaining,
        reset: status.reset_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        retry_after: status.retry_after,
    }))
}
