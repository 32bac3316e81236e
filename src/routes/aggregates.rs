use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{debug, error};

use super::ApiState;
use crate::models::Granularity;

// ---

pub fn router() -> Router<ApiState> {
    // ---
    Router::new().route("/aggregates", get(handler))
}

/// Query parameters for bucket lookups
///
/// `from`/`to` are RFC 3339 instants; the window defaults to the last 24 hours.
#[derive(Debug, Deserialize)]
pub struct AggregatesQuery {
    device_id: Option<String>,
    granularity: String,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn handler(
    Query(params): Query<AggregatesQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    // ---
    let granularity = match params.granularity.parse::<Granularity>() {
        Ok(g) => g,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(e.to_string())).into_response(),
    };
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or(to - TimeDelta::hours(24));
    if from >= to {
        return (
            StatusCode::BAD_REQUEST,
            Json("`from` must precede `to`".to_string()),
        )
            .into_response();
    }

    debug!(?params, "GET /aggregates");

    match state
        .buckets
        .buckets(params.device_id.as_deref(), granularity, from, to)
        .await
    {
        Ok(buckets) => (StatusCode::OK, Json(buckets)).into_response(),
        Err(e) => {
            error!("Failed to load aggregates: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load aggregates".to_string()),
            )
                .into_response()
        }
    }
}
