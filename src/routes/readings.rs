use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error};

use super::ApiState;

// ---

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

pub fn router() -> Router<ApiState> {
    // ---
    Router::new()
        .route("/readings", get(recent))
        .route("/readings/latest", get(latest))
}

/// Query parameters for reading lookups
#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    device_id: String,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    device_id: String,
}

async fn recent(
    Query(params): Query<ReadingsQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    // ---
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    debug!(device_id = %params.device_id, limit, "GET /readings");

    match state
        .readings
        .recent_for_device(&params.device_id, i64::from(limit))
        .await
    {
        Ok(readings) => (StatusCode::OK, Json(readings)).into_response(),
        Err(e) => {
            error!("Failed to load readings: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load readings"),
            )
                .into_response()
        }
    }
}

async fn latest(
    Query(params): Query<LatestQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    // ---
    debug!(device_id = %params.device_id, "GET /readings/latest");

    match state.readings.latest_for_device(&params.device_id).await {
        Ok(Some(reading)) => (StatusCode::OK, Json(reading)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json("No readings for device")).into_response(),
        Err(e) => {
            error!("Failed to load latest reading: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load readings"),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::NewReading;
    use crate::store::memory::MemoryStore;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::sync::Arc;

    fn state_with_readings(count: i64) -> ApiState {
        // ---
        let store = Arc::new(MemoryStore::new());
        let t0 = Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap();
        for i in 0..count {
            store.insert_reading(NewReading {
                device_id: "d1".to_string(),
                temperature: 20.0 + i as f64,
                humidity: None,
                received_at: t0 + TimeDelta::minutes(i),
                device_time: None,
            });
        }
        ApiState {
            readings: store.clone(),
            buckets: store,
        }
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        // ---
        let state = state_with_readings(5);
        let readings = state.readings.recent_for_device("d1", 2).await.unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].temperature, 24.0);

        let response = recent(
            Query(ReadingsQuery {
                device_id: "d1".to_string(),
                limit: Some(2),
            }),
            State(state),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_latest_unknown_device_is_not_found() {
        // ---
        let response = latest(
            Query(LatestQuery {
                device_id: "nope".to_string(),
            }),
            State(state_with_readings(1)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
