use std::sync::Arc;

use axum::Router;

use crate::store::{BucketStore, ReadingStore};

mod aggregates;
mod health;
mod readings;

// ---

/// Shared state for the read API.
#[derive(Clone)]
pub struct ApiState {
    pub readings: Arc<dyn ReadingStore>,
    pub buckets: Arc<dyn BucketStore>,
}

pub fn router(state: ApiState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(aggregates::router())
        .merge(health::router())
        .with_state(state)
}
