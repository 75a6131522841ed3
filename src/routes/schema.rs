//! Schema description routes: GET /:path_segment/:context.

use crate::handlers::schema::describe;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn schema_routes(state: AppState) -> Router {
    Router::new()
        .route("/:path_segment/:context", get(describe))
        .with_state(state)
}
