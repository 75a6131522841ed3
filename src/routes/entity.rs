//! Entity CRUD and relation grant routes.
//! Parameterized paths: handlers resolve the entity by segment and the grant by owner and relation segment.

use crate::handlers::entity::{create, delete as delete_handler, list, read, update};
use crate::handlers::relation::{list_related, manage_related};
use crate::state::AppState;
use axum::{routing::get, Router};
use tower_http::limit::RequestBodyLimitLayer;

pub fn entity_routes(state: AppState) -> Router {
    let limit = RequestBodyLimitLayer::new(state.max_body_bytes);
    Router::new()
        .route("/:path_segment", get(list).post(create))
        .route(
            "/:path_segment/:id",
            get(read).patch(update).delete(delete_handler),
        )
        .route(
            "/:path_segment/:id/:relation",
            get(list_related).post(manage_related),
        )
        .layer(limit)
        .with_state(state)
}
