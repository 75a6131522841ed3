//! Relation grant handlers: list members and manage (add/remove) membership.

use crate::error::AppError;
use crate::handlers::entity::{entity_for, parse_id};
use crate::response::success_many;
use crate::service::{ManageRequest, RelationGrant};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

fn grant_for(state: &AppState, path_segment: &str, relation: &str) -> Result<Arc<RelationGrant>, AppError> {
    let owner = entity_for(state, path_segment)?;
    state
        .registry
        .grant(&owner.path, relation)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("no relation /{}/:id/{}", path_segment, relation)))
}

pub async fn list_related(
    State(state): State<AppState>,
    Path((path_segment, id_str, relation)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let grant = grant_for(&state, &path_segment, &relation)?;
    let owner_key = parse_id(&grant.owner, &id_str)?;
    let rows = state.relations().list(&grant, &owner_key, &params).await?;
    Ok(success_many(rows))
}

/// Always 200 when the request is well formed; per-key failures are in the `errors` bucket.
pub async fn manage_related(
    State(state): State<AppState>,
    Path((path_segment, id_str, relation)): Path<(String, String, String)>,
    Json(request): Json<ManageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let grant = grant_for(&state, &path_segment, &relation)?;
    let owner_key = parse_id(&grant.owner, &id_str)?;
    let result = state.relations().manage(&grant, &owner_key, &request).await?;
    Ok(Json(result))
}
