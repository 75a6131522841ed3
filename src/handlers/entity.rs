//! Entity CRUD handlers: list, create, read, update, delete.

use crate::config::EntityDescriptor;
use crate::error::AppError;
use crate::response::{success_many, success_one, success_one_ok};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn entity_for(state: &AppState, path_segment: &str) -> Result<Arc<EntityDescriptor>, AppError> {
    state
        .registry
        .entity_by_segment(path_segment)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("no entity at /{}", path_segment)))
}

/// Path ids arrive as text; parse per the primary-key type.
pub(crate) fn parse_id(entity: &EntityDescriptor, id_str: &str) -> Result<Value, AppError> {
    entity
        .pk_type
        .parse_str(id_str)
        .ok_or_else(|| AppError::BadRequest(format!("invalid {} id: {}", entity.name, id_str)))
}

pub async fn list(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment)?;
    let rows = state.crud().list(&entity, &params).await?;
    Ok(success_many(rows))
}

pub async fn create(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment)?;
    let row = state.crud().create(&entity, &body).await?;
    Ok(success_one(row))
}

pub async fn read(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment)?;
    let id = parse_id(&entity, &id_str)?;
    let row = state.crud().read(&entity, &id).await?;
    Ok(success_one_ok(row))
}

pub async fn update(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment)?;
    let id = parse_id(&entity, &id_str)?;
    let row = state.crud().update(&entity, &id, &body).await?;
    Ok(success_one_ok(row))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment)?;
    let id = parse_id(&entity, &id_str)?;
    state.crud().delete(&entity, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
