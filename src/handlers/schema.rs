//! Compiled schema description per entity and context.

use crate::error::AppError;
use crate::handlers::entity::entity_for;
use crate::response::success_one_ok;
use crate::schema::SchemaContext;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

pub async fn describe(
    State(state): State<AppState>,
    Path((path_segment, context)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment)?;
    let context: SchemaContext = context.parse().map_err(AppError::BadRequest)?;
    let schema = state
        .compiler
        .compile(&entity, context)?
        .ok_or_else(|| AppError::NotFound(format!("{} has no {} schema", entity.name, context)))?;
    Ok(success_one_ok(schema))
}
