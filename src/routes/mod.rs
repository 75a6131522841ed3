//! Router builders. Mount them under whatever prefixes the host uses.

mod common;
mod entity;
mod schema;

pub use common::common_routes;
pub use entity::entity_routes;
pub use schema::schema_routes;
