//! HTTP handlers for entity CRUD, relation grants and schema description.

pub mod entity;
pub mod relation;
pub mod schema;
pub use entity::*;
pub use relation::*;
pub use schema::*;
