//! Architect relations: declarative schema compilation and relation management for entity APIs.

pub mod case;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_dir, resolve, resolve_with_hooks, FullConfig, Registry, Settings};
pub use error::{AppError, ConfigError};
pub use response::{success_many, success_one};
pub use routes::{common_routes, entity_routes, schema_routes};
pub use schema::{CompiledSchema, CompilerOptions, DetailFallback, SchemaCompiler, SchemaContext};
pub use service::{CrudService, GrantHooks, ManageRequest, ManageResult, RelationHooks, RelationService, SaveHooks};
pub use state::AppState;
pub use store::{EntityStore, MemoryStore, PgStore, Record};
