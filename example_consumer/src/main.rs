//! Example consumer: a separate Rust project that uses architect-relations as a dependency.
//! Declares entities in code, registers a list filter on a relation grant and a save hook,
//! and serves them from the in-memory store.
//!
//! Run from repo root: `cargo run -p example-consumer`

use architect_relations::{
    common_routes, config::EntityDescriptor, entity_routes, resolve_with_hooks, schema_routes, AppError, AppState,
    FullConfig, GrantHooks, MemoryStore, Record, RelationHooks, SaveHooks,
};
use architect_relations::service::ParsedInput;
use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Stamps a slug onto every saved author.
struct Slugs;

#[async_trait]
impl SaveHooks for Slugs {
    async fn before_save(&self, entity: &EntityDescriptor, input: &mut ParsedInput) -> Result<(), AppError> {
        if entity.name == "Author" {
            if let Some(name) = input.model.get("name").and_then(Value::as_str) {
                let slug = name.to_lowercase().replace(' ', "-");
                input.model.insert("slug".into(), Value::String(slug));
            }
        }
        Ok(())
    }
}

fn declarations() -> Result<FullConfig, serde_json::Error> {
    serde_json::from_value(json!({
        "entities": [
            {
                "name": "Author",
                "scope": "library",
                "primary_key": "id",
                "attributes": [
                    { "name": "id", "type": "int", "has_default": true },
                    { "name": "name", "type": "text" },
                    { "name": "slug", "type": "text", "nullable": true }
                ],
                "schemas": {
                    "read": { "fields": ["id", "name", "slug", "books"] },
                    "create": { "fields": ["name", "books"] },
                    "update": { "fields": ["name", "books"] }
                },
                "relations": {
                    "books": { "kind": "reverse_to_many", "related": "Book", "inverse": "author" }
                }
            },
            {
                "name": "Book",
                "scope": "library",
                "primary_key": "id",
                "attributes": [
                    { "name": "id", "type": "int", "has_default": true },
                    { "name": "title", "type": "text" },
                    { "name": "year", "type": "int", "nullable": true }
                ],
                "schemas": {
                    "read": { "fields": ["id", "title", "year", "author"] },
                    "create": { "fields": ["title", "year", "author"] }
                },
                "relations": {
                    "author": { "kind": "forward_to_one", "related": "Author", "as_primitive_key": true, "inverse": "books" }
                }
            }
        ],
        "grants": [
            { "owner": "library.Author", "relation": "books", "filters": { "since": { "type": "int" } } }
        ]
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("architect_relations=debug")),
        )
        .init();

    let since = |members: Vec<Record>, filters: &Map<String, Value>| -> Vec<Record> {
        let Some(min) = filters.get("since").and_then(Value::as_i64) else {
            return members;
        };
        members
            .into_iter()
            .filter(|m| m.data.get("year").and_then(Value::as_i64).is_some_and(|y| y >= min))
            .collect()
    };
    let hooks = GrantHooks::new().register("library.Author", "books", RelationHooks::default().with_filter(since));
    let registry = Arc::new(resolve_with_hooks(&declarations()?, hooks)?);
    let store = Arc::new(MemoryStore::new(registry.clone()));
    let state = AppState::new(registry, store).with_hooks(Arc::new(Slugs));

    let app = Router::new()
        .merge(common_routes(state.clone()))
        .nest("/schemas", schema_routes(state.clone()))
        .nest("/api", entity_routes(state));
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
