//! Example server: loads declarations from CONFIG_PATH, picks PostgreSQL when DATABASE_URL is set
//! (memory store otherwise), and mounts common, schema and entity routes.

use architect_relations::{
    common_routes, entity_routes, load_from_dir, schema_routes, AppState, EntityStore, GrantHooks,
    MemoryStore, PgStore, Settings,
};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("architect_relations=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let registry = Arc::new(load_from_dir(&settings.config_path, GrantHooks::new()).await?);

    let store: Arc<dyn EntityStore> = match &settings.database_url {
        Some(url) => {
            tracing::info!("using postgres store");
            Arc::new(PgStore::connect(url, registry.clone()).await?)
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new(registry.clone()))
        }
    };

    let state = AppState::new(registry, store)
        .with_compiler_options(settings.compiler_options())
        .with_max_body_bytes(settings.max_body_bytes);

    let app = Router::new()
        .merge(common_routes(state.clone()))
        .nest("/schemas", schema_routes(state.clone()))
        .nest("/api/v1", entity_routes(state));

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
