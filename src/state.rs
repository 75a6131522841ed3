//! Shared application state for all routes.

use crate::config::{Registry, DEFAULT_MAX_BODY_BYTES};
use crate::schema::{CompilerOptions, SchemaCompiler};
use crate::service::{CrudService, NoHooks, RelationService, SaveHooks};
use crate::store::EntityStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Compiled schemas are cached here for the life of the registry.
    pub compiler: Arc<SchemaCompiler>,
    pub store: Arc<dyn EntityStore>,
    pub hooks: Arc<dyn SaveHooks>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn EntityStore>) -> Self {
        AppState {
            compiler: Arc::new(SchemaCompiler::new(registry.clone())),
            registry,
            store,
            hooks: Arc::new(NoHooks),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SaveHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_compiler_options(mut self, options: CompilerOptions) -> Self {
        self.compiler = Arc::new(SchemaCompiler::with_options(self.registry.clone(), options));
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn crud(&self) -> CrudService<'_> {
        CrudService::new(&self.compiler, self.store.as_ref(), self.hooks.as_ref())
    }

    pub fn relations(&self) -> RelationService<'_> {
        RelationService::new(&self.compiler, self.store.as_ref())
    }
}
