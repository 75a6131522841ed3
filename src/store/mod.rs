//! Persistence interface consumed by the compiler-driven services, plus the shipped adapters.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::{EntityDescriptor, RelationDescriptor};
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// An instance together with the entity it belongs to. Relation members of union relations
/// can belong to different entities, so the entity travels with the data.
#[derive(Clone, Debug)]
pub struct Record {
    pub entity: Arc<EntityDescriptor>,
    pub data: Value,
}

impl Record {
    pub fn new(entity: Arc<EntityDescriptor>, data: Value) -> Self {
        Record { entity, data }
    }

    pub fn key(&self) -> Value {
        self.entity.key_of(&self.data)
    }

    /// Identity across entities: `scope.Name:key`.
    pub fn identity(&self) -> String {
        identity(&self.entity.path, &self.key())
    }
}

pub fn identity(entity_path: &str, key: &Value) -> String {
    format!("{}:{}", entity_path, key_repr(key))
}

/// Key as shown in messages: strings unquoted, everything else as JSON.
pub fn key_repr(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Entity lookup, filtering, writes, and relation collections. Every call is an await point.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, entity: &EntityDescriptor, key: &Value) -> Result<Option<Value>, AppError>;

    /// Exact-match filter on attributes, in store order.
    async fn filter(
        &self,
        entity: &EntityDescriptor,
        filters: &[(String, Value)],
    ) -> Result<Vec<Value>, AppError>;

    async fn insert(&self, entity: &EntityDescriptor, payload: &Map<String, Value>) -> Result<Value, AppError>;

    async fn update(
        &self,
        entity: &EntityDescriptor,
        key: &Value,
        payload: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError>;

    async fn delete(&self, entity: &EntityDescriptor, key: &Value) -> Result<bool, AppError>;

    /// Current members of `relation` for the owner, in collection order.
    async fn related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
    ) -> Result<Vec<Record>, AppError>;

    /// Add members. For single-valued kinds the last member replaces the current one.
    async fn add_related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
        members: &[Record],
    ) -> Result<(), AppError>;

    async fn remove_related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
        members: &[Record],
    ) -> Result<(), AppError>;

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
