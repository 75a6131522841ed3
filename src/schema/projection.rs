//! Serialize instances through a compiled schema, following relations via the store.

use crate::config::Registry;
use crate::error::AppError;
use crate::schema::{CompiledField, CompiledSchema, FieldSource, FieldType};
use crate::store::{EntityStore, Record};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

type ProjectFuture<'b> = Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send + 'b>>;

pub struct Projector<'a> {
    registry: &'a Registry,
    store: &'a dyn EntityStore,
}

impl<'a> Projector<'a> {
    pub fn new(registry: &'a Registry, store: &'a dyn EntityStore) -> Self {
        Projector { registry, store }
    }

    /// Project one instance of `schema.entity`. Nested relation schemas recurse.
    pub fn project<'b>(&'b self, schema: &'b CompiledSchema, instance: &'b Value) -> ProjectFuture<'b> {
        Box::pin(async move {
            let mut out = Map::new();
            for field in &schema.fields {
                let value = match &field.source {
                    FieldSource::Relation { .. } => self.relation_value(schema, field, instance).await?,
                    FieldSource::Attribute => instance.get(&field.name).cloned().unwrap_or(Value::Null),
                    FieldSource::Custom | FieldSource::Optional => match instance.get(&field.name) {
                        Some(v) => v.clone(),
                        None => field.default.value().unwrap_or(Value::Null),
                    },
                };
                out.insert(field.name.clone(), value);
            }
            Ok(Value::Object(out))
        })
    }

    /// Project already-loaded relation members with the item type of a relation field.
    pub async fn project_members(&self, item: &FieldType, members: &[Record]) -> Result<Vec<Value>, AppError> {
        let mut out = Vec::with_capacity(members.len());
        for m in members {
            out.push(self.project_member(item, m).await?);
        }
        Ok(out)
    }

    async fn relation_value(
        &self,
        schema: &CompiledSchema,
        field: &CompiledField,
        instance: &Value,
    ) -> Result<Value, AppError> {
        let owner = self
            .registry
            .entity_by_path(&schema.entity)
            .ok_or_else(|| AppError::NotFound(format!("entity {}", schema.entity)))?;
        let relation = owner
            .relation(&field.name)
            .ok_or_else(|| AppError::NotFound(format!("relation {}.{}", owner.path, field.name)))?;
        let owner_key = owner.key_of(instance);
        if owner_key.is_null() {
            return Ok(if relation.kind.is_many() { Value::Array(Vec::new()) } else { Value::Null });
        }
        let members = self.store.related(owner, &owner_key, relation).await?;
        let mut items = self.project_members(field.ty.item(), &members).await?;
        if relation.kind.is_many() {
            Ok(Value::Array(items))
        } else if items.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(items.swap_remove(0))
        }
    }

    async fn project_member(&self, item: &FieldType, member: &Record) -> Result<Value, AppError> {
        match item {
            FieldType::Object(s) => self.project(s, &member.data).await,
            FieldType::Union(members) => match members.iter().find(|s| s.entity == member.entity.path) {
                Some(s) => self.project(s, &member.data).await,
                None => Ok(member.key()),
            },
            _ => Ok(member.key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::schema::{SchemaCompiler, SchemaContext};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn library() -> Arc<Registry> {
        let config: FullConfig = serde_json::from_value(json!({
            "entities": [
                {
                    "name": "Author",
                    "scope": "library",
                    "primary_key": "id",
                    "attributes": [
                        { "name": "id", "type": "int" },
                        { "name": "name", "type": "text" }
                    ],
                    "schemas": {
                        "read": { "fields": ["id", "name", "books"], "customs": [["rank", "int", 0]] }
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
                        { "name": "id", "type": "int" },
                        { "name": "title", "type": "text" }
                    ],
                    "schemas": { "read": { "fields": ["id", "title", "author"] } },
                    "relations": {
                        "author": { "kind": "forward_to_one", "related": "Author", "as_primitive_key": true, "inverse": "books" }
                    }
                }
            ]
        }))
        .unwrap();
        Arc::new(resolve(&config).unwrap())
    }

    #[tokio::test]
    async fn nested_relations_use_related_schema() {
        let registry = library();
        let store = MemoryStore::new(registry.clone());
        store.put("library.Author", json!({"id": 1, "name": "Le Guin"})).unwrap();
        store.put("library.Book", json!({"id": 10, "title": "Lathe"})).unwrap();
        store.link("library.Author", json!(1), "books", "library.Book", json!(10)).unwrap();

        let compiler = SchemaCompiler::new(registry.clone());
        let author = registry.entity_by_path("library.Author").unwrap();
        let schema = compiler.compile(author, SchemaContext::Read).unwrap().unwrap();
        let projector = Projector::new(&registry, &store);
        let out = projector
            .project(&schema, &json!({"id": 1, "name": "Le Guin"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({
                "id": 1,
                "name": "Le Guin",
                "books": [{ "id": 10, "title": "Lathe", "author": 1 }],
                "rank": 0
            })
        );
    }

    #[tokio::test]
    async fn missing_single_relation_projects_null() {
        let registry = library();
        let store = MemoryStore::new(registry.clone());
        let compiler = SchemaCompiler::new(registry.clone());
        let book = registry.entity_by_path("library.Book").unwrap();
        let schema = compiler.compile(book, SchemaContext::Read).unwrap().unwrap();
        let projector = Projector::new(&registry, &store);
        let out = projector.project(&schema, &json!({"id": 3, "title": "Orphan"})).await.unwrap();
        assert_eq!(out["author"], Value::Null);
    }
}
