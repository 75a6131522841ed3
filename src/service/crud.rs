//! CrudService: entity create/read/update/delete driven by compiled schemas.
//! Input is split per the Create/Update schema, relation keys are resolved one lookup each,
//! and output is projected through Read or Detail.

use crate::config::{EntityDescriptor, RelationDescriptor};
use crate::error::AppError;
use crate::schema::{CompiledField, FieldSource, Projector, SchemaCompiler, SchemaContext};
use crate::service::relation::{apply_batches, lookup_key};
use crate::store::{key_repr, EntityStore, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// New membership for one relation field of the payload. Empty `members` clears the relation.
#[derive(Clone, Debug)]
pub struct RelationAssignment {
    pub relation: RelationDescriptor,
    pub members: Vec<Record>,
}

/// Payload split into store attributes, custom/optional values and relation assignments.
#[derive(Clone, Debug, Default)]
pub struct ParsedInput {
    pub model: Map<String, Value>,
    pub customs: Map<String, Value>,
    pub relations: Vec<RelationAssignment>,
}

/// Save lifecycle. Create runs `on_create_before_save, before_save, save, on_create_after_save,
/// after_save`; update runs `before_save, save, after_save`.
#[async_trait]
pub trait SaveHooks: Send + Sync {
    async fn on_create_before_save(&self, _entity: &EntityDescriptor, _input: &mut ParsedInput) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_save(&self, _entity: &EntityDescriptor, _input: &mut ParsedInput) -> Result<(), AppError> {
        Ok(())
    }

    async fn on_create_after_save(&self, _entity: &EntityDescriptor, _saved: &Value, _input: &ParsedInput) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_save(&self, _entity: &EntityDescriptor, _saved: &Value, _input: &ParsedInput) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct NoHooks;

impl SaveHooks for NoHooks {}

pub struct CrudService<'a> {
    compiler: &'a SchemaCompiler,
    store: &'a dyn EntityStore,
    hooks: &'a dyn SaveHooks,
}

impl<'a> CrudService<'a> {
    pub fn new(compiler: &'a SchemaCompiler, store: &'a dyn EntityStore, hooks: &'a dyn SaveHooks) -> Self {
        CrudService { compiler, store, hooks }
    }

    /// List rows with exact-match filters on attributes. Unknown parameters are ignored.
    pub async fn list(&self, entity: &EntityDescriptor, query: &HashMap<String, String>) -> Result<Vec<Value>, AppError> {
        let mut filters = Vec::new();
        for (k, raw) in query {
            let Some(attr) = entity.attribute(k) else {
                tracing::warn!(entity = %entity.path, param = %k, "ignoring unknown filter");
                continue;
            };
            let v = attr
                .ty
                .parse_str(raw)
                .ok_or_else(|| AppError::Validation(format!("filter {}: '{}' is not a valid {}", k, raw, attr.ty.pg_type())))?;
            filters.push((k.clone(), v));
        }
        filters.sort_by(|a, b| a.0.cmp(&b.0));
        let rows = self.store.filter(entity, &filters).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.project(entity, SchemaContext::Read, row).await?);
        }
        Ok(out)
    }

    pub async fn read(&self, entity: &EntityDescriptor, id: &Value) -> Result<Value, AppError> {
        let (_, row) = self.load(entity, id).await?;
        self.project(entity, SchemaContext::Detail, &row).await
    }

    pub async fn create(&self, entity: &EntityDescriptor, body: &Value) -> Result<Value, AppError> {
        let mut input = self.parse_input(entity, SchemaContext::Create, body).await?;
        self.hooks.on_create_before_save(entity, &mut input).await?;
        self.hooks.before_save(entity, &mut input).await?;

        let saved = self.store.insert(entity, &input.model).await?;
        let key = entity.key_of(&saved);
        for assignment in &input.relations {
            if !assignment.members.is_empty() {
                apply_batches(self.store, entity, &key, &assignment.relation, &assignment.members, &[]).await?;
            }
        }
        tracing::debug!(entity = %entity.path, key = %key_repr(&key), "created");

        self.hooks.on_create_after_save(entity, &saved, &input).await?;
        self.hooks.after_save(entity, &saved, &input).await?;
        self.project(entity, SchemaContext::Read, &saved).await
    }

    /// Partial update. Relation fields present in the payload replace current membership.
    pub async fn update(&self, entity: &EntityDescriptor, id: &Value, body: &Value) -> Result<Value, AppError> {
        let (key, _) = self.load(entity, id).await?;
        let mut input = self.parse_input(entity, SchemaContext::Update, body).await?;
        self.hooks.before_save(entity, &mut input).await?;

        let saved = self
            .store
            .update(entity, &key, &input.model)
            .await?
            .ok_or_else(|| not_found(entity, id))?;
        for assignment in &input.relations {
            self.replace_members(entity, &key, assignment).await?;
        }

        self.hooks.after_save(entity, &saved, &input).await?;
        self.project(entity, SchemaContext::Read, &saved).await
    }

    pub async fn delete(&self, entity: &EntityDescriptor, id: &Value) -> Result<Value, AppError> {
        let key = entity.coerce_key(id).ok_or_else(|| not_found(entity, id))?;
        if !self.store.delete(entity, &key).await? {
            return Err(not_found(entity, id));
        }
        let mut out = Map::new();
        out.insert(entity.primary_key.clone(), key);
        Ok(Value::Object(out))
    }

    /// Project through the compiled schema for `context`. Entities without one expose only their key.
    pub async fn project(&self, entity: &EntityDescriptor, context: SchemaContext, instance: &Value) -> Result<Value, AppError> {
        match self.compiler.compile(entity, context)? {
            Some(schema) => {
                Projector::new(self.compiler.registry(), self.store)
                    .project(&schema, instance)
                    .await
            }
            None => {
                let mut out = Map::new();
                out.insert(entity.primary_key.clone(), entity.key_of(instance));
                Ok(Value::Object(out))
            }
        }
    }

    /// Split a payload per the input schema for `context`, checking types and required fields.
    pub async fn parse_input(&self, entity: &EntityDescriptor, context: SchemaContext, body: &Value) -> Result<ParsedInput, AppError> {
        let obj = body
            .as_object()
            .ok_or_else(|| AppError::BadRequest("body must be a JSON object".into()))?;
        let schema = self
            .compiler
            .compile(entity, context)?
            .ok_or_else(|| AppError::BadRequest(format!("{} does not accept {} input", entity.name, context)))?;

        for k in obj.keys() {
            if schema.field(k).is_none() {
                tracing::debug!(entity = %entity.path, field = %k, "ignoring undeclared input field");
            }
        }

        let mut input = ParsedInput::default();
        let mut missing = Vec::new();
        for field in &schema.fields {
            let Some(value) = obj.get(&field.name) else {
                if context == SchemaContext::Create {
                    match (&field.source, field.default.value()) {
                        (_, None) => missing.push(field.name.as_str()),
                        (FieldSource::Custom | FieldSource::Optional, Some(d)) => {
                            input.customs.insert(field.name.clone(), d);
                        }
                        _ => {}
                    }
                }
                continue;
            };
            match &field.source {
                FieldSource::Relation { .. } => {
                    input.relations.push(self.parse_relation(entity, field, value).await?);
                }
                FieldSource::Attribute => {
                    check_type(field, value)?;
                    input.model.insert(field.name.clone(), value.clone());
                }
                FieldSource::Custom | FieldSource::Optional => {
                    check_type(field, value)?;
                    input.customs.insert(field.name.clone(), value.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Err(AppError::Validation(format!("missing required field(s): {}", missing.join(", "))));
        }
        Ok(input)
    }

    /// Resolve relation keys, one lookup per key.
    async fn parse_relation(&self, entity: &EntityDescriptor, field: &CompiledField, value: &Value) -> Result<RelationAssignment, AppError> {
        let relation = entity
            .relation(&field.name)
            .ok_or_else(|| AppError::NotFound(format!("relation {}.{}", entity.path, field.name)))?;
        let keys: Vec<Value> = match value {
            Value::Null => Vec::new(),
            Value::Array(items) if relation.kind.is_many() => items.clone(),
            Value::Array(_) => {
                return Err(AppError::Validation(format!("{} takes a single key", field.name)));
            }
            _ if relation.kind.is_many() => {
                return Err(AppError::Validation(format!("{} takes a list of keys", field.name)));
            }
            other => vec![other.clone()],
        };
        let targets = self.compiler.registry().resolve_ref(entity, &relation.related)?;
        let mut members = Vec::with_capacity(keys.len());
        for key in &keys {
            match lookup_key(self.store, targets.clone(), key).await? {
                Some(record) => members.push(record),
                None => {
                    let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
                    return Err(AppError::RelationNotFound {
                        entity: names.join("/"),
                        key: key_repr(key),
                    });
                }
            }
        }
        Ok(RelationAssignment {
            relation: relation.clone(),
            members,
        })
    }

    async fn replace_members(&self, entity: &EntityDescriptor, key: &Value, assignment: &RelationAssignment) -> Result<(), AppError> {
        let current = self.store.related(entity, key, &assignment.relation).await?;
        let wanted: HashSet<String> = assignment.members.iter().map(Record::identity).collect();
        let present: HashSet<String> = current.iter().map(Record::identity).collect();
        let add: Vec<Record> = assignment
            .members
            .iter()
            .filter(|m| !present.contains(&m.identity()))
            .cloned()
            .collect();
        let remove: Vec<Record> = if assignment.relation.kind.is_many() || assignment.members.is_empty() {
            current.into_iter().filter(|m| !wanted.contains(&m.identity())).collect()
        } else {
            // A single-valued add replaces the current member in the store.
            Vec::new()
        };
        apply_batches(self.store, entity, key, &assignment.relation, &add, &remove).await
    }

    async fn load(&self, entity: &EntityDescriptor, id: &Value) -> Result<(Value, Value), AppError> {
        let key = entity.coerce_key(id).ok_or_else(|| not_found(entity, id))?;
        let row = self.store.get(entity, &key).await?.ok_or_else(|| not_found(entity, id))?;
        Ok((key, row))
    }
}

fn not_found(entity: &EntityDescriptor, id: &Value) -> AppError {
    AppError::NotFound(format!("{} with key {} not found", entity.name, key_repr(id)))
}

fn check_type(field: &CompiledField, value: &Value) -> Result<(), AppError> {
    if field.ty.accepts(value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("field {} has the wrong type", field.name)))
    }
}
