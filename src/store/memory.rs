//! In-process store: ordered rows per entity and ordered link lists per (owner, relation).
//! Keeps inverse relations in sync when a relation declares `inverse`.

use crate::config::{EntityDescriptor, Registry, RelationDescriptor};
use crate::error::AppError;
use crate::schema::ScalarType;
use crate::store::{key_repr, EntityStore, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// (owner path, owner key, relation name)
type LinkKey = (String, String, String);

#[derive(Clone, Debug, PartialEq)]
struct Link {
    entity: String,
    key: String,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Value>>,
    links: HashMap<LinkKey, Vec<Link>>,
}

pub struct MemoryStore {
    registry: Arc<Registry>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(registry: Arc<Registry>) -> Self {
        MemoryStore {
            registry,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Insert or replace a row as-is. Fixture helper for seeding.
    pub fn put(&self, entity_path: &str, row: Value) -> Result<(), AppError> {
        let entity = self.entity(entity_path)?;
        let key = key_repr(&entity.key_of(&row));
        let mut tables = self.write();
        let rows = tables.rows.entry(entity.path.clone()).or_default();
        match rows.iter_mut().find(|r| key_repr(&entity.key_of(r)) == key) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        Ok(())
    }

    /// Link `member` into the owner's relation, maintaining the inverse side. Fixture helper.
    pub fn link(
        &self,
        owner_path: &str,
        owner_key: Value,
        relation: &str,
        member_path: &str,
        member_key: Value,
    ) -> Result<(), AppError> {
        let owner = self.entity(owner_path)?;
        let rel = owner
            .relation(relation)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("relation {}.{}", owner.path, relation)))?;
        let member = Link {
            entity: self.entity(member_path)?.path.clone(),
            key: key_repr(&member_key),
        };
        let mut tables = self.write();
        self.connect(&mut tables, &owner.path, &key_repr(&owner_key), &rel, member);
        Ok(())
    }

    fn entity(&self, path: &str) -> Result<Arc<EntityDescriptor>, AppError> {
        self.registry
            .entity_by_path(path)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("entity {}", path)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn inverse_of(&self, member_entity: &str, relation: &RelationDescriptor) -> Option<RelationDescriptor> {
        let name = relation.inverse.as_deref()?;
        self.registry.entity_by_path(member_entity)?.relation(name).cloned()
    }

    /// Connect owner -> member and, when declared, member -> owner.
    fn connect(&self, tables: &mut Tables, owner_path: &str, owner_key: &str, relation: &RelationDescriptor, member: Link) {
        let displaced = push_link(tables, owner_path, owner_key, relation, member.clone());
        let Some(inverse) = self.inverse_of(&member.entity, relation) else {
            return;
        };
        let back = Link {
            entity: owner_path.to_string(),
            key: owner_key.to_string(),
        };
        for d in displaced {
            drop_link(tables, &d.entity, &d.key, &inverse.name, &back);
        }
        for d in push_link(tables, &member.entity, &member.key, &inverse, back) {
            drop_link(tables, &d.entity, &d.key, &relation.name, &member);
        }
    }

    fn disconnect(&self, tables: &mut Tables, owner_path: &str, owner_key: &str, relation: &RelationDescriptor, member: &Link) {
        drop_link(tables, owner_path, owner_key, &relation.name, member);
        if let Some(inverse) = self.inverse_of(&member.entity, relation) {
            let back = Link {
                entity: owner_path.to_string(),
                key: owner_key.to_string(),
            };
            drop_link(tables, &member.entity, &member.key, &inverse.name, &back);
        }
    }
}

/// Append (to-many) or replace (to-one). Returns links displaced by a replacement.
fn push_link(tables: &mut Tables, owner_path: &str, owner_key: &str, relation: &RelationDescriptor, member: Link) -> Vec<Link> {
    let list = tables
        .links
        .entry((owner_path.to_string(), owner_key.to_string(), relation.name.clone()))
        .or_default();
    if relation.kind.is_many() {
        if !list.contains(&member) {
            list.push(member);
        }
        Vec::new()
    } else {
        let displaced: Vec<Link> = list.drain(..).filter(|l| *l != member).collect();
        list.push(member);
        displaced
    }
}

fn drop_link(tables: &mut Tables, owner_path: &str, owner_key: &str, relation: &str, member: &Link) {
    let key = (owner_path.to_string(), owner_key.to_string(), relation.to_string());
    if let Some(list) = tables.links.get_mut(&key) {
        list.retain(|l| l != member);
    }
}

fn matches_filters(row: &Value, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(col, val)| match row.get(col) {
        Some(v) => v == val || key_repr(v) == key_repr(val),
        None => val.is_null(),
    })
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, entity: &EntityDescriptor, key: &Value) -> Result<Option<Value>, AppError> {
        let key = key_repr(key);
        let tables = self.read();
        Ok(tables
            .rows
            .get(&entity.path)
            .and_then(|rows| rows.iter().find(|r| key_repr(&entity.key_of(r)) == key))
            .cloned())
    }

    async fn filter(&self, entity: &EntityDescriptor, filters: &[(String, Value)]) -> Result<Vec<Value>, AppError> {
        let tables = self.read();
        Ok(tables
            .rows
            .get(&entity.path)
            .map(|rows| rows.iter().filter(|r| matches_filters(r, filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, entity: &EntityDescriptor, payload: &Map<String, Value>) -> Result<Value, AppError> {
        let mut row = Map::new();
        for attr in &entity.attributes {
            row.insert(attr.name.clone(), payload.get(&attr.name).cloned().unwrap_or(Value::Null));
        }
        let mut tables = self.write();
        let rows = tables.rows.entry(entity.path.clone()).or_default();

        let key = match row.get(&entity.primary_key).filter(|v| !v.is_null()) {
            Some(k) => entity
                .coerce_key(k)
                .ok_or_else(|| AppError::Validation(format!("invalid {} for {}", entity.primary_key, entity.name)))?,
            None => match entity.pk_type {
                ScalarType::Int | ScalarType::BigInt => {
                    let next = rows
                        .iter()
                        .filter_map(|r| entity.key_of(r).as_i64())
                        .max()
                        .unwrap_or(0)
                        + 1;
                    Value::from(next)
                }
                ScalarType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                _ => return Err(AppError::Validation(format!("{} is required", entity.primary_key))),
            },
        };
        let repr = key_repr(&key);
        if rows.iter().any(|r| key_repr(&entity.key_of(r)) == repr) {
            return Err(AppError::BadRequest(format!("{} with key {} already exists", entity.name, repr)));
        }
        row.insert(entity.primary_key.clone(), key);
        let row = Value::Object(row);
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        entity: &EntityDescriptor,
        key: &Value,
        payload: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let key = key_repr(key);
        let mut tables = self.write();
        let Some(row) = tables
            .rows
            .get_mut(&entity.path)
            .and_then(|rows| rows.iter_mut().find(|r| key_repr(&entity.key_of(r)) == key))
        else {
            return Ok(None);
        };
        if let Value::Object(obj) = row {
            for (k, v) in payload {
                if *k != entity.primary_key && entity.attribute(k).is_some() {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, entity: &EntityDescriptor, key: &Value) -> Result<bool, AppError> {
        let key = key_repr(key);
        let mut tables = self.write();
        let Some(rows) = tables.rows.get_mut(&entity.path) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| key_repr(&entity.key_of(r)) != key);
        if rows.len() == before {
            return Ok(false);
        }
        let gone = Link {
            entity: entity.path.clone(),
            key: key.clone(),
        };
        tables
            .links
            .retain(|(owner, owner_key, _), _| !(*owner == entity.path && *owner_key == key));
        for list in tables.links.values_mut() {
            list.retain(|l| *l != gone);
        }
        Ok(true)
    }

    async fn related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
    ) -> Result<Vec<Record>, AppError> {
        let tables = self.read();
        let link_key = (owner.path.clone(), key_repr(owner_key), relation.name.clone());
        let Some(links) = tables.links.get(&link_key) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(links.len());
        for link in links {
            let entity = self.entity(&link.entity)?;
            let row = tables
                .rows
                .get(&link.entity)
                .and_then(|rows| rows.iter().find(|r| key_repr(&entity.key_of(r)) == link.key));
            if let Some(row) = row {
                out.push(Record::new(entity, row.clone()));
            }
        }
        Ok(out)
    }

    async fn add_related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
        members: &[Record],
    ) -> Result<(), AppError> {
        let owner_key = key_repr(owner_key);
        let mut tables = self.write();
        for m in members {
            let link = Link {
                entity: m.entity.path.clone(),
                key: key_repr(&m.key()),
            };
            self.connect(&mut tables, &owner.path, &owner_key, relation, link);
        }
        Ok(())
    }

    async fn remove_related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
        members: &[Record],
    ) -> Result<(), AppError> {
        let owner_key = key_repr(owner_key);
        let mut tables = self.write();
        for m in members {
            let link = Link {
                entity: m.entity.path.clone(),
                key: key_repr(&m.key()),
            };
            self.disconnect(&mut tables, &owner.path, &owner_key, relation, &link);
        }
        Ok(())
    }
}
