//! PostgreSQL adapter. Entities map to tables; relations map to FK columns or through tables.

use crate::case::to_snake_case;
use crate::config::{EntityDescriptor, Registry, RelationDescriptor, RelationKind};
use crate::error::AppError;
use crate::schema::ScalarType;
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::store::{EntityStore, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

pub struct PgStore {
    pool: PgPool,
    registry: Arc<Registry>,
}

impl PgStore {
    pub fn new(pool: PgPool, registry: Arc<Registry>) -> Self {
        PgStore { pool, registry }
    }

    pub async fn connect(url: &str, registry: Arc<Registry>) -> Result<Self, AppError> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool, registry))
    }

    /// Single related entity for a relation; unions have no table mapping.
    fn target(&self, owner: &EntityDescriptor, relation: &RelationDescriptor) -> Result<Arc<EntityDescriptor>, AppError> {
        let mut targets = self.registry.resolve_ref(owner, &relation.related)?;
        if targets.len() != 1 {
            return Err(AppError::Store(format!(
                "relation {}.{} targets {} entities; only single-target relations map to tables",
                owner.path,
                relation.name,
                targets.len()
            )));
        }
        Ok(targets.remove(0))
    }

    fn bind_all(q: &QueryBuf) -> Result<Vec<PgBindValue>, AppError> {
        q.params.iter().map(|(v, ty)| PgBindValue::from_typed(v, *ty)).collect()
    }

    async fn fetch_all(&self, entity: &EntityDescriptor, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for b in Self::bind_all(q)? {
            query = query.bind(b);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| row_to_json(entity, r)).collect())
    }

    async fn fetch_optional(&self, entity: &EntityDescriptor, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for b in Self::bind_all(q)? {
            query = query.bind(b);
        }
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_json(entity, &r)))
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut query = sqlx::query(&q.sql);
        for b in Self::bind_all(q)? {
            query = query.bind(b);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

/// FK column for forward relations lives on the owner; reverse relations read it on the related side.
fn fk_column(owner: &EntityDescriptor, relation: &RelationDescriptor) -> String {
    if let Some(c) = &relation.column {
        return c.clone();
    }
    if relation.kind.is_forward() {
        format!("{}_id", relation.name)
    } else {
        format!("{}_id", to_snake_case(&owner.name))
    }
}

fn member_keys(members: &[Record]) -> Vec<Value> {
    members.iter().map(Record::key).collect()
}

fn missing_through(owner: &EntityDescriptor, relation: &RelationDescriptor) -> AppError {
    AppError::Store(format!("relation {}.{} needs a through table", owner.path, relation.name))
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get(&self, entity: &EntityDescriptor, key: &Value) -> Result<Option<Value>, AppError> {
        self.fetch_optional(entity, &sql::select_by_id(entity, key)).await
    }

    async fn filter(&self, entity: &EntityDescriptor, filters: &[(String, Value)]) -> Result<Vec<Value>, AppError> {
        self.fetch_all(entity, &sql::select_list(entity, filters)).await
    }

    async fn insert(&self, entity: &EntityDescriptor, payload: &Map<String, Value>) -> Result<Value, AppError> {
        self.fetch_optional(entity, &sql::insert(entity, payload))
            .await?
            .ok_or_else(|| AppError::Store(format!("insert into {} returned no row", entity.path)))
    }

    async fn update(
        &self,
        entity: &EntityDescriptor,
        key: &Value,
        payload: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        self.fetch_optional(entity, &sql::update(entity, key, payload)).await
    }

    async fn delete(&self, entity: &EntityDescriptor, key: &Value) -> Result<bool, AppError> {
        Ok(self.execute(&sql::delete(entity, key)).await? > 0)
    }

    async fn related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
    ) -> Result<Vec<Record>, AppError> {
        let target = self.target(owner, relation)?;
        let column = fk_column(owner, relation);
        let q = match relation.kind {
            RelationKind::ForwardToOne | RelationKind::ForwardOneToOne => {
                sql::select_forward(owner, &target, &column, owner_key)
            }
            RelationKind::ReverseToMany | RelationKind::ReverseOneToOne => {
                sql::select_where_column(&target, &column, owner_key, owner.pk_type)
            }
            RelationKind::ManyToMany => {
                let through = relation.through.as_ref().ok_or_else(|| missing_through(owner, relation))?;
                sql::select_through(&target, through, owner_key, owner.pk_type)
            }
        };
        let rows = self.fetch_all(&target, &q).await?;
        Ok(rows.into_iter().map(|r| Record::new(target.clone(), r)).collect())
    }

    async fn add_related(
        &self,
        owner: &EntityDescriptor,
        owner_key: &Value,
        relation: &RelationDescriptor,
        members: &[Record],
    ) -> Result<(), AppError> {
        let Some(last) = members.last() else {
            return Ok(());
        };
        let target = self.target(owner, relation)?;
        let column = fk_column(owner, relation);
        match relation.kind {
            RelationKind::ForwardToOne | RelationKind::ForwardOneToOne => {
                let owner_keys = [owner_key.clone()];
                self.execute(&sql::set_column_where_keys_in(owner, &column, &last.key(), &owner_keys, None))
                    .await?;
            }
            RelationKind::ReverseOneToOne => {
                self.execute(&sql::clear_column(&target, &column, owner_key)).await?;
                self.execute(&sql::set_column_where_keys_in(&target, &column, owner_key, &[last.key()], None))
                    .await?;
            }
            RelationKind::ReverseToMany => {
                let keys = member_keys(members);
                self.execute(&sql::set_column_where_keys_in(&target, &column, owner_key, &keys, None))
                    .await?;
            }
            RelationKind::ManyToMany => {
                let through = relation.through.as_ref().ok_or_else(|| missing_through(owner, relation))?;
                let keys = member_keys(members);
                self.execute(&sql::insert_through(through, owner_key, owner.pk_type, &keys, target.pk_type))
                    .await?;
            }
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
        if members.is_empty() {
            return Ok(());
        }
        let target = self.target(owner, relation)?;
        let column = fk_column(owner, relation);
        let keys = member_keys(members);
        let q = match relation.kind {
            RelationKind::ForwardToOne | RelationKind::ForwardOneToOne => {
                let owner_keys = [owner_key.clone()];
                // Only clear when the FK still points at one of the removed members.
                for key in &keys {
                    self.execute(&sql::set_column_where_keys_in(owner, &column, &Value::Null, &owner_keys, Some(key)))
                        .await?;
                }
                return Ok(());
            }
            RelationKind::ReverseToMany | RelationKind::ReverseOneToOne => {
                sql::set_column_where_keys_in(&target, &column, &Value::Null, &keys, Some(owner_key))
            }
            RelationKind::ManyToMany => {
                let through = relation.through.as_ref().ok_or_else(|| missing_through(owner, relation))?;
                sql::delete_through(through, owner_key, owner.pk_type, &keys, target.pk_type)
            }
        };
        self.execute(&q).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decode a row using the declared attribute types; the builder widens ints and floats.
fn row_to_json(entity: &EntityDescriptor, row: &PgRow) -> Value {
    let mut map = Map::new();
    for attr in &entity.attributes {
        map.insert(attr.name.clone(), cell_to_value(row, &attr.name, attr.ty));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str, ty: ScalarType) -> Value {
    let decoded = match ty {
        ScalarType::Int | ScalarType::BigInt => row.try_get::<Option<i64>, _>(name).map(|v| v.map(Value::from)),
        ScalarType::Float => row
            .try_get::<Option<f64>, _>(name)
            .map(|v| v.and_then(serde_json::Number::from_f64).map(Value::Number)),
        ScalarType::Bool => row.try_get::<Option<bool>, _>(name).map(|v| v.map(Value::Bool)),
        ScalarType::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(name)
            .map(|v| v.map(|u| Value::String(u.to_string()))),
        ScalarType::DateTime => match row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
            Ok(v) => Ok(v.map(|d| Value::String(d.to_rfc3339()))),
            Err(_) => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(name)
                .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        },
        ScalarType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(name)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))),
        ScalarType::Text => row.try_get::<Option<String>, _>(name).map(|v| v.map(Value::String)),
        ScalarType::Json => row.try_get::<Option<Value>, _>(name),
    };
    match decoded {
        Ok(v) => v.unwrap_or(Value::Null),
        Err(e) => {
            tracing::warn!(column = %name, error = %e, "column decode failed");
            Value::Null
        }
    }
}
