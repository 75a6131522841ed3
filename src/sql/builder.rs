//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and relation statements from entity descriptors.
//! Identifiers come from declarations only; values are always bound as parameters.

use crate::config::{EntityDescriptor, ThroughConfig};
use crate::schema::ScalarType;
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from declarations).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn entity_table(entity: &EntityDescriptor) -> String {
    qualified_table(&entity.table.schema, &entity.table.name)
}

fn through_table(through: &ThroughConfig) -> String {
    qualified_table(through.schema.as_deref().unwrap_or("public"), &through.table)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<(Value, ScalarType)>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a parameter and return its cast placeholder (e.g. `$2::uuid`).
    fn push_param(&mut self, v: Value, ty: ScalarType) -> String {
        self.params.push((v, ty));
        format!("${}::{}", self.params.len(), ty.pg_type())
    }

    fn placeholders(&mut self, values: &[Value], ty: ScalarType) -> String {
        values
            .iter()
            .map(|v| self.push_param(v.clone(), ty))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// SELECT list over declared attributes, optionally prefixed by a table alias.
/// Ints and floats are widened so rows decode uniformly as i64/f64.
fn select_column_list(entity: &EntityDescriptor, alias: Option<&str>) -> String {
    entity
        .attributes
        .iter()
        .map(|a| {
            let col = match alias {
                Some(al) => format!("{}.{}", al, quoted(&a.name)),
                None => quoted(&a.name),
            };
            match a.ty {
                ScalarType::Int | ScalarType::BigInt => format!("{}::int8 AS {}", col, quoted(&a.name)),
                ScalarType::Float => format!("{}::float8 AS {}", col, quoted(&a.name)),
                ScalarType::Json => format!("{}::jsonb AS {}", col, quoted(&a.name)),
                _ if alias.is_some() => format!("{} AS {}", col, quoted(&a.name)),
                _ => col,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_type(entity: &EntityDescriptor, column: &str) -> ScalarType {
    entity.attribute(column).map(|a| a.ty).unwrap_or(ScalarType::Text)
}

/// SELECT by primary key.
pub fn select_by_id(entity: &EntityDescriptor, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(id.clone(), entity.pk_type);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(entity, None),
        entity_table(entity),
        quoted(&entity.primary_key),
        ph
    );
    q
}

/// SELECT with exact-match filters on declared attributes, ORDER BY pk.
pub fn select_list(entity: &EntityDescriptor, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut where_parts = Vec::new();
    for (col, val) in filters {
        let Some(attr) = entity.attribute(col) else { continue };
        if val.is_null() {
            where_parts.push(format!("{} IS NULL", quoted(col)));
        } else {
            let ph = q.push_param(val.clone(), attr.ty);
            where_parts.push(format!("{} = {}", quoted(col), ph));
        }
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        select_column_list(entity, None),
        entity_table(entity),
        where_clause,
        quoted(&entity.primary_key)
    );
    q
}

/// SELECT related rows where `column` equals the owner key. Reverse relations.
pub fn select_where_column(related: &EntityDescriptor, column: &str, owner_key: &Value, key_ty: ScalarType) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(owner_key.clone(), key_ty);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {} ORDER BY {}",
        select_column_list(related, None),
        entity_table(related),
        quoted(column),
        ph,
        quoted(&related.primary_key)
    );
    q
}

/// SELECT the related row referenced by the owner's FK column. Forward relations.
pub fn select_forward(owner: &EntityDescriptor, related: &EntityDescriptor, column: &str, owner_key: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(owner_key.clone(), owner.pk_type);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = (SELECT {} FROM {} WHERE {} = {})",
        select_column_list(related, None),
        entity_table(related),
        quoted(&related.primary_key),
        quoted(column),
        entity_table(owner),
        quoted(&owner.primary_key),
        ph
    );
    q
}

/// SELECT related rows joined through a many-to-many table.
pub fn select_through(related: &EntityDescriptor, through: &ThroughConfig, owner_key: &Value, key_ty: ScalarType) -> QueryBuf {
    const REL_ALIAS: &str = "rel";
    const JOIN_ALIAS: &str = "link";
    let mut q = QueryBuf::new();
    let ph = q.push_param(owner_key.clone(), key_ty);
    q.sql = format!(
        "SELECT {} FROM {} {} JOIN {} {} ON {}.{} = {}.{} WHERE {}.{} = {} ORDER BY {}.{}",
        select_column_list(related, Some(REL_ALIAS)),
        entity_table(related),
        REL_ALIAS,
        through_table(through),
        JOIN_ALIAS,
        JOIN_ALIAS,
        quoted(&through.target_column),
        REL_ALIAS,
        quoted(&related.primary_key),
        JOIN_ALIAS,
        quoted(&through.source_column),
        ph,
        REL_ALIAS,
        quoted(&related.primary_key)
    );
    q
}

/// UPDATE `table.column` for rows whose pk is in `keys`. Used for forward (owner row) and
/// reverse (related rows) FK writes; `value` null clears the link.
pub fn set_column_where_keys_in(
    entity: &EntityDescriptor,
    column: &str,
    value: &Value,
    keys: &[Value],
    only_if_current: Option<&Value>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let col_ty = column_type(entity, column);
    let set_rhs = if value.is_null() {
        "NULL".to_string()
    } else {
        q.push_param(value.clone(), col_ty)
    };
    let in_list = q.placeholders(keys, entity.pk_type);
    let guard = match only_if_current {
        Some(current) => format!(" AND {} = {}", quoted(column), q.push_param(current.clone(), col_ty)),
        None => String::new(),
    };
    q.sql = format!(
        "UPDATE {} SET {} = {} WHERE {} IN ({}){}",
        entity_table(entity),
        quoted(column),
        set_rhs,
        quoted(&entity.primary_key),
        in_list,
        guard
    );
    q
}

/// UPDATE `column` to NULL wherever it currently equals `value`.
pub fn clear_column(entity: &EntityDescriptor, column: &str, value: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(value.clone(), column_type(entity, column));
    q.sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = {}",
        entity_table(entity),
        quoted(column),
        quoted(column),
        ph
    );
    q
}

/// INSERT (source, target) pairs into a through table, ignoring existing pairs.
pub fn insert_through(through: &ThroughConfig, owner_key: &Value, owner_ty: ScalarType, targets: &[Value], target_ty: ScalarType) -> QueryBuf {
    let mut q = QueryBuf::new();
    let source_ph = q.push_param(owner_key.clone(), owner_ty);
    let rows: Vec<String> = targets
        .iter()
        .map(|t| format!("({}, {})", source_ph, q.push_param(t.clone(), target_ty)))
        .collect();
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES {} ON CONFLICT DO NOTHING",
        through_table(through),
        quoted(&through.source_column),
        quoted(&through.target_column),
        rows.join(", ")
    );
    q
}

pub fn delete_through(through: &ThroughConfig, owner_key: &Value, owner_ty: ScalarType, targets: &[Value], target_ty: ScalarType) -> QueryBuf {
    let mut q = QueryBuf::new();
    let source_ph = q.push_param(owner_key.clone(), owner_ty);
    let in_list = q.placeholders(targets, target_ty);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} AND {} IN ({})",
        through_table(through),
        quoted(&through.source_column),
        source_ph,
        quoted(&through.target_column),
        in_list
    );
    q
}

/// INSERT: declared attributes present in the payload; absent ones use the column default.
pub fn insert(entity: &EntityDescriptor, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for a in &entity.attributes {
        let Some(val) = body.get(&a.name) else { continue };
        placeholders.push(q.push_param(val.clone(), a.ty));
        cols.push(quoted(&a.name));
    }
    let returning = select_column_list(entity, None);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", entity_table(entity), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            entity_table(entity),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only declared attributes present in body. Falls back to a plain SELECT
/// when nothing is set.
pub fn update(entity: &EntityDescriptor, id: &Value, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (k, v) in body {
        if *k == entity.primary_key {
            continue;
        }
        let Some(a) = entity.attribute(k) else { continue };
        let ph = q.push_param(v.clone(), a.ty);
        sets.push(format!("{} = {}", quoted(k), ph));
    }
    if sets.is_empty() {
        return select_by_id(entity, id);
    }
    let id_ph = q.push_param(id.clone(), entity.pk_type);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        entity_table(entity),
        sets.join(", "),
        quoted(&entity.primary_key),
        id_ph,
        select_column_list(entity, None)
    );
    q
}

/// DELETE by id, returning the key of the deleted row.
pub fn delete(entity: &EntityDescriptor, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(id.clone(), entity.pk_type);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        entity_table(entity),
        quoted(&entity.primary_key),
        ph,
        quoted(&entity.primary_key)
    );
    q
}
