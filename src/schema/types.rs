//! Compiled schema types: scalar types, field types, defaults and the per-context field list.

use crate::config::RelationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Schema context a field list is declared for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaContext {
    Read,
    Create,
    Update,
    Detail,
    Related,
}

impl SchemaContext {
    pub const ALL: [SchemaContext; 5] = [
        SchemaContext::Read,
        SchemaContext::Create,
        SchemaContext::Update,
        SchemaContext::Detail,
        SchemaContext::Related,
    ];

    /// Create and Update describe request payloads; the rest describe responses.
    pub fn is_input(self) -> bool {
        matches!(self, SchemaContext::Create | SchemaContext::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaContext::Read => "read",
            SchemaContext::Create => "create",
            SchemaContext::Update => "update",
            SchemaContext::Detail => "detail",
            SchemaContext::Related => "related",
        }
    }
}

impl fmt::Display for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemaContext::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown schema context: {}", s))
    }
}

/// Scalar value types for attributes, custom fields, filters and primary keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    BigInt,
    Float,
    Bool,
    Text,
    Uuid,
    DateTime,
    Date,
    Json,
}

impl FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "int" | "integer" | "int4" | "serial" => ScalarType::Int,
            "bigint" | "int8" | "bigserial" => ScalarType::BigInt,
            "float" | "double" | "float8" | "numeric" | "decimal" => ScalarType::Float,
            "bool" | "boolean" => ScalarType::Bool,
            "text" | "string" | "str" | "varchar" => ScalarType::Text,
            "uuid" => ScalarType::Uuid,
            "datetime" | "timestamp" | "timestamptz" => ScalarType::DateTime,
            "date" => ScalarType::Date,
            "json" | "jsonb" => ScalarType::Json,
            other => return Err(format!("unknown type: {}", other)),
        })
    }
}

impl ScalarType {
    /// Whether a JSON value is acceptable for this type. Null is handled by the caller.
    pub fn accepts(self, v: &Value) -> bool {
        match self {
            ScalarType::Int | ScalarType::BigInt => v.is_i64() || v.is_u64(),
            ScalarType::Float => v.is_number(),
            ScalarType::Bool => v.is_boolean(),
            ScalarType::Text | ScalarType::DateTime | ScalarType::Date => v.is_string(),
            ScalarType::Uuid => v.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false),
            ScalarType::Json => true,
        }
    }

    /// Normalize a key or input value to this type's canonical JSON form (`"5"` -> `5` for ints).
    pub fn coerce(self, v: &Value) -> Option<Value> {
        match (self, v) {
            (_, Value::Null) => None,
            (ScalarType::Int | ScalarType::BigInt, Value::Number(n)) => n.as_i64().map(Value::from),
            (ScalarType::Int | ScalarType::BigInt, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (ScalarType::Text, Value::String(_)) => Some(v.clone()),
            (ScalarType::Text, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ScalarType::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s)
                .ok()
                .map(|u| Value::String(u.to_string())),
            (ScalarType::Json, _) => Some(v.clone()),
            (_, _) if self.accepts(v) => Some(v.clone()),
            (_, Value::String(s)) => self.parse_str(s),
            _ => None,
        }
    }

    /// Parse a path or query-string value.
    pub fn parse_str(self, s: &str) -> Option<Value> {
        match self {
            ScalarType::Int | ScalarType::BigInt => s.trim().parse::<i64>().ok().map(Value::from),
            ScalarType::Float => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ScalarType::Bool => {
                if s.eq_ignore_ascii_case("true") || s == "1" {
                    Some(Value::Bool(true))
                } else if s.eq_ignore_ascii_case("false") || s == "0" {
                    Some(Value::Bool(false))
                } else {
                    None
                }
            }
            ScalarType::Uuid => uuid::Uuid::parse_str(s)
                .ok()
                .map(|u| Value::String(u.to_string())),
            ScalarType::Json => serde_json::from_str(s).ok(),
            ScalarType::Text | ScalarType::DateTime | ScalarType::Date => Some(Value::String(s.to_string())),
        }
    }

    /// PostgreSQL type used for parameter casts.
    pub fn pg_type(self) -> &'static str {
        match self {
            ScalarType::Int | ScalarType::BigInt => "int8",
            ScalarType::Float => "float8",
            ScalarType::Bool => "bool",
            ScalarType::Text => "text",
            ScalarType::Uuid => "uuid",
            ScalarType::DateTime => "timestamptz",
            ScalarType::Date => "date",
            ScalarType::Json => "jsonb",
        }
    }
}

/// Default of a compiled field. `Required` is distinct from a null default.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldDefault {
    Required,
    Null,
    Value(Value),
}

impl FieldDefault {
    /// Value used when the field is absent, if any.
    pub fn value(&self) -> Option<Value> {
        match self {
            FieldDefault::Required => None,
            FieldDefault::Null => Some(Value::Null),
            FieldDefault::Value(v) => Some(v.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum FieldType {
    Scalar(ScalarType),
    Object(Arc<CompiledSchema>),
    /// Tagged union; each member schema names its entity.
    Union(Vec<Arc<CompiledSchema>>),
    List(Box<FieldType>),
    Nullable(Box<FieldType>),
}

impl FieldType {
    pub fn list(item: FieldType) -> Self {
        FieldType::List(Box::new(item))
    }

    pub fn nullable(inner: FieldType) -> Self {
        match inner {
            FieldType::Nullable(_) => inner,
            other => FieldType::Nullable(Box::new(other)),
        }
    }

    /// Innermost type with list and nullable wrappers removed.
    pub fn item(&self) -> &FieldType {
        match self {
            FieldType::List(inner) | FieldType::Nullable(inner) => inner.item(),
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::Nullable(_))
    }

    /// Shallow check of an input value against this type.
    pub fn accepts(&self, v: &Value) -> bool {
        match self {
            FieldType::Nullable(inner) => v.is_null() || inner.accepts(v),
            FieldType::List(inner) => v
                .as_array()
                .map(|items| items.iter().all(|i| inner.accepts(i)))
                .unwrap_or(false),
            FieldType::Scalar(s) => s.accepts(v),
            FieldType::Object(_) | FieldType::Union(_) => v.is_object(),
        }
    }
}

/// Where a compiled field's value comes from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FieldSource {
    Attribute,
    Relation { kind: RelationKind },
    Custom,
    Optional,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub default: FieldDefault,
    #[serde(flatten)]
    pub source: FieldSource,
}

/// Ordered, typed field list for one (entity, context) pair.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledSchema {
    /// Entity path (`scope.Name`).
    pub entity: String,
    pub context: SchemaContext,
    pub fields: Vec<CompiledField>,
}

impl CompiledSchema {
    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_names_parse_case_insensitively() {
        assert_eq!("Integer".parse::<ScalarType>().unwrap(), ScalarType::Int);
        assert_eq!("timestamptz".parse::<ScalarType>().unwrap(), ScalarType::DateTime);
        assert_eq!("string".parse::<ScalarType>().unwrap(), ScalarType::Text);
        assert!("blob".parse::<ScalarType>().is_err());
    }

    #[test]
    fn int_keys_coerce_from_strings() {
        assert_eq!(ScalarType::Int.coerce(&json!("5")), Some(json!(5)));
        assert_eq!(ScalarType::Int.coerce(&json!(5)), Some(json!(5)));
        assert_eq!(ScalarType::Int.coerce(&json!("five")), None);
        assert_eq!(ScalarType::Text.coerce(&json!(12)), Some(json!("12")));
        assert_eq!(ScalarType::Uuid.coerce(&json!("not-a-uuid")), None);
    }

    #[test]
    fn nullable_list_accepts_null_and_typed_items() {
        let ty = FieldType::nullable(FieldType::list(FieldType::Scalar(ScalarType::Int)));
        assert!(ty.accepts(&json!(null)));
        assert!(ty.accepts(&json!([1, 2])));
        assert!(!ty.accepts(&json!([1, "x"])));
        assert_eq!(ty.item(), &FieldType::Scalar(ScalarType::Int));
    }

    #[test]
    fn context_round_trips_through_str() {
        for ctx in SchemaContext::ALL {
            assert_eq!(ctx.as_str().parse::<SchemaContext>().unwrap(), ctx);
        }
    }
}
