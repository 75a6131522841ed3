//! Convert serde_json::Value to types that sqlx can bind.

use crate::error::AppError;
use crate::schema::ScalarType;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value that can be bound to a PostgreSQL query. Placeholders carry an explicit cast, so
/// dates and timestamps travel as text and are converted server-side.
#[derive(Clone, Debug)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(uuid::Uuid),
    Json(Value),
}

impl PgBindValue {
    /// Convert `v` for a column of type `ty`. Values of the wrong shape are rejected here
    /// rather than failing inside the database.
    pub fn from_typed(v: &Value, ty: ScalarType) -> Result<Self, AppError> {
        if v.is_null() {
            return Ok(PgBindValue::Null);
        }
        let invalid = || AppError::Validation(format!("value {} is not a valid {}", v, ty.pg_type()));
        Ok(match ty {
            ScalarType::Int | ScalarType::BigInt => {
                PgBindValue::I64(ty.coerce(v).and_then(|c| c.as_i64()).ok_or_else(invalid)?)
            }
            ScalarType::Float => match v {
                Value::Number(n) => PgBindValue::F64(n.as_f64().ok_or_else(invalid)?),
                Value::String(s) => PgBindValue::F64(s.trim().parse().map_err(|_| invalid())?),
                _ => return Err(invalid()),
            },
            ScalarType::Bool => match ty.coerce(v) {
                Some(Value::Bool(b)) => PgBindValue::Bool(b),
                _ => return Err(invalid()),
            },
            ScalarType::Uuid => {
                let s = v.as_str().ok_or_else(invalid)?;
                PgBindValue::Uuid(uuid::Uuid::parse_str(s).map_err(|_| invalid())?)
            }
            ScalarType::Text | ScalarType::DateTime | ScalarType::Date => match v {
                Value::String(s) => PgBindValue::String(s.clone()),
                Value::Number(_) | Value::Bool(_) => PgBindValue::String(v.to_string()),
                _ => return Err(invalid()),
            },
            ScalarType::Json => PgBindValue::Json(v.clone()),
        })
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::String(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
            PgBindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => PgTypeInfo::with_name("TEXT"),
            PgBindValue::Bool(_) => PgTypeInfo::with_name("BOOL"),
            PgBindValue::I64(_) => PgTypeInfo::with_name("INT8"),
            PgBindValue::F64(_) => PgTypeInfo::with_name("FLOAT8"),
            PgBindValue::Uuid(_) => PgTypeInfo::with_name("UUID"),
            PgBindValue::Json(_) => PgTypeInfo::with_name("JSONB"),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}
