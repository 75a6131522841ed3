//! Relation grants: which relationships are exposed for management, with their filters and hooks.

use crate::config::{EntityDescriptor, FieldConfig, RelatedRef, RelationDescriptor};
use crate::error::{AppError, ConfigError};
use crate::schema::ScalarType;
use crate::store::{EntityStore, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnabledOps {
    pub list: bool,
    pub add: bool,
    pub remove: bool,
}

impl EnabledOps {
    pub fn all() -> Self {
        EnabledOps {
            list: true,
            add: true,
            remove: true,
        }
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let mut ops = EnabledOps::default();
        for name in names {
            match name.as_ref() {
                "list" => ops.list = true,
                "add" => ops.add = true,
                "remove" => ops.remove = true,
                other => return Err(ConfigError::Validation(format!("unknown grant operation: {}", other))),
            }
        }
        Ok(ops)
    }

    pub fn any_mutation(&self) -> bool {
        self.add || self.remove
    }
}

/// One declared list filter: query parameter name, value type and default.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterField {
    pub name: String,
    pub ty: ScalarType,
    pub default: Option<Value>,
}

/// Narrows a relation collection using decoded filter values.
pub trait FilterTransform: Send + Sync {
    fn apply(&self, members: Vec<Record>, filters: &Map<String, Value>) -> Vec<Record>;
}

impl<F> FilterTransform for F
where
    F: Fn(Vec<Record>, &Map<String, Value>) -> Vec<Record> + Send + Sync,
{
    fn apply(&self, members: Vec<Record>, filters: &Map<String, Value>) -> Vec<Record> {
        self(members, filters)
    }
}

/// Resolves a manage-request key to a related instance, replacing the primary-key lookup.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, store: &dyn EntityStore, key: &Value, owner: &Record) -> Result<Option<Record>, AppError>;
}

/// Optional per-relation hooks, registered explicitly instead of discovered by name.
#[derive(Clone, Default)]
pub struct RelationHooks {
    pub filter: Option<Arc<dyn FilterTransform>>,
    pub resolver: Option<Arc<dyn KeyResolver>>,
}

impl RelationHooks {
    pub fn with_filter(mut self, filter: impl FilterTransform + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_resolver(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }
}

impl fmt::Debug for RelationHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationHooks")
            .field("filter", &self.filter.is_some())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// Hook registrations keyed by (owner entity path, relation name).
#[derive(Clone, Debug, Default)]
pub struct GrantHooks {
    map: HashMap<(String, String), RelationHooks>,
}

impl GrantHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, owner_path: &str, relation: &str, hooks: RelationHooks) -> Self {
        self.map.insert((owner_path.to_string(), relation.to_string()), hooks);
        self
    }

    pub fn take(&mut self, owner_path: &str, relation: &str) -> RelationHooks {
        self.map
            .remove(&(owner_path.to_string(), relation.to_string()))
            .unwrap_or_default()
    }
}

/// A manageable relationship. Immutable once the registry is built.
#[derive(Clone, Debug)]
pub struct RelationGrant {
    pub owner: Arc<EntityDescriptor>,
    pub relation: RelationDescriptor,
    /// Related reference; the relation's own unless the grant narrows it.
    pub related: RelatedRef,
    pub ops: EnabledOps,
    pub filters: Vec<FilterField>,
    pub path_segment: String,
    /// Auth policy name; enforced by the host, carried here for it.
    pub auth: Option<String>,
    pub schema_override: Option<FieldConfig>,
    pub hooks: RelationHooks,
}

impl RelationGrant {
    /// Label used for schema override caching and logs: `owner#relation`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.owner.path, self.relation.name)
    }

    /// Coerce query-string values per the declared filters; absent filters take their default.
    /// Undeclared parameters are ignored.
    pub fn decode_filters(&self, query: &HashMap<String, String>) -> Result<Map<String, Value>, AppError> {
        let mut out = Map::new();
        for f in &self.filters {
            match query.get(&f.name) {
                Some(raw) => {
                    let v = f.ty.parse_str(raw).ok_or_else(|| {
                        AppError::Validation(format!("filter {}: '{}' is not a valid {}", f.name, raw, f.ty.pg_type()))
                    })?;
                    out.insert(f.name.clone(), v);
                }
                None => {
                    if let Some(d) = &f.default {
                        out.insert(f.name.clone(), d.clone());
                    }
                }
            }
        }
        for k in query.keys() {
            if !self.filters.iter().any(|f| f.name == *k) {
                tracing::warn!(grant = %self.label(), param = %k, "ignoring undeclared filter");
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(EnabledOps::from_names(&["list", "purge"]).is_err());
        let ops = EnabledOps::from_names(&["add"]).unwrap();
        assert!(ops.add && !ops.remove && !ops.list);
        assert!(ops.any_mutation());
    }

    #[test]
    fn closures_are_filter_transforms() {
        let keep_none = |_: Vec<Record>, _: &Map<String, Value>| -> Vec<Record> { Vec::new() };
        let hooks = RelationHooks::default().with_filter(keep_none);
        assert!(hooks.filter.is_some());
        assert_eq!(format!("{:?}", hooks), "RelationHooks { filter: true, resolver: false }");
    }
}
