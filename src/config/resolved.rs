//! Resolved entity model: declarations validated and flattened for runtime use.

use crate::config::{FieldConfig, RelationKind, ThroughConfig};
use crate::error::ConfigError;
use crate::schema::{SchemaContext, ScalarType};
use crate::service::RelationGrant;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Reference from a relation to its related entity. Resolved lazily on first use so
/// entities may reference each other regardless of declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelatedRef {
    /// Canonical entity path, already known to exist.
    Resolved(String),
    ByName(String),
    ByPath(String),
    Union(Vec<RelatedRef>),
}

impl RelatedRef {
    pub fn parse(s: &str) -> Self {
        if s.contains('.') {
            RelatedRef::ByPath(s.to_string())
        } else {
            RelatedRef::ByName(s.to_string())
        }
    }
}

impl fmt::Display for RelatedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelatedRef::Resolved(s) | RelatedRef::ByName(s) | RelatedRef::ByPath(s) => f.write_str(s),
            RelatedRef::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "[{}]", parts.join("|"))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttributeInfo {
    pub name: String,
    pub ty: ScalarType,
    pub nullable: bool,
    pub has_default: bool,
}

#[derive(Clone, Debug)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub related: RelatedRef,
    pub as_primitive_key: bool,
    pub column: Option<String>,
    pub through: Option<ThroughConfig>,
    pub inverse: Option<String>,
    pub schema_override: Option<FieldConfig>,
}

/// Physical table for stores that map entities to tables.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    /// `scope.Name`; unique within a registry.
    pub path: String,
    pub name: String,
    pub scope: String,
    pub path_segment: String,
    pub primary_key: String,
    pub pk_type: ScalarType,
    pub attributes: Vec<AttributeInfo>,
    pub schemas: HashMap<SchemaContext, FieldConfig>,
    pub relations: BTreeMap<String, RelationDescriptor>,
    pub table: TableInfo,
}

impl EntityDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(name)
    }

    pub fn field_config(&self, context: SchemaContext) -> Option<&FieldConfig> {
        self.schemas.get(&context)
    }

    /// Primary-key value of an instance, or null when absent.
    pub fn key_of(&self, instance: &Value) -> Value {
        instance.get(&self.primary_key).cloned().unwrap_or(Value::Null)
    }

    pub fn coerce_key(&self, key: &Value) -> Option<Value> {
        self.pk_type.coerce(key)
    }
}

/// Immutable set of entity descriptors and relation grants.
#[derive(Debug, Default)]
pub struct Registry {
    entities: Vec<Arc<EntityDescriptor>>,
    by_path: HashMap<String, Arc<EntityDescriptor>>,
    by_segment: HashMap<String, Arc<EntityDescriptor>>,
    /// Keyed by (owner path, grant path segment).
    grants: HashMap<(String, String), Arc<RelationGrant>>,
    resolved_refs: Mutex<HashMap<(String, String), Vec<Arc<EntityDescriptor>>>>,
}

impl Registry {
    pub fn new(entities: Vec<EntityDescriptor>) -> Self {
        let entities: Vec<Arc<EntityDescriptor>> = entities.into_iter().map(Arc::new).collect();
        let by_path = entities.iter().map(|e| (e.path.clone(), e.clone())).collect();
        let by_segment = entities.iter().map(|e| (e.path_segment.clone(), e.clone())).collect();
        Registry {
            entities,
            by_path,
            by_segment,
            grants: HashMap::new(),
            resolved_refs: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_grant(&mut self, grant: RelationGrant) {
        let key = (grant.owner.path.clone(), grant.path_segment.clone());
        self.grants.insert(key, Arc::new(grant));
    }

    pub fn entities(&self) -> &[Arc<EntityDescriptor>] {
        &self.entities
    }

    pub fn entity_by_path(&self, path: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_path.get(path)
    }

    pub fn entity_by_segment(&self, segment: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_segment.get(segment)
    }

    pub fn grant(&self, owner_path: &str, segment: &str) -> Option<&Arc<RelationGrant>> {
        self.grants.get(&(owner_path.to_string(), segment.to_string()))
    }

    pub fn grants(&self) -> impl Iterator<Item = &Arc<RelationGrant>> {
        self.grants.values()
    }

    /// Resolve a relation reference declared on `from`. Union references yield one entity per
    /// member, in declaration order. Successful resolutions are memoized per (scope, reference).
    pub fn resolve_ref(
        &self,
        from: &EntityDescriptor,
        reference: &RelatedRef,
    ) -> Result<Vec<Arc<EntityDescriptor>>, ConfigError> {
        let memo_key = (from.scope.clone(), reference.to_string());
        if let Some(hit) = self
            .resolved_refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&memo_key)
        {
            return Ok(hit.clone());
        }

        let mut out = Vec::new();
        self.resolve_into(from, reference, &mut out)?;
        self.resolved_refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(memo_key, out.clone());
        Ok(out)
    }

    fn resolve_into(
        &self,
        from: &EntityDescriptor,
        reference: &RelatedRef,
        out: &mut Vec<Arc<EntityDescriptor>>,
    ) -> Result<(), ConfigError> {
        let unresolved = || ConfigError::UnresolvedReference {
            entity: from.path.clone(),
            reference: reference.to_string(),
        };
        match reference {
            RelatedRef::Union(members) => {
                for m in members {
                    self.resolve_into(from, m, out)?;
                }
            }
            RelatedRef::Resolved(path) => {
                out.push(self.by_path.get(path).cloned().ok_or_else(unresolved)?);
            }
            RelatedRef::ByName(name) | RelatedRef::ByPath(name) => {
                // Same scope first, then absolute when the reference carries a separator.
                let scoped = format!("{}.{}", from.scope, name);
                let found = self.by_path.get(&scoped).or_else(|| {
                    if name.contains('.') {
                        self.by_path.get(name)
                    } else {
                        None
                    }
                });
                out.push(found.cloned().ok_or_else(unresolved)?);
            }
        }
        Ok(())
    }
}
