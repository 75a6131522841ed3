//! Relation resolution: turns a relation descriptor into a typed field for one context.

use crate::config::{EntityDescriptor, RelationDescriptor, RelationKind};
use crate::error::ConfigError;
use crate::schema::compiler::Compilation;
use crate::schema::{FieldDefault, FieldType, ScalarType, SchemaContext};
use std::sync::Arc;

/// Typed relation field ready to be placed in a parent schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRelation {
    pub ty: FieldType,
    pub default: FieldDefault,
}

/// Resolve `relation` (declared on `owner`) for `context`.
///
/// Returns `None` when no related member has a serializable schema; the caller drops the field.
/// Primitive-key relations, and every relation in input contexts, never compile nested schemas.
pub(crate) fn resolve(
    comp: &mut Compilation<'_>,
    owner: &EntityDescriptor,
    relation: &RelationDescriptor,
    context: SchemaContext,
) -> Result<Option<ResolvedRelation>, ConfigError> {
    let targets = comp.registry.resolve_ref(owner, &relation.related)?;

    let item = if relation.as_primitive_key || context.is_input() {
        FieldType::Scalar(key_type(&targets))
    } else {
        let label = format!("{}#{}", owner.path, relation.name);
        let mut schemas = Vec::with_capacity(targets.len());
        for target in &targets {
            let schema = match &relation.schema_override {
                Some(config) => comp.override_schema(target, &label, config)?,
                None => comp.schema(target, SchemaContext::Related)?,
            };
            match schema {
                Some(s) => schemas.push(s),
                None => tracing::debug!(
                    relation = %label,
                    related = %target.path,
                    "related entity has no serializable fields, skipping"
                ),
            }
        }
        match schemas.len() {
            0 => return Ok(None),
            1 => FieldType::Object(schemas.remove(0)),
            _ => FieldType::Union(schemas),
        }
    };

    let (ty, default) = with_cardinality(relation.kind, item, context);
    Ok(Some(ResolvedRelation { ty, default }))
}

/// Wrap an item type per relation kind: lists for to-many kinds, nullable single values otherwise.
pub fn with_cardinality(kind: RelationKind, item: FieldType, context: SchemaContext) -> (FieldType, FieldDefault) {
    if kind.is_many() {
        let default = match context {
            SchemaContext::Create => FieldDefault::Value(serde_json::json!([])),
            SchemaContext::Update => FieldDefault::Null,
            _ => FieldDefault::Required,
        };
        (FieldType::list(item), default)
    } else {
        let default = if context.is_input() {
            FieldDefault::Null
        } else {
            FieldDefault::Required
        };
        (FieldType::nullable(item), default)
    }
}

/// Key type shared by all targets; mixed union keys fall back to JSON.
pub(crate) fn key_type(targets: &[Arc<EntityDescriptor>]) -> ScalarType {
    let mut types = targets.iter().map(|t| t.pk_type);
    match types.next() {
        Some(first) if types.all(|t| t == first) => first,
        _ => ScalarType::Json,
    }
}
