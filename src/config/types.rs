//! Raw declaration types matching the JSON entity and grant files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field lists for one schema context.
///
/// Entries are kept as raw JSON so malformed specs surface as `InvalidFieldSpec` when the
/// context is first compiled rather than as a parse failure of the whole file.
/// `fields` holds attribute/relation names and inline `[name, type, default?]` tuples;
/// `customs` holds `[name, type, default?]`; `optionals` holds `[name, type]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(default)]
    pub fields: Vec<Value>,
    #[serde(default)]
    pub customs: Vec<Value>,
    #[serde(default)]
    pub optionals: Vec<Value>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl FieldConfig {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.customs.is_empty()
            && self.optionals.is_empty()
            && self.excludes.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaBlocks {
    #[serde(default)]
    pub read: Option<FieldConfig>,
    #[serde(default)]
    pub create: Option<FieldConfig>,
    #[serde(default)]
    pub update: Option<FieldConfig>,
    #[serde(default)]
    pub detail: Option<FieldConfig>,
    #[serde(default)]
    pub related: Option<FieldConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub nullable: bool,
    /// Whether the store fills the value when it is omitted (e.g. serial keys, NOW()).
    #[serde(default)]
    pub has_default: bool,
}

/// Kind of a declared relation. Determines cardinality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    ForwardToOne,
    ForwardOneToOne,
    ReverseToMany,
    ReverseOneToOne,
    ManyToMany,
}

impl RelationKind {
    /// ReverseToMany and ManyToMany yield ordered lists; the rest yield a single nullable value.
    pub fn is_many(self) -> bool {
        matches!(self, RelationKind::ReverseToMany | RelationKind::ManyToMany)
    }

    pub fn is_forward(self) -> bool {
        matches!(self, RelationKind::ForwardToOne | RelationKind::ForwardOneToOne)
    }
}

/// `"Book"`, `"library.Book"` or `["Book", "Magazine"]` for a union.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedRefConfig {
    One(String),
    Union(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThroughConfig {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub source_column: String,
    pub target_column: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub kind: RelationKind,
    pub related: RelatedRefConfig,
    #[serde(default)]
    pub as_primitive_key: bool,
    /// FK column: on the owner table for forward kinds, on the related table for reverse kinds.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
    /// Name of the matching relation on the related entity, kept in sync by stores that support it.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Explicit relation schema; takes precedence over the related entity's own related schema.
    #[serde(default)]
    pub schema: Option<FieldConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub path_segment: Option<String>,
    pub primary_key: String,
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub schemas: SchemaBlocks,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationConfig>,
    #[serde(default)]
    pub table: Option<TableMapping>,
}

pub fn default_scope() -> String {
    "default".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationGrantConfig {
    /// Owner entity path (`scope.Name`) or bare name.
    pub owner: String,
    pub relation: String,
    /// Overrides the relation's own related reference.
    #[serde(default)]
    pub related: Option<RelatedRefConfig>,
    #[serde(default = "default_grant_operations")]
    pub operations: Vec<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterConfig>,
    #[serde(default)]
    pub path_segment: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub schema: Option<FieldConfig>,
}

fn default_grant_operations() -> Vec<String> {
    vec!["list".into(), "add".into(), "remove".into()]
}

/// All declarations in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub grants: Vec<RelationGrantConfig>,
}
