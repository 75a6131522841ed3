//! Declaration validation: identifiers, keys, per-context field categories and grants.
//! Relation references are not checked here; they resolve lazily on first compilation.

use crate::case::default_path_segment;
use crate::config::{EntityConfig, FieldConfig, FullConfig, RelationGrantConfig};
use crate::error::ConfigError;
use crate::schema::{ScalarType, SchemaContext};
use crate::service::EnabledOps;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

const IDENTIFIER: &str = "^[A-Za-z_][A-Za-z0-9_]*$";

fn check_identifier(re: &Regex, kind: &str, value: &str) -> Result<(), ConfigError> {
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("invalid {} name: '{}'", kind, value)))
    }
}

/// Effective path segment of an entity: declared, else the pluralized snake-case name.
pub fn entity_path_segment(entity: &EntityConfig) -> String {
    entity
        .path_segment
        .clone()
        .unwrap_or_else(|| default_path_segment(&entity.name))
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let ident = Regex::new(IDENTIFIER).map_err(|e| ConfigError::Validation(e.to_string()))?;

    let mut paths = HashSet::new();
    let mut segments = HashSet::new();
    for e in &config.entities {
        check_identifier(&ident, "entity", &e.name)?;
        check_identifier(&ident, "scope", &e.scope)?;
        let segment = entity_path_segment(e);
        check_identifier(&ident, "path segment", &segment)?;

        let path = format!("{}.{}", e.scope, e.name);
        if !paths.insert(path.clone()) {
            return Err(ConfigError::Validation(format!("entity {} declared more than once", path)));
        }
        if !segments.insert(segment.clone()) {
            return Err(ConfigError::DuplicatePathSegment(segment));
        }
        validate_entity(&ident, &path, e)?;
    }

    let mut grant_segments = HashSet::new();
    for g in &config.grants {
        let (owner_path, segment) = validate_grant(&ident, config, g)?;
        if !grant_segments.insert((owner_path.clone(), segment.clone())) {
            return Err(ConfigError::DuplicatePathSegment(format!("{}/{}", owner_path, segment)));
        }
    }
    Ok(())
}

fn validate_entity(ident: &Regex, path: &str, e: &EntityConfig) -> Result<(), ConfigError> {
    let mut attributes = HashSet::new();
    for a in &e.attributes {
        check_identifier(ident, "attribute", &a.name)?;
        a.type_.parse::<ScalarType>().map_err(|detail| ConfigError::Validation(format!("{}.{}: {}", path, a.name, detail)))?;
        if !attributes.insert(a.name.as_str()) {
            return Err(ConfigError::Validation(format!("attribute {}.{} declared more than once", path, a.name)));
        }
    }
    if !attributes.contains(e.primary_key.as_str()) {
        return Err(ConfigError::InvalidPrimaryKey {
            entity: path.to_string(),
            attribute: e.primary_key.clone(),
        });
    }
    for (name, rel) in &e.relations {
        check_identifier(ident, "relation", name)?;
        if attributes.contains(name.as_str()) {
            return Err(ConfigError::Validation(format!("relation {}.{} shadows an attribute", path, name)));
        }
        if rel.kind == crate::config::RelationKind::ManyToMany && rel.through.is_none() && e.table.is_some() {
            tracing::warn!(entity = %path, relation = %name, "many-to-many relation without through table");
        }
    }

    let blocks = [
        (SchemaContext::Read, &e.schemas.read),
        (SchemaContext::Create, &e.schemas.create),
        (SchemaContext::Update, &e.schemas.update),
        (SchemaContext::Detail, &e.schemas.detail),
        (SchemaContext::Related, &e.schemas.related),
    ];
    for (context, block) in blocks {
        if let Some(config) = block {
            check_categories(path, context, config)?;
        }
    }
    Ok(())
}

/// A name may appear in at most one of fields, customs, optionals and excludes.
/// Malformed entries are left for the classifier to report.
fn check_categories(entity: &str, context: SchemaContext, config: &FieldConfig) -> Result<(), ConfigError> {
    fn tuple_name(v: &Value) -> Option<&str> {
        v.as_array()?.first()?.as_str()
    }

    let mut category_of: HashMap<&str, &'static str> = HashMap::new();
    let mut entries: Vec<(&str, &'static str)> = Vec::new();
    for v in &config.fields {
        match v {
            Value::String(s) => entries.push((s.as_str(), "fields")),
            other => entries.extend(tuple_name(other).map(|n| (n, "customs"))),
        }
    }
    entries.extend(config.customs.iter().filter_map(tuple_name).map(|n| (n, "customs")));
    entries.extend(config.optionals.iter().filter_map(tuple_name).map(|n| (n, "optionals")));
    entries.extend(config.excludes.iter().map(|n| (n.as_str(), "excludes")));

    for (name, category) in entries {
        match category_of.get(name) {
            Some(existing) if *existing != category => {
                return Err(ConfigError::DuplicateField {
                    entity: entity.to_string(),
                    context: context.to_string(),
                    field: name.to_string(),
                });
            }
            Some(_) => {}
            None => {
                category_of.insert(name, category);
            }
        }
    }
    Ok(())
}

/// Returns the owner path and effective grant path segment.
fn validate_grant(ident: &Regex, config: &FullConfig, g: &RelationGrantConfig) -> Result<(String, String), ConfigError> {
    let owner = find_entity(config, &g.owner).ok_or_else(|| ConfigError::MissingReference {
        kind: "entity",
        id: g.owner.clone(),
    })?;
    let owner_path = format!("{}.{}", owner.scope, owner.name);
    if !owner.relations.contains_key(&g.relation) {
        return Err(ConfigError::MissingReference {
            kind: "relation",
            id: format!("{}.{}", owner_path, g.relation),
        });
    }
    EnabledOps::from_names(&g.operations)?;
    for (name, filter) in &g.filters {
        check_identifier(ident, "filter", name)?;
        filter
            .type_
            .parse::<ScalarType>()
            .map_err(|detail| ConfigError::Validation(format!("filter {}: {}", name, detail)))?;
    }
    let segment = g.path_segment.clone().unwrap_or_else(|| g.relation.clone());
    check_identifier(ident, "grant path segment", &segment)?;
    Ok((owner_path, segment))
}

/// Entity by `scope.Name`, or by bare name when that name is unique.
pub(crate) fn find_entity<'c>(config: &'c FullConfig, name_or_path: &str) -> Option<&'c EntityConfig> {
    if let Some((scope, name)) = name_or_path.split_once('.') {
        return config.entities.iter().find(|e| e.scope == scope && e.name == name);
    }
    let mut matches = config.entities.iter().filter(|e| e.name == name_or_path);
    match (matches.next(), matches.next()) {
        (Some(e), None) => Some(e),
        _ => None,
    }
}
