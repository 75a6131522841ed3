//! Build the runtime registry from declarations, in memory or from a directory of JSON files.

use crate::case::to_snake_case;
use crate::config::resolved::{AttributeInfo, EntityDescriptor, RelatedRef, Registry, RelationDescriptor, TableInfo};
use crate::config::types::*;
use crate::config::validator::{entity_path_segment, find_entity};
use crate::config::validate;
use crate::error::ConfigError;
use crate::schema::{ScalarType, SchemaContext};
use crate::service::{EnabledOps, FilterField, GrantHooks, RelationGrant};
use std::collections::HashMap;
use std::path::Path;

/// Build the registry from declarations (validates first).
pub fn resolve(config: &FullConfig) -> Result<Registry, ConfigError> {
    resolve_with_hooks(config, GrantHooks::new())
}

/// Like [`resolve`], attaching registered filter/resolver hooks to their grants.
pub fn resolve_with_hooks(config: &FullConfig, mut hooks: GrantHooks) -> Result<Registry, ConfigError> {
    validate(config)?;

    let entities = config
        .entities
        .iter()
        .map(resolve_entity)
        .collect::<Result<Vec<_>, _>>()?;
    let mut registry = Registry::new(entities);

    for g in &config.grants {
        let owner_config = find_entity(config, &g.owner).ok_or_else(|| ConfigError::MissingReference {
            kind: "entity",
            id: g.owner.clone(),
        })?;
        let owner_path = format!("{}.{}", owner_config.scope, owner_config.name);
        let owner = registry
            .entity_by_path(&owner_path)
            .cloned()
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: owner_path.clone(),
            })?;
        let relation = owner
            .relation(&g.relation)
            .cloned()
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "relation",
                id: format!("{}.{}", owner_path, g.relation),
            })?;
        let related = g.related.as_ref().map(related_ref).unwrap_or_else(|| relation.related.clone());
        let filters = g
            .filters
            .iter()
            .map(|(name, f)| {
                Ok(FilterField {
                    name: name.clone(),
                    ty: parse_type(&owner_path, &f.type_)?,
                    default: f.default.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let grant = RelationGrant {
            ops: EnabledOps::from_names(&g.operations)?,
            related,
            filters,
            path_segment: g.path_segment.clone().unwrap_or_else(|| g.relation.clone()),
            auth: g.auth.clone(),
            schema_override: g.schema.clone(),
            hooks: hooks.take(&owner_path, &g.relation),
            relation,
            owner,
        };
        registry.add_grant(grant);
    }
    Ok(registry)
}

fn parse_type(entity: &str, name: &str) -> Result<ScalarType, ConfigError> {
    name.parse::<ScalarType>().map_err(|detail| ConfigError::Validation(format!("{}: {}", entity, detail)))
}

fn related_ref(r: &RelatedRefConfig) -> RelatedRef {
    match r {
        RelatedRefConfig::One(s) => RelatedRef::parse(s),
        RelatedRefConfig::Union(members) => RelatedRef::Union(members.iter().map(|m| RelatedRef::parse(m)).collect()),
    }
}

fn resolve_entity(e: &EntityConfig) -> Result<EntityDescriptor, ConfigError> {
    let path = format!("{}.{}", e.scope, e.name);
    let attributes = e
        .attributes
        .iter()
        .map(|a| {
            Ok(AttributeInfo {
                name: a.name.clone(),
                ty: parse_type(&path, &a.type_)?,
                nullable: a.nullable,
                has_default: a.has_default,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    let pk_type = attributes
        .iter()
        .find(|a| a.name == e.primary_key)
        .map(|a| a.ty)
        .ok_or_else(|| ConfigError::InvalidPrimaryKey {
            entity: path.clone(),
            attribute: e.primary_key.clone(),
        })?;

    let mut schemas = HashMap::new();
    let blocks = [
        (SchemaContext::Read, &e.schemas.read),
        (SchemaContext::Create, &e.schemas.create),
        (SchemaContext::Update, &e.schemas.update),
        (SchemaContext::Detail, &e.schemas.detail),
        (SchemaContext::Related, &e.schemas.related),
    ];
    for (context, block) in blocks {
        if let Some(config) = block {
            schemas.insert(context, config.clone());
        }
    }

    let relations = e
        .relations
        .iter()
        .map(|(name, r)| {
            (
                name.clone(),
                RelationDescriptor {
                    name: name.clone(),
                    kind: r.kind,
                    related: related_ref(&r.related),
                    as_primitive_key: r.as_primitive_key,
                    column: r.column.clone(),
                    through: r.through.clone(),
                    inverse: r.inverse.clone(),
                    schema_override: r.schema.clone(),
                },
            )
        })
        .collect();

    let table = match &e.table {
        Some(t) => TableInfo {
            schema: t.schema.clone().unwrap_or_else(|| "public".into()),
            name: t.name.clone(),
        },
        None => TableInfo {
            schema: "public".into(),
            name: to_snake_case(&e.name),
        },
    };

    Ok(EntityDescriptor {
        path_segment: entity_path_segment(e),
        name: e.name.clone(),
        scope: e.scope.clone(),
        primary_key: e.primary_key.clone(),
        pk_type,
        attributes,
        schemas,
        relations,
        table,
        path,
    })
}

/// Read `entities.json` and, when present, `grants.json` from `dir`.
pub async fn load_config_dir(dir: &Path) -> Result<FullConfig, ConfigError> {
    let read = |name: &'static str| {
        let file = dir.join(name);
        async move {
            match tokio::fs::read_to_string(&file).await {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ConfigError::Load(format!("{}: {}", file.display(), e))),
            }
        }
    };
    let entities_text = read("entities.json")
        .await?
        .ok_or_else(|| ConfigError::Load(format!("{}: entities.json not found", dir.display())))?;
    let mut config: FullConfig = match serde_json::from_str::<FullConfig>(&entities_text) {
        Ok(full) => full,
        Err(_) => FullConfig {
            entities: serde_json::from_str(&entities_text)
                .map_err(|e| ConfigError::Load(format!("entities.json: {}", e)))?,
            grants: Vec::new(),
        },
    };
    if let Some(text) = read("grants.json").await? {
        let grants: Vec<RelationGrantConfig> =
            serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("grants.json: {}", e)))?;
        config.grants.extend(grants);
    }
    Ok(config)
}

/// Load declarations from `dir` and build the registry.
pub async fn load_from_dir(dir: &Path, hooks: GrantHooks) -> Result<Registry, ConfigError> {
    let config = load_config_dir(dir).await?;
    tracing::info!(
        dir = %dir.display(),
        entities = config.entities.len(),
        grants = config.grants.len(),
        "loaded declarations"
    );
    resolve_with_hooks(&config, hooks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declarations() -> FullConfig {
        serde_json::from_value(json!({
            "entities": [
                {
                    "name": "BookReview",
                    "scope": "library",
                    "primary_key": "id",
                    "attributes": [{ "name": "id", "type": "uuid" }, { "name": "body", "type": "text" }],
                    "relations": { "book": { "kind": "forward_to_one", "related": ["Book", "shop.Book"] } }
                },
                {
                    "name": "Book",
                    "scope": "library",
                    "primary_key": "id",
                    "attributes": [{ "name": "id", "type": "int" }],
                    "table": { "name": "books_v2" }
                }
            ],
            "grants": [
                { "owner": "BookReview", "relation": "book", "operations": ["list"], "path_segment": "reviewed_book",
                  "filters": { "since": { "type": "date", "default": "2020-01-01" } } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn defaults_follow_entity_names() {
        let registry = resolve(&declarations()).unwrap();
        let review = registry.entity_by_path("library.BookReview").unwrap();
        assert_eq!(review.path_segment, "book_reviews");
        assert_eq!(review.table.name, "book_review");
        assert_eq!(review.table.schema, "public");
        assert_eq!(review.pk_type, ScalarType::Uuid);
        assert!(registry.entity_by_segment("books").is_some());
        assert_eq!(registry.entity_by_path("library.Book").unwrap().table.name, "books_v2");
    }

    #[test]
    fn union_references_parse_per_member() {
        let registry = resolve(&declarations()).unwrap();
        let review = registry.entity_by_path("library.BookReview").unwrap();
        assert_eq!(
            review.relation("book").unwrap().related,
            RelatedRef::Union(vec![RelatedRef::ByName("Book".into()), RelatedRef::ByPath("shop.Book".into())])
        );
    }

    #[test]
    fn grants_carry_ops_filters_and_segment() {
        let registry = resolve(&declarations()).unwrap();
        let grant = registry.grant("library.BookReview", "reviewed_book").unwrap();
        assert_eq!(grant.ops, EnabledOps { list: true, add: false, remove: false });
        assert_eq!(grant.filters[0].ty, ScalarType::Date);
        assert_eq!(grant.filters[0].default, Some(json!("2020-01-01")));
    }

    #[tokio::test]
    async fn loads_entities_and_grants_from_dir() {
        let dir = std::env::temp_dir().join(format!("architect-relations-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let config = declarations();
        tokio::fs::write(dir.join("entities.json"), serde_json::to_string(&config.entities).unwrap())
            .await
            .unwrap();
        tokio::fs::write(dir.join("grants.json"), serde_json::to_string(&config.grants).unwrap())
            .await
            .unwrap();

        let registry = load_from_dir(&dir, GrantHooks::new()).await.unwrap();
        assert_eq!(registry.entities().len(), 2);
        assert_eq!(registry.grants().count(), 1);

        let missing = load_from_dir(&dir.join("nope"), GrantHooks::new()).await.unwrap_err();
        assert!(matches!(missing, ConfigError::Load(_)));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
