//! Schema compiler: combines field classification and relation resolution per context.
//! Results are memoized per (entity, context) for the lifetime of the compiler.

use crate::config::{EntityDescriptor, FieldConfig, Registry};
use crate::error::ConfigError;
use crate::schema::field::{classify, ClassifiedFields, FieldSpec};
use crate::schema::relation;
use crate::schema::{CompiledField, CompiledSchema, FieldDefault, FieldSource, FieldType, SchemaContext};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a Detail schema inherits from Read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetailFallback {
    /// Each empty Detail category (fields, customs, optionals, excludes) takes Read's.
    #[default]
    PerCategory,
    /// Read is used only when Detail declares nothing at all.
    WholeSchema,
}

impl FromStr for DetailFallback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_category" => Ok(DetailFallback::PerCategory),
            "whole_schema" => Ok(DetailFallback::WholeSchema),
            _ => Err(ConfigError::Validation(format!(
                "invalid detail fallback: {} (expected per_category or whole_schema)",
                s
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CompilerOptions {
    pub detail_fallback: DetailFallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SchemaKey {
    Context { entity: String, context: SchemaContext },
    Override { entity: String, label: String },
}

type SchemaCache = HashMap<SchemaKey, Option<Arc<CompiledSchema>>>;

pub struct SchemaCompiler {
    registry: Arc<Registry>,
    options: CompilerOptions,
    cache: Mutex<SchemaCache>,
}

impl SchemaCompiler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_options(registry, CompilerOptions::default())
    }

    pub fn with_options(registry: Arc<Registry>, options: CompilerOptions) -> Self {
        SchemaCompiler {
            registry,
            options,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    /// Compile (or fetch from cache) the schema for `entity` in `context`.
    /// `Ok(None)` means the context has no fields; it is not an error.
    ///
    /// The cache lock is held for the whole compilation, so concurrent first requests for the
    /// same key compile once.
    pub fn compile(
        &self,
        entity: &EntityDescriptor,
        context: SchemaContext,
    ) -> Result<Option<Arc<CompiledSchema>>, ConfigError> {
        let mut cache = self.lock_cache();
        Compilation {
            registry: &self.registry,
            options: self.options,
            cache: &mut *cache,
        }
        .schema(entity, context)
    }

    /// Compile an explicit relation schema against `related`. `label` identifies the declaring
    /// relation or grant so distinct overrides cache separately.
    pub fn compile_override(
        &self,
        related: &EntityDescriptor,
        label: &str,
        config: &FieldConfig,
    ) -> Result<Option<Arc<CompiledSchema>>, ConfigError> {
        let mut cache = self.lock_cache();
        Compilation {
            registry: &self.registry,
            options: self.options,
            cache: &mut *cache,
        }
        .override_schema(related, label, config)
    }

    /// Drop every cached schema. Declarations are immutable at runtime; this exists for tests
    /// and tooling that rebuild descriptors.
    pub fn invalidate(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> MutexGuard<'_, SchemaCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One compilation pass with the cache lock held. Nested compilations re-enter through `schema`.
pub(crate) struct Compilation<'a> {
    pub(crate) registry: &'a Registry,
    options: CompilerOptions,
    cache: &'a mut SchemaCache,
}

impl Compilation<'_> {
    pub(crate) fn schema(
        &mut self,
        entity: &EntityDescriptor,
        context: SchemaContext,
    ) -> Result<Option<Arc<CompiledSchema>>, ConfigError> {
        let key = SchemaKey::Context {
            entity: entity.path.clone(),
            context,
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        tracing::debug!(entity = %entity.path, context = %context, "compiling schema");
        let classified = self.effective_fields(entity, context)?;
        let compiled = self.build(entity, context, &classified)?;
        self.cache.insert(key, compiled.clone());
        Ok(compiled)
    }

    pub(crate) fn override_schema(
        &mut self,
        related: &EntityDescriptor,
        label: &str,
        config: &FieldConfig,
    ) -> Result<Option<Arc<CompiledSchema>>, ConfigError> {
        let key = SchemaKey::Override {
            entity: related.path.clone(),
            label: label.to_string(),
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let classified = classify(&related.path, config)?;
        let compiled = self.build(related, SchemaContext::Related, &classified)?;
        self.cache.insert(key, compiled.clone());
        Ok(compiled)
    }

    fn effective_fields(
        &self,
        entity: &EntityDescriptor,
        context: SchemaContext,
    ) -> Result<ClassifiedFields, ConfigError> {
        let declared = |ctx: SchemaContext| -> Result<ClassifiedFields, ConfigError> {
            match entity.field_config(ctx) {
                Some(config) => classify(&entity.path, config),
                None => Ok(ClassifiedFields::default()),
            }
        };
        match context {
            SchemaContext::Detail => {
                let read = declared(SchemaContext::Read)?;
                let detail = declared(SchemaContext::Detail)?;
                Ok(match self.options.detail_fallback {
                    DetailFallback::PerCategory => ClassifiedFields::merge_per_category(&detail, &read),
                    DetailFallback::WholeSchema if detail.is_empty() => read,
                    DetailFallback::WholeSchema => detail,
                })
            }
            SchemaContext::Related if entity.field_config(SchemaContext::Related).is_none() => {
                declared(SchemaContext::Read)
            }
            other => declared(other),
        }
    }

    fn build(
        &mut self,
        entity: &EntityDescriptor,
        context: SchemaContext,
        classified: &ClassifiedFields,
    ) -> Result<Option<Arc<CompiledSchema>>, ConfigError> {
        let excluded: HashSet<&str> = classified.excludes().into_iter().collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut fields = Vec::new();

        for spec in classified.specs() {
            let name = spec.name();
            if excluded.contains(name) || seen.contains(name) {
                continue;
            }
            let field = match spec {
                FieldSpec::Plain(name) => self.plain_field(entity, context, name)?,
                FieldSpec::Custom { name, ty, default } => Some(CompiledField {
                    name: name.clone(),
                    ty: FieldType::Scalar(*ty),
                    default: default.clone(),
                    source: FieldSource::Custom,
                }),
                FieldSpec::Optional { name, ty } => Some(CompiledField {
                    name: name.clone(),
                    ty: FieldType::nullable(FieldType::Scalar(*ty)),
                    default: FieldDefault::Null,
                    source: FieldSource::Optional,
                }),
                FieldSpec::Excluded(_) => None,
            };
            if let Some(field) = field {
                seen.insert(field.name.clone());
                fields.push(field);
            }
        }

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(CompiledSchema {
            entity: entity.path.clone(),
            context,
            fields,
        })))
    }

    fn plain_field(
        &mut self,
        entity: &EntityDescriptor,
        context: SchemaContext,
        name: &str,
    ) -> Result<Option<CompiledField>, ConfigError> {
        if let Some(rel) = entity.relation(name) {
            // Related schemas stay flat: only key projections, never nested objects.
            if context == SchemaContext::Related && !rel.as_primitive_key {
                tracing::debug!(entity = %entity.path, relation = %name, "nested relation omitted from related schema");
                return Ok(None);
            }
            let resolved = relation::resolve(self, entity, rel, context)?;
            return Ok(resolved.map(|r| CompiledField {
                name: name.to_string(),
                ty: r.ty,
                default: r.default,
                source: FieldSource::Relation { kind: rel.kind },
            }));
        }

        let attr = entity.attribute(name).ok_or_else(|| ConfigError::UnknownField {
            entity: entity.path.clone(),
            context: context.to_string(),
            field: name.to_string(),
        })?;
        let scalar = FieldType::Scalar(attr.ty);
        let ty = if attr.nullable { FieldType::nullable(scalar) } else { scalar };
        let default = match context {
            SchemaContext::Create if attr.nullable || attr.has_default => FieldDefault::Null,
            SchemaContext::Update => FieldDefault::Null,
            _ => FieldDefault::Required,
        };
        Ok(Some(CompiledField {
            name: name.to_string(),
            ty,
            default,
            source: FieldSource::Attribute,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::schema::{Projector, ScalarType};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn registry(entities: Value) -> Arc<Registry> {
        let config: FullConfig = serde_json::from_value(json!({ "entities": entities })).unwrap();
        Arc::new(resolve(&config).unwrap())
    }

    fn author(schemas: Value, relations: Value) -> Value {
        json!({
            "name": "Author",
            "scope": "library",
            "primary_key": "id",
            "attributes": [
                { "name": "id", "type": "int" },
                { "name": "name", "type": "text" },
                { "name": "bio", "type": "text", "nullable": true }
            ],
            "schemas": schemas,
            "relations": relations
        })
    }

    fn book(schemas: Value) -> Value {
        json!({
            "name": "Book",
            "scope": "library",
            "primary_key": "id",
            "attributes": [{ "name": "id", "type": "int" }, { "name": "title", "type": "text" }],
            "schemas": schemas
        })
    }

    fn compile(registry: &Arc<Registry>, path: &str, context: SchemaContext) -> Option<Arc<CompiledSchema>> {
        SchemaCompiler::new(registry.clone())
            .compile(registry.entity_by_path(path).unwrap(), context)
            .unwrap()
    }

    #[test]
    fn compilation_is_cached_and_stable() {
        let registry = registry(json!([author(json!({"read": {"fields": ["id", "name"]}}), json!({}))]));
        let compiler = SchemaCompiler::new(registry.clone());
        let entity = registry.entity_by_path("library.Author").unwrap();
        let first = compiler.compile(entity, SchemaContext::Read).unwrap().unwrap();
        let second = compiler.compile(entity, SchemaContext::Read).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.names(), vec!["id", "name"]);

        compiler.invalidate();
        let third = compiler.compile(entity, SchemaContext::Read).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn concurrent_first_compilations_share_one_result() {
        let registry = registry(json!([author(json!({"read": {"fields": ["id", "name"]}}), json!({}))]));
        let compiler = Arc::new(SchemaCompiler::new(registry.clone()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let compiler = compiler.clone();
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let entity = registry.entity_by_path("library.Author").unwrap();
                    compiler.compile(entity, SchemaContext::Read).unwrap().unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn detail_without_declaration_equals_read() {
        let registry = registry(json!([author(json!({"read": {"fields": ["id", "name"]}}), json!({}))]));
        for fallback in [DetailFallback::PerCategory, DetailFallback::WholeSchema] {
            let compiler = SchemaCompiler::with_options(registry.clone(), CompilerOptions { detail_fallback: fallback });
            let entity = registry.entity_by_path("library.Author").unwrap();
            let read = compiler.compile(entity, SchemaContext::Read).unwrap().unwrap();
            let detail = compiler.compile(entity, SchemaContext::Detail).unwrap().unwrap();
            assert_eq!(detail.fields, read.fields, "{:?}", fallback);
            assert_eq!(detail.context, SchemaContext::Detail);
        }
    }

    #[test]
    fn partial_detail_inherits_empty_categories_only_per_category() {
        let registry = registry(json!([author(
            json!({
                "read": { "fields": ["id", "name"], "customs": [["score", "int", 0]] },
                "detail": { "fields": ["id", "bio"] }
            }),
            json!({})
        )]));
        let entity = registry.entity_by_path("library.Author").unwrap();

        let per_category = SchemaCompiler::new(registry.clone());
        let detail = per_category.compile(entity, SchemaContext::Detail).unwrap().unwrap();
        assert_eq!(detail.names(), vec!["id", "bio", "score"]);

        let whole = SchemaCompiler::with_options(
            registry.clone(),
            CompilerOptions {
                detail_fallback: DetailFallback::WholeSchema,
            },
        );
        let detail = whole.compile(entity, SchemaContext::Detail).unwrap().unwrap();
        assert_eq!(detail.names(), vec!["id", "bio"]);
    }

    #[test]
    fn books_are_dropped_when_book_has_no_readable_fields() {
        let relations = json!({ "books": { "kind": "reverse_to_many", "related": "Book" } });
        let schemas = json!({ "read": { "fields": ["id", "name", "books"] } });

        let without = registry(json!([author(schemas.clone(), relations.clone()), book(json!({}))]));
        let schema = compile(&without, "library.Author", SchemaContext::Read).unwrap();
        assert_eq!(schema.names(), vec!["id", "name"]);

        let with = registry(json!([author(schemas, relations), book(json!({"read": {"fields": ["id", "title"]}}))]));
        let schema = compile(&with, "library.Author", SchemaContext::Read).unwrap();
        let books = schema.field("books").unwrap();
        assert_eq!(books.default, FieldDefault::Required);
        match &books.ty {
            FieldType::List(item) => match item.as_ref() {
                FieldType::Object(s) => {
                    assert_eq!(s.entity, "library.Book");
                    assert_eq!(s.names(), vec!["id", "title"]);
                }
                other => panic!("expected object items, got {:?}", other),
            },
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn to_one_relation_without_related_fields_is_dropped() {
        let registry = registry(json!([
            author(json!({}), json!({})),
            {
                "name": "Book",
                "scope": "library",
                "primary_key": "id",
                "attributes": [{ "name": "id", "type": "int" }],
                "schemas": { "read": { "fields": ["id", "author"] } },
                "relations": { "author": { "kind": "forward_to_one", "related": "Author" } }
            }
        ]));
        let schema = compile(&registry, "library.Book", SchemaContext::Read).unwrap();
        assert_eq!(schema.names(), vec!["id"]);
    }

    fn review(related: Value, pamphlet_read: Value) -> Arc<Registry> {
        registry(json!([
            book(json!({"read": {"fields": ["id", "title"]}})),
            {
                "name": "Pamphlet",
                "scope": "library",
                "primary_key": "id",
                "attributes": [{ "name": "id", "type": "int" }, { "name": "pages", "type": "int" }],
                "schemas": { "read": pamphlet_read }
            },
            {
                "name": "Review",
                "scope": "library",
                "primary_key": "id",
                "attributes": [{ "name": "id", "type": "int" }],
                "schemas": { "read": { "fields": ["id", "subject"] } },
                "relations": { "subject": { "kind": "forward_to_one", "related": related } }
            }
        ]))
    }

    #[test]
    fn union_with_one_non_empty_member_collapses() {
        let registry = review(json!(["Book", "Pamphlet"]), json!({}));
        let schema = compile(&registry, "library.Review", SchemaContext::Read).unwrap();
        let subject = schema.field("subject").unwrap();
        assert!(subject.ty.is_nullable());
        assert!(matches!(subject.ty.item(), FieldType::Object(s) if s.entity == "library.Book"));
    }

    #[test]
    fn union_with_several_members_stays_a_union() {
        let registry = review(json!(["Book", "library.Pamphlet"]), json!({"fields": ["id", "pages"]}));
        let schema = compile(&registry, "library.Review", SchemaContext::Read).unwrap();
        match schema.field("subject").unwrap().ty.item() {
            FieldType::Union(members) => {
                let entities: Vec<&str> = members.iter().map(|m| m.entity.as_str()).collect();
                assert_eq!(entities, vec!["library.Book", "library.Pamphlet"]);
            }
            other => panic!("expected union, got {:?}", other),
        }
    }

    #[test]
    fn union_with_no_non_empty_member_drops_the_field() {
        let registry = registry(json!([
            book(json!({})),
            {
                "name": "Review",
                "scope": "library",
                "primary_key": "id",
                "attributes": [{ "name": "id", "type": "int" }],
                "schemas": { "read": { "fields": ["id", "subject"] } },
                "relations": { "subject": { "kind": "forward_to_one", "related": ["Book"] } }
            }
        ]));
        let schema = compile(&registry, "library.Review", SchemaContext::Read).unwrap();
        assert!(schema.field("subject").is_none());
    }

    #[test]
    fn unresolved_reference_surfaces_at_compilation() {
        let registry = registry(json!([author(
            json!({"read": {"fields": ["id", "books"]}}),
            json!({"books": {"kind": "reverse_to_many", "related": "Nope"}})
        )]));
        let compiler = SchemaCompiler::new(registry.clone());
        let err = compiler
            .compile(registry.entity_by_path("library.Author").unwrap(), SchemaContext::Read)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnresolvedReference {
                entity: "library.Author".into(),
                reference: "Nope".into()
            }
        );
    }

    #[test]
    fn unknown_and_malformed_fields_are_errors() {
        let registry = registry(json!([author(
            json!({
                "read": { "fields": ["id", "ghost"] },
                "detail": { "fields": [["a", "int", 0, "extra"]] }
            }),
            json!({})
        )]));
        let compiler = SchemaCompiler::new(registry.clone());
        let entity = registry.entity_by_path("library.Author").unwrap();
        assert!(matches!(
            compiler.compile(entity, SchemaContext::Read),
            Err(ConfigError::UnknownField { ref field, .. }) if field == "ghost"
        ));
        assert!(matches!(
            compiler.compile(entity, SchemaContext::Detail),
            Err(ConfigError::InvalidFieldSpec { .. })
        ));
    }

    #[test]
    fn undeclared_context_compiles_to_none() {
        let registry = registry(json!([author(json!({"read": {"fields": ["id"]}}), json!({}))]));
        assert!(compile(&registry, "library.Author", SchemaContext::Create).is_none());
        assert!(compile(&registry, "library.Author", SchemaContext::Update).is_none());
    }

    #[test]
    fn detail_excludes_trim_inherited_fields() {
        let registry = registry(json!([author(
            json!({
                "read": { "fields": ["id", "name", "bio"], "optionals": [["nick", "text"]] },
                "detail": { "excludes": ["bio"] }
            }),
            json!({})
        )]));
        let schema = compile(&registry, "library.Author", SchemaContext::Detail).unwrap();
        assert_eq!(schema.names(), vec!["id", "name", "nick"]);
        let nick = schema.field("nick").unwrap();
        assert_eq!(nick.default, FieldDefault::Null);
        assert!(nick.ty.is_nullable());
    }

    #[test]
    fn input_contexts_use_keys_and_defaults() {
        let registry = registry(json!([
            author(
                json!({
                    "create": { "fields": ["name", "bio", "books"] },
                    "update": { "fields": ["name", "books"] }
                }),
                json!({"books": {"kind": "reverse_to_many", "related": "Book"}})
            ),
            book(json!({"read": {"fields": ["id", "title"]}}))
        ]));
        let create = compile(&registry, "library.Author", SchemaContext::Create).unwrap();
        assert_eq!(create.field("name").unwrap().default, FieldDefault::Required);
        assert_eq!(create.field("bio").unwrap().default, FieldDefault::Null);
        let books = create.field("books").unwrap();
        assert_eq!(books.ty, FieldType::list(FieldType::Scalar(ScalarType::Int)));
        assert_eq!(books.default, FieldDefault::Value(json!([])));

        let update = compile(&registry, "library.Author", SchemaContext::Update).unwrap();
        assert!(update.fields.iter().all(|f| f.default == FieldDefault::Null));
    }

    #[test]
    fn relation_schema_override_wins() {
        let registry = registry(json!([
            author(
                json!({"read": {"fields": ["id", "books"]}}),
                json!({"books": {"kind": "reverse_to_many", "related": "Book", "schema": {"fields": ["title"]}}})
            ),
            book(json!({}))
        ]));
        let schema = compile(&registry, "library.Author", SchemaContext::Read).unwrap();
        match schema.field("books").unwrap().ty.item() {
            FieldType::Object(s) => assert_eq!(s.names(), vec!["title"]),
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn related_schemas_stay_flat_across_cycles() {
        let registry = registry(json!([
            author(
                json!({"read": {"fields": ["id", "books"]}}),
                json!({"books": {"kind": "reverse_to_many", "related": "Book"}})
            ),
            {
                "name": "Book",
                "scope": "library",
                "primary_key": "id",
                "attributes": [{ "name": "id", "type": "int" }],
                "schemas": { "read": { "fields": ["id", "author", "co_author"] } },
                "relations": {
                    "author": { "kind": "forward_to_one", "related": "Author" },
                    "co_author": { "kind": "forward_to_one", "related": "Author", "as_primitive_key": true }
                }
            }
        ]));
        let schema = compile(&registry, "library.Author", SchemaContext::Read).unwrap();
        match schema.field("books").unwrap().ty.item() {
            FieldType::Object(s) => assert_eq!(s.names(), vec!["id", "co_author"]),
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn resolved_relation_carries_type_and_default() {
        let registry = registry(json!([
            author(json!({}), json!({"books": {"kind": "reverse_to_many", "related": "Book", "as_primitive_key": true}})),
            book(json!({}))
        ]));
        let entity = registry.entity_by_path("library.Author").unwrap();
        let mut cache = SchemaCache::new();
        let mut comp = Compilation {
            registry: &registry,
            options: CompilerOptions::default(),
            cache: &mut cache,
        };
        let resolved = relation::resolve(&mut comp, entity, entity.relation("books").unwrap(), SchemaContext::Create)
            .unwrap()
            .unwrap();
        assert_eq!(
            resolved,
            relation::ResolvedRelation {
                ty: FieldType::list(FieldType::Scalar(ScalarType::Int)),
                default: FieldDefault::Value(json!([])),
            }
        );
    }

    #[tokio::test]
    async fn primitive_key_relations_serialize_in_collection_order() {
        let registry = registry(json!([
            author(
                json!({"read": {"fields": ["id", "books"]}}),
                json!({"books": {"kind": "reverse_to_many", "related": "Book", "as_primitive_key": true}})
            ),
            book(json!({}))
        ]));
        let schema = compile(&registry, "library.Author", SchemaContext::Read).unwrap();
        assert_eq!(
            schema.field("books").unwrap().ty,
            FieldType::list(FieldType::Scalar(ScalarType::Int))
        );

        let store = MemoryStore::new(registry.clone());
        store.put("library.Author", json!({"id": 1, "name": "Le Guin", "bio": null})).unwrap();
        for id in [7, 9, 2] {
            store.put("library.Book", json!({"id": id, "title": "t"})).unwrap();
            store.link("library.Author", json!(1), "books", "library.Book", json!(id)).unwrap();
        }
        let out = Projector::new(&registry, &store)
            .project(&schema, &json!({"id": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"id": 1, "books": [7, 9, 2]}));
    }
}
