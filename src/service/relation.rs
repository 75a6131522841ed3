//! Relation-mutation engine: list, add and remove over a granted relation.
//!
//! A manage request moves through `Received -> Validated -> Executing -> Completed`. Per-key
//! problems are collected as messages in the `errors` bucket; only malformed requests and store
//! failures surface as `AppError`.

use crate::config::{EntityDescriptor, RelationDescriptor};
use crate::error::AppError;
use crate::schema::relation::key_type;
use crate::schema::{FieldType, Projector, SchemaCompiler, SchemaContext};
use crate::service::RelationGrant;
use crate::store::{key_repr, EntityStore, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ManageRequest {
    #[serde(default)]
    pub add: Vec<Value>,
    #[serde(default)]
    pub remove: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultBucket {
    pub count: usize,
    pub details: Vec<String>,
}

impl ResultBucket {
    fn from_details(details: Vec<String>) -> Self {
        ResultBucket {
            count: details.len(),
            details,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ManageResult {
    pub results: ResultBucket,
    pub errors: ResultBucket,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManageMode {
    Add,
    Remove,
}

impl ManageMode {
    fn past_tense(self) -> &'static str {
        match self {
            ManageMode::Add => "added",
            ManageMode::Remove => "removed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManageStage {
    Received,
    Validated,
    Executing,
    Completed,
}

impl fmt::Display for ManageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ManageStage::Received => "received",
            ManageStage::Validated => "validated",
            ManageStage::Executing => "executing",
            ManageStage::Completed => "completed",
        })
    }
}

/// Outcome of validating one batch. `errors` and `details` keep input key order;
/// `entities` holds the resolved instances queued for execution.
#[derive(Clone, Debug, Default)]
pub struct BatchValidation {
    pub errors: Vec<String>,
    pub details: Vec<String>,
    pub entities: Vec<Record>,
}

/// Apply add and remove batches concurrently. An empty batch issues no store call.
pub(crate) async fn apply_batches(
    store: &dyn EntityStore,
    owner: &EntityDescriptor,
    owner_key: &Value,
    relation: &RelationDescriptor,
    add: &[Record],
    remove: &[Record],
) -> Result<(), AppError> {
    let adding = async {
        if add.is_empty() {
            return Ok(());
        }
        store.add_related(owner, owner_key, relation, add).await
    };
    let removing = async {
        if remove.is_empty() {
            return Ok(());
        }
        store.remove_related(owner, owner_key, relation, remove).await
    };
    let (added, removed) = tokio::join!(adding, removing);
    added?;
    removed?;
    Ok(())
}

/// Primary-key lookup across the targets of a relation, in declaration order. Keys that do not
/// coerce to a target's key type skip that target.
pub(crate) async fn lookup_key(
    store: &dyn EntityStore,
    targets: Vec<Arc<EntityDescriptor>>,
    key: &Value,
) -> Result<Option<Record>, AppError> {
    for target in targets {
        let Some(coerced) = target.coerce_key(key) else { continue };
        if let Some(data) = store.get(&target, &coerced).await? {
            return Ok(Some(Record::new(target, data)));
        }
    }
    Ok(None)
}

pub struct RelationService<'a> {
    compiler: &'a SchemaCompiler,
    store: &'a dyn EntityStore,
}

impl<'a> RelationService<'a> {
    pub fn new(compiler: &'a SchemaCompiler, store: &'a dyn EntityStore) -> Self {
        RelationService { compiler, store }
    }

    /// Current members of the granted relation, filtered and projected.
    pub async fn list(
        &self,
        grant: &RelationGrant,
        owner_key: &Value,
        query: &HashMap<String, String>,
    ) -> Result<Vec<Value>, AppError> {
        if !grant.ops.list {
            return Err(AppError::BadRequest(format!("listing {} is not enabled", grant.label())));
        }
        let filters = grant.decode_filters(query)?;
        let item = self.member_type(grant)?;
        let owner = self.load_owner(grant, owner_key).await?;
        let mut members = self
            .store
            .related(&grant.owner, &owner.key(), &grant.relation)
            .await?;
        if let Some(hook) = &grant.hooks.filter {
            members = hook.apply(members, &filters);
        }
        Projector::new(self.compiler.registry(), self.store)
            .project_members(&item, &members)
            .await
    }

    pub async fn manage(
        &self,
        grant: &RelationGrant,
        owner_key: &Value,
        request: &ManageRequest,
    ) -> Result<ManageResult, AppError> {
        let label = grant.label();
        tracing::debug!(grant = %label, stage = %ManageStage::Received, add = request.add.len(), remove = request.remove.len(), "manage");
        check_request(grant, request)?;

        let owner = self.load_owner(grant, owner_key).await?;
        let membership: HashSet<String> = self
            .store
            .related(&grant.owner, &owner.key(), &grant.relation)
            .await?
            .iter()
            .map(Record::identity)
            .collect();

        let add = self.validate(grant, &owner, &request.add, ManageMode::Add, &membership).await?;
        let remove = self
            .validate(grant, &owner, &request.remove, ManageMode::Remove, &membership)
            .await?;
        tracing::debug!(
            grant = %label,
            stage = %ManageStage::Validated,
            queued_add = add.entities.len(),
            queued_remove = remove.entities.len(),
            "manage"
        );

        tracing::debug!(grant = %label, stage = %ManageStage::Executing, "manage");
        apply_batches(
            self.store,
            &grant.owner,
            &owner.key(),
            &grant.relation,
            &add.entities,
            &remove.entities,
        )
        .await?;

        let result = ManageResult {
            results: ResultBucket::from_details(add.details.into_iter().chain(remove.details).collect()),
            errors: ResultBucket::from_details(add.errors.into_iter().chain(remove.errors).collect()),
        };
        tracing::debug!(
            grant = %label,
            stage = %ManageStage::Completed,
            succeeded = result.results.count,
            failed = result.errors.count,
            "manage"
        );
        Ok(result)
    }

    /// Validate one batch against a membership snapshot, in key order.
    /// Keys already queued earlier in the same batch count as members (add) or non-members (remove).
    pub async fn validate(
        &self,
        grant: &RelationGrant,
        owner: &Record,
        keys: &[Value],
        mode: ManageMode,
        membership: &HashSet<String>,
    ) -> Result<BatchValidation, AppError> {
        let mut current = membership.clone();
        let mut out = BatchValidation::default();
        let owner_label = format!("{} {}", owner.entity.name, key_repr(&owner.key()));
        // A single-valued relation keeps one member, so only the first add in a batch can land.
        let single = !grant.relation.kind.is_many();

        for key in keys {
            let shown = key_repr(key);
            let Some(record) = self.resolve_key(grant, owner, key).await? else {
                out.errors.push(format!("{} with key {} not found.", self.target_label(grant)?, shown));
                continue;
            };
            let id = record.identity();
            let name = &record.entity.name;
            match mode {
                ManageMode::Add if current.contains(&id) => {
                    out.errors.push(format!("{} with key {} is in {}.", name, shown, owner_label));
                }
                ManageMode::Add if single && !out.entities.is_empty() => {
                    out.errors.push(format!(
                        "{} with key {} not added: {} takes a single {}.",
                        name, shown, owner_label, grant.relation.name
                    ));
                }
                ManageMode::Remove if !current.contains(&id) => {
                    out.errors.push(format!("{} with key {} is not in {}.", name, shown, owner_label));
                }
                _ => {
                    out.details
                        .push(format!("{} with key {} successfully {}.", name, shown, mode.past_tense()));
                    match mode {
                        ManageMode::Add => current.insert(id),
                        ManageMode::Remove => current.remove(&id),
                    };
                    out.entities.push(record);
                }
            }
        }
        Ok(out)
    }

    async fn load_owner(&self, grant: &RelationGrant, key: &Value) -> Result<Record, AppError> {
        let owner = &grant.owner;
        let not_found = || AppError::NotFound(format!("{} with key {} not found", owner.name, key_repr(key)));
        let key = owner.coerce_key(key).ok_or_else(not_found)?;
        let data = self.store.get(owner, &key).await?.ok_or_else(not_found)?;
        Ok(Record::new(owner.clone(), data))
    }

    async fn resolve_key(&self, grant: &RelationGrant, owner: &Record, key: &Value) -> Result<Option<Record>, AppError> {
        if let Some(resolver) = &grant.hooks.resolver {
            return resolver.resolve(self.store, key, owner).await;
        }
        lookup_key(self.store, self.targets(grant)?, key).await
    }

    fn targets(&self, grant: &RelationGrant) -> Result<Vec<Arc<EntityDescriptor>>, AppError> {
        Ok(self.compiler.registry().resolve_ref(&grant.owner, &grant.related)?)
    }

    fn target_label(&self, grant: &RelationGrant) -> Result<String, AppError> {
        let names: Vec<String> = self.targets(grant)?.iter().map(|t| t.name.clone()).collect();
        Ok(names.join("/"))
    }

    /// Item type used to project listed members: the grant's override, else each target's Related
    /// schema. Targets without any schema list as bare keys.
    fn member_type(&self, grant: &RelationGrant) -> Result<FieldType, AppError> {
        let targets = self.targets(grant)?;
        let mut schemas = Vec::new();
        for target in &targets {
            let schema = match &grant.schema_override {
                Some(config) => self.compiler.compile_override(target, &grant.label(), config)?,
                None => self.compiler.compile(target, SchemaContext::Related)?,
            };
            schemas.extend(schema);
        }
        Ok(match schemas.len() {
            0 => FieldType::Scalar(key_type(&targets)),
            1 => FieldType::Object(schemas.remove(0)),
            _ => FieldType::Union(schemas),
        })
    }
}

fn check_request(grant: &RelationGrant, request: &ManageRequest) -> Result<(), AppError> {
    let ops = grant.ops;
    if !ops.any_mutation() {
        return Err(AppError::BadRequest(format!("{} accepts neither add nor remove", grant.label())));
    }
    if request.add.is_empty() && request.remove.is_empty() {
        let expected = match (ops.add, ops.remove) {
            (true, true) => "add or remove",
            (true, false) => "add",
            _ => "remove",
        };
        return Err(AppError::BadRequest(format!("request must include {}", expected)));
    }
    if !request.add.is_empty() && !ops.add {
        return Err(AppError::BadRequest(format!("add is not enabled for {}", grant.label())));
    }
    if !request.remove.is_empty() && !ops.remove {
        return Err(AppError::BadRequest(format!("remove is not enabled for {}", grant.label())));
    }
    Ok(())
}
