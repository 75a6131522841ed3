//! Services over the compiled schemas: relation grants, the relation-mutation engine and CRUD.

mod crud;
mod grant;
pub mod relation;

pub use crud::{CrudService, NoHooks, ParsedInput, RelationAssignment, SaveHooks};
pub use grant::{EnabledOps, FilterField, FilterTransform, GrantHooks, KeyResolver, RelationGrant, RelationHooks};
pub use relation::{BatchValidation, ManageMode, ManageRequest, ManageResult, ManageStage, RelationService, ResultBucket};
