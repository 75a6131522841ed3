//! Schema compilation: field classification, relation resolution, compiled types and projection.

pub mod compiler;
pub mod field;
pub mod projection;
pub mod relation;
mod types;

pub use compiler::{CompilerOptions, DetailFallback, SchemaCompiler};
pub use field::{classify, ClassifiedFields, FieldSpec};
pub use projection::Projector;
pub use types::{
    CompiledField, CompiledSchema, FieldDefault, FieldSource, FieldType, ScalarType, SchemaContext,
};
