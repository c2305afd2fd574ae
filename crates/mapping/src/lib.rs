//! Declarative mapping core: field schemas, the mapping expression language,
//! value resolution, payload assembly and validation.

pub mod builder;
pub mod currency;
pub mod error;
pub mod expr;
pub mod path;
pub mod resolver;
pub mod schema;
pub mod template;
pub mod validator;

pub use builder::{
    HashIdentifiers, Normalization, Payload, PayloadBuilder, PayloadPatch, PostProcessor,
    SplitIdentifiers,
};
pub use error::MappingError;
pub use expr::{EvalOptions, Expr};
pub use resolver::{MappingOverride, ResolvedPayload, Resolver};
pub use schema::{
    Choice, ConditionOperator, Constraints, DependsOn, FieldCondition, FieldKind, FieldSchema,
    FieldSpec, Format, MatchMode, Requirement,
};
pub use validator::Rule;
