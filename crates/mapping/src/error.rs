use actionkit_core::ActionError;
use thiserror::Error;

/// Declaration-time problems: malformed mappings and inconsistent schemas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("Invalid mapping: {0}")]
    InvalidDirective(String),

    #[error("Duplicate field key '{0}'")]
    DuplicateField(String),

    #[error("Field '{field}' references unknown field '{reference}'")]
    UnknownReference { field: String, reference: String },

    #[error("Cyclic requirement between fields: {0}")]
    CyclicRequirement(String),

    #[error("Batch path '{path}' of action '{action}' depends on the payload")]
    PayloadInBatchPath { action: String, path: String },

    #[error("Invalid pattern for field '{field}': {message}")]
    InvalidPattern { field: String, message: String },
}

impl From<MappingError> for ActionError {
    fn from(err: MappingError) -> Self {
        ActionError::Config(err.to_string())
    }
}
