use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unknown tracking state '{0}'")]
    UnknownTrackingState(String),

    #[error("Unknown model format '{0}'")]
    UnknownModelFormat(String),
}
