use uuid::Uuid;

/// Domain-level error type shared by the supervisor, runner, and API.
///
/// Precondition and validation failures are returned synchronously to the
/// caller. Failures that happen after a process or job has gone asynchronous
/// are never surfaced through this type; they are recorded in the entity's
/// own state and observed through reads or stream events.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Instance {entity_id} is already running")]
    AlreadyRunning { entity_id: String },

    #[error("Job {job_id} has no result yet")]
    NotReady { job_id: Uuid },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a [`CoreError::NotFound`] with a stringly id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
