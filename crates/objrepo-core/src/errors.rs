use thiserror::Error;
use uuid::Uuid;

/// Result type alias using RepositoryError
pub type Result<T> = std::result::Result<T, RepositoryError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Stable classification of every failure the repository engine and its
/// storage adapters can report. Each kind maps to a stable error code used
/// for programmatic handling, log assertions and host-facing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Lifecycle
    LoadingInProgress,
    InvalidState,
    UnregisteredType,

    // Lookup / integrity
    NotFound,
    AlreadyExists,
    UnresolvedReference,
    UnknownIndex,
    DeleteRestricted,

    // Input
    InvalidInput,

    // Integration/IO
    Serialization,
    Persistence,
    PartialBatch,
    Concurrency,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::LoadingInProgress => "ERR_LOADING_IN_PROGRESS",
            ExErrorKind::InvalidState => "ERR_INVALID_STATE",
            ExErrorKind::UnregisteredType => "ERR_UNREGISTERED_TYPE",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::UnresolvedReference => "ERR_UNRESOLVED_REFERENCE",
            ExErrorKind::UnknownIndex => "ERR_UNKNOWN_INDEX",
            ExErrorKind::DeleteRestricted => "ERR_DELETE_RESTRICTED",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::PartialBatch => "ERR_PARTIAL_BATCH",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether a caller may retry the failed operation unchanged later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExErrorKind::LoadingInProgress
                | ExErrorKind::Persistence
                | ExErrorKind::PartialBatch
                | ExErrorKind::Concurrency
        )
    }
}

/// Canonical structured error type
///
/// This is the error shape storage adapters return and the shape delivered
/// on the repository's `on_exception` channel.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    model_type: Option<String>,
    entity_id: Option<String>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            model_type: None,
            entity_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add model or record type context
    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }

    /// Add entity ID context
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the model type context, if any
    pub fn model_type(&self) -> Option<&str> {
        self.model_type.as_deref()
    }

    /// Get the entity ID context, if any
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(model_type) = &self.model_type {
            write!(f, " (model_type: {})", model_type)?;
        }
        if let Some(entity_id) = &self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, " caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for repository operations
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    // ===== Lifecycle Errors =====
    /// A mutating call arrived before `initialize` completed
    ///
    /// `progress` is the fraction (0.0..=1.0) of registered types whose
    /// fetch has finished. Callers are expected to retry.
    #[error("Loading in progress: {progress:.2} of registered types loaded")]
    LoadingInProgress { progress: f64 },

    /// `set::<T>()` for a type that was never registered
    #[error("Type {type_name} is not registered with this repository")]
    UnregisteredType { type_name: String },

    /// The same model type was registered twice
    #[error("Type {type_name} is already registered")]
    DuplicateRegistration { type_name: String },

    /// `register_type` after `initialize` started
    #[error("Repository is already initialized; register types before calling initialize")]
    AlreadyInitialized,

    /// `initialize` without any `register_type`
    #[error("No type was registered before initialize")]
    NothingRegistered,

    /// The repository owning an object has been dropped
    #[error("Object {id} of type {type_name} is not attached to a live repository")]
    Detached { type_name: String, id: Uuid },

    // ===== Lookup / Integrity Errors =====
    /// A to-one accessor's foreign key matches no live object
    #[error("Unresolved reference: no {expected_type} with id {id} (accessor '{accessor}')")]
    UnresolvedReference {
        expected_type: String,
        id: Uuid,
        accessor: String,
    },

    /// An object with the same id already lives in the table
    #[error("Duplicate id {id} in table {type_name}")]
    DuplicateId { type_name: String, id: Uuid },

    /// The object is not present in its table
    #[error("Object {id} not found in table {type_name}")]
    NotFound { type_name: String, id: Uuid },

    /// The object already belongs to a repository
    #[error("Object {id} of type {type_name} already has an owning repository")]
    OwnerAlreadySet { type_name: String, id: Uuid },

    /// Lookup through an index that was never declared
    #[error("Index '{index}' is not declared on table {type_name}")]
    UnknownIndex { type_name: String, index: String },

    /// Removal refused because other objects still reference the object
    #[error("Cannot remove {type_name} {id}: {child_count} {referencing_type} object(s) reference it through '{property}'")]
    DeleteRestricted {
        type_name: String,
        id: Uuid,
        referencing_type: String,
        property: String,
        child_count: usize,
    },

    // ===== Integration Errors =====
    /// A backend record could not be decoded into its record type
    #[error("Failed to decode {kind} record: {message}")]
    Decode { kind: String, message: String },

    /// A record could not be serialized for the change stream
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Failure reported by the storage backend
    #[error("Storage failure: {0}")]
    Storage(ExError),

    /// Warm-up failed for an object while strict warm-up is enabled
    #[error("Warm-up of {type_name} {id} failed in accessor '{accessor}': {message}")]
    WarmUp {
        type_name: String,
        id: Uuid,
        accessor: String,
        message: String,
    },

    // ===== Generic Errors =====
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RepositoryError {
    /// Whether the failed call can be retried unchanged later
    pub fn is_retryable(&self) -> bool {
        ExError::from(self.clone()).kind().is_retryable()
    }
}

impl From<ExError> for RepositoryError {
    fn from(err: ExError) -> Self {
        RepositoryError::Storage(err)
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Conversion from RepositoryError to ExError
///
/// Used when engine failures are logged through `log_op_error!` or
/// forwarded to `on_exception` subscribers.
impl From<RepositoryError> for ExError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::LoadingInProgress { progress } => {
                ExError::new(ExErrorKind::LoadingInProgress)
                    .with_message(format!("{:.2} of registered types loaded", progress))
            }
            RepositoryError::UnregisteredType { type_name } => {
                ExError::new(ExErrorKind::UnregisteredType)
                    .with_op("set")
                    .with_model_type(type_name)
                    .with_message("Type not registered")
            }
            RepositoryError::DuplicateRegistration { type_name } => {
                ExError::new(ExErrorKind::InvalidState)
                    .with_op("register_type")
                    .with_model_type(type_name)
                    .with_message("Type already registered")
            }
            RepositoryError::AlreadyInitialized => ExError::new(ExErrorKind::InvalidState)
                .with_op("register_type")
                .with_message("Repository already initialized"),
            RepositoryError::NothingRegistered => ExError::new(ExErrorKind::InvalidState)
                .with_op("initialize")
                .with_message("No type registered"),
            RepositoryError::Detached { type_name, id } => {
                ExError::new(ExErrorKind::InvalidState)
                    .with_model_type(type_name)
                    .with_entity_id(id.to_string())
                    .with_message("Object is detached from its repository")
            }
            RepositoryError::UnresolvedReference {
                expected_type,
                id,
                accessor,
            } => ExError::new(ExErrorKind::UnresolvedReference)
                .with_op(accessor)
                .with_model_type(expected_type)
                .with_entity_id(id.to_string())
                .with_message("Foreign key matches no live object"),
            RepositoryError::DuplicateId { type_name, id } => {
                ExError::new(ExErrorKind::AlreadyExists)
                    .with_op("add")
                    .with_model_type(type_name)
                    .with_entity_id(id.to_string())
                    .with_message("Duplicate id")
            }
            RepositoryError::NotFound { type_name, id } => ExError::new(ExErrorKind::NotFound)
                .with_op("remove")
                .with_model_type(type_name)
                .with_entity_id(id.to_string())
                .with_message("Object not found"),
            RepositoryError::OwnerAlreadySet { type_name, id } => {
                ExError::new(ExErrorKind::InvalidState)
                    .with_op("set_owner")
                    .with_model_type(type_name)
                    .with_entity_id(id.to_string())
                    .with_message("Owner already set")
            }
            RepositoryError::UnknownIndex { type_name, index } => {
                ExError::new(ExErrorKind::UnknownIndex)
                    .with_op("find_by_index")
                    .with_model_type(type_name)
                    .with_message(format!("Index '{}' not declared", index))
            }
            RepositoryError::DeleteRestricted {
                type_name,
                id,
                referencing_type,
                property,
                child_count,
            } => ExError::new(ExErrorKind::DeleteRestricted)
                .with_op("remove")
                .with_model_type(type_name)
                .with_entity_id(id.to_string())
                .with_message(format!(
                    "{} {} object(s) reference it through '{}'",
                    child_count, referencing_type, property
                )),
            RepositoryError::Decode { kind, message } => ExError::new(ExErrorKind::Serialization)
                .with_op("decode")
                .with_model_type(kind)
                .with_message(message),
            RepositoryError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
            RepositoryError::Storage(inner) => inner,
            RepositoryError::WarmUp {
                type_name,
                id,
                accessor,
                message,
            } => ExError::new(ExErrorKind::UnresolvedReference)
                .with_op(format!("warm_up:{}", accessor))
                .with_model_type(type_name)
                .with_entity_id(id.to_string())
                .with_message(message),
            RepositoryError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}
