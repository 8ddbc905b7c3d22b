//! Error types for the Portex client engine
//!
//! Every crate in the workspace returns [`Result`] with this [`Error`].
//! Validation and state errors are raised at the violating call; transport
//! and worker failures are surfaced by the collaborator that produced them.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for Portex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Portex client engine
#[derive(Debug, Error)]
pub enum Error {
    /// A value or schema does not conform to its declared type
    #[error("Schema validation failed at '{path}': {message}")]
    SchemaValidation {
        /// Dotted path of the offending field, cell or row (empty for the root)
        path: String,
        /// What was wrong
        message: String,
    },

    /// Mutation attempted on a frame or series whose schema came from a template
    #[error("Field '{field}' is immutable: its schema is derived from a template")]
    ImmutableField {
        /// Column or field that was targeted
        field: String,
    },

    /// A revision matched no commit id, branch or tag
    #[error("Revision not found: {revision}")]
    RevisionNotFound {
        /// The revision string as given by the caller
        revision: String,
    },

    /// A branch or tag was requested from a branch that has no commits
    #[error("Branch '{branch}' has no commit to start from")]
    BranchWithoutCommit {
        /// Source branch name
        branch: String,
    },

    /// Draft operation not permitted in the draft's current state
    #[error("Draft #{number} is {state}: cannot {operation}")]
    DraftState {
        /// Draft number
        number: u64,
        /// Current state of the draft
        state: String,
        /// The rejected operation
        operation: String,
    },

    /// Transport failure surfaced from a remote collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// A chunk upload exhausted its retries
    #[error("Upload worker failed on chunk {chunk} of sheet '{sheet}' after {attempts} attempts: {message}")]
    UploadWorker {
        /// Sheet being uploaded
        sheet: String,
        /// Index of the failing chunk
        chunk: usize,
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// Argument rejected before any work was done
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not valid for the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Named remote resource does not exist
    #[error("{resource} not found: {name}")]
    NotFound {
        /// Kind of resource ("dataset", "sheet", "draft", ...)
        resource: &'static str,
        /// Its name or number
        name: String,
    },

    /// Template declaration or instantiation failure
    #[error("Template error: {0}")]
    Template(String),

    /// Predicate cannot be translated to a server-side criteria tree
    #[error("Criteria translation failed: {0}")]
    Criteria(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error (local files, config)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a schema validation error for `path`.
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SchemaValidation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an immutable-field error.
    pub fn immutable(field: impl Into<String>) -> Self {
        Error::ImmutableField {
            field: field.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Returns true for schema validation errors.
    pub fn is_schema_validation(&self) -> bool {
        matches!(self, Error::SchemaValidation { .. })
    }

    /// Returns true for immutable field errors.
    pub fn is_immutable_field(&self) -> bool {
        matches!(self, Error::ImmutableField { .. })
    }

    /// Returns true for draft state errors.
    pub fn is_draft_state(&self) -> bool {
        matches!(self, Error::DraftState { .. })
    }

    /// Returns true for missing remote resources.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if a retry of the same call might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
