//! Core error type
//!
//! One error enum for the whole crate, covering seven kinds: schema/bounds
//! violations are `InvalidInput`, missing records are `NotFound`,
//! uniqueness/self-loop violations are `Conflict`, storage/query failures
//! are `Store`, failed calls to the embedding or summarization
//! collaborators are `ExternalUnavailable`, unrecoverable startup-time
//! schema corruption is `Fatal`, and a caller-requested cancellation
//! observed mid-operation is `Cancelled`.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the core API façade.
///
/// Recoverable kinds never unwind out of the façade: inference
/// sub-strategies, empty-graph analytics, and a single failing retrieval
/// source are recovered locally by the component that hit them and never
/// reach this enum. What does reach it is always meant to be shown to the
/// caller.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Schema/bounds violation: empty text, missing id, malformed metadata,
    /// unknown action.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity/observation/relationship/snapshot/rule is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-name collision, self-relationship, or contradictory metadata.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying query or transaction failure, carrying the query and cause.
    #[error("store error running `{query}`: {cause}")]
    Store {
        /// The query or operation that failed.
        query: String,
        /// Display of the underlying cause.
        cause: String,
    },

    /// The embedding or summarization collaborator failed or timed out.
    #[error("external collaborator unavailable: {0}")]
    ExternalUnavailable(String),

    /// Schema corruption or index/dimension mismatch detected at startup.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The caller's cancellation token fired before the operation finished.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl CoreError {
    /// Build a [`CoreError::Store`] from a query description and any
    /// displayable cause.
    pub fn store(query: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        CoreError::Store {
            query: query.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Store {
            query: "sqlite".to_string(),
            cause: e.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Fatal(format!("io error: {e}"))
    }
}

/// Poll `token`, failing `op` with [`CoreError::Cancelled`] if it has
/// already fired. Long-running operations call this between sub-queries
/// and before every external call rather than awaiting cancellation.
pub fn check_cancelled(token: &tokio_util::sync::CancellationToken, op: &str) -> Result<()> {
    if token.is_cancelled() {
        return Err(CoreError::Cancelled(op.to_string()));
    }
    Ok(())
}
