//! Error taxonomy for compiling and executing requests.

use thiserror::Error;

/// Failure reported by a storage backend behind a [`crate::aggregation::DataSource`].
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum QueryError {
    /// A field referenced by the request is not part of the table schema.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Attaching a nested aggregation the parent cannot carry.
    #[error("unsupported sub aggregation type: {child} under {parent}")]
    UnsupportedSubAggregation {
        parent: &'static str,
        child: &'static str,
    },

    #[error("invalid histogram interval '{interval}': {reason}")]
    InvalidInterval { interval: String, reason: String },

    /// Date histogram without a bounding range on the same field.
    #[error("data range for histogram field '{0}' is not set")]
    MissingRange(String),

    #[error("data table is not set for data source")]
    MissingDataTable,

    /// Storage rejected or failed a compiled query.
    #[error("query execution failed [{sql}]: {source}")]
    Execution {
        sql: String,
        #[source]
        source: SourceError,
    },

    /// Result columns do not line up with the buckets they should fill.
    #[error("bucket columns mismatch: expected {expected} values, found {found}")]
    BucketMismatch { expected: usize, found: usize },

    #[error("malformed result row: {0}")]
    MalformedRow(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl QueryError {
    /// Errors caused by the client request rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueryError::UnknownField(_)
                | QueryError::UnsupportedSubAggregation { .. }
                | QueryError::InvalidInterval { .. }
                | QueryError::MissingRange(_)
                | QueryError::InvalidRequest(_)
        )
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
