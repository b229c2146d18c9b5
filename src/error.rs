use thiserror::Error;

/// Main error type for GraphRec
#[derive(Error, Debug)]
pub enum GraphRecError {
    /// Relational source (SQLite) errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph sink unreachable, timed out, or answered with a retryable status
    #[error("Graph connection error: {0}")]
    Connection(String),

    /// Graph sink refused the transaction without committing it (rate limit,
    /// `Neo.TransientError.*`); the same statement may be sent again
    #[error("Graph transaction rejected: {0}")]
    Rejected(String),

    /// Graph sink rejected a statement (syntax, constraint violation, auth)
    #[error("Graph query error: {0}")]
    GraphQuery(String),

    /// A structural relationship referenced a node that is not in the graph
    #[error("Missing endpoint for {rel_type}: ({from_label} {from_key}) -> ({to_label} {to_key})")]
    MissingEndpoint {
        rel_type: String,
        from_label: String,
        from_key: i64,
        to_label: String,
        to_key: i64,
    },

    /// Scoring oracle failed for a (customer, product) pair
    #[error("Scoring error: {0}")]
    Scoring(String),

    /// Model training or persistence errors
    #[error("Model error: {0}")]
    Model(String),
}

impl GraphRecError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphRecError::Connection(_) | GraphRecError::Rejected(_))
    }

    /// Whether the failed call is known to have changed nothing in the graph.
    ///
    /// A `Connection` error (timeout, dropped reply) may hide a committed write.
    pub fn is_uncommitted(&self) -> bool {
        !matches!(self, GraphRecError::Connection(_))
    }
}

/// Convenient Result type using GraphRecError
pub type Result<T> = std::result::Result<T, GraphRecError>;
