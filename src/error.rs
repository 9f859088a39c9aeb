use thiserror::Error;

/// Error type for pgclient operations
#[derive(Debug, Error)]
pub enum PgClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No connection to the server")]
    NotConnected,

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column {column} is NULL at row {row}")]
    NullValue { column: String, row: usize },

    #[error("Column {column} holds {value:?}, which is not a valid {expected}")]
    MalformedValue {
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("Column {column} has unsupported type {type_name}; cast it to text")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Column {column} holds a JSON {actual}, expected {expected}")]
    JsonKindMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result type alias for pgclient operations
pub type Result<T> = std::result::Result<T, PgClientError>;
