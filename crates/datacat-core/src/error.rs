//! Error types for the catalog core.
//!
//! Each component raises its own kind; the HTTP boundary maps kinds to
//! status codes. Database errors are captured with their SQLSTATE so that
//! constraint violations can be told apart from transport failures.

use http::StatusCode;
use thiserror::Error;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the catalog core.
#[derive(Error, Debug)]
pub enum Error {
    /// The query language rejected the input. Normally rescued by the
    /// hybrid search path and never surfaced to callers.
    #[error("could not parse query: {0}")]
    QuerySyntax(String),

    /// Caller-supplied input failed validation before any database work.
    #[error("{0}")]
    Validation(String),

    /// A fetch-by-id style lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique or foreign-key constraint refused the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The search SELECT/COUNT pair failed at the database.
    #[error("search execution failed: {0}")]
    SearchExecution(String),

    /// More than half of an ingestion batch failed; the transaction was
    /// rolled back.
    #[error("import failed: {failed}/{total} records could not be processed")]
    BatchImport { total: usize, failed: usize },

    /// Startup-time configuration problem. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),

    /// The pool could not hand out a connection.
    #[error("connection pool error: {0}")]
    ConnectionPool(String),

    /// The schema analysis has not been loaded yet.
    #[error("schema cache not loaded")]
    SchemaCacheNotLoaded,
}

impl Error {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::QuerySyntax(_) | Self::Validation(_) | Self::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SearchExecution(_)
            | Self::BatchImport { .. }
            | Self::Configuration(_)
            | Self::Database(_)
            | Self::ConnectionPool(_)
            | Self::SchemaCacheNotLoaded => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error identifier used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuerySyntax(_) => "query_syntax_error",
            Self::Validation(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::SearchExecution(_) => "search_execution_error",
            Self::BatchImport { .. } => "batch_import_error",
            Self::Configuration(_) => "configuration_error",
            Self::Database(_) => "database_error",
            Self::ConnectionPool(_) => "connection_pool_error",
            Self::SchemaCacheNotLoaded => "schema_cache_not_loaded",
        }
    }

    /// JSON body for error responses: `{"error": kind, "message": text}`.
    ///
    /// The message never contains generated SQL; that stays in debug logs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::ConnectionPool(e.to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            _ => Self::Database(e.to_string()),
        }
    }
}

/// SQLSTATE class 23505: unique constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    db_code(e).is_some_and(|c| c == "23505")
}

/// SQLSTATE class 23503: foreign-key constraint violation.
pub fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    db_code(e).is_some_and(|c| c == "23503")
}

fn db_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::Validation("bad sort".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("dataset 7".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Conflict("name taken".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::SearchExecution("db down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::BatchImport { total: 4, failed: 3 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_to_json_shape() {
        let json = Error::Validation("sort_order must be 'asc' or 'desc'".into()).to_json();
        assert_eq!(json["error"], "invalid_input");
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("sort_order"));
    }

    #[test]
    fn test_batch_import_message_carries_counts() {
        let msg = Error::BatchImport { total: 10, failed: 6 }.to_string();
        assert!(msg.contains("6/10"));
    }
}
