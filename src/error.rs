//! Error types for the schema core.
//!
//! Every fallible operation in the crate returns [`SchemaResult`]. The variants
//! map onto the failure classes callers need to tell apart: invalid schema
//! edits, rejected SQL, DDL refused by the database, quota and provisioning
//! failures, and plain driver errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },

    #[error("SQL validation failed: {message}")]
    SqlValidation { message: String },

    #[error("DDL execution failed at statement {statement_index}: {message}")]
    DdlExecution {
        message: String,
        /// e.g., "42P07" for duplicate table
        sql_state: Option<String>,
        statement_index: usize,
    },

    #[error("Quota exceeded: {scope} has {current} active databases (limit {limit})")]
    QuotaExceeded {
        scope: String,
        current: i64,
        limit: i64,
    },

    #[error("Provisioning failed during {stage}: {message}")]
    Provisioning { stage: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SchemaError {
    /// Create a schema validation error.
    pub fn schema_validation(message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
        }
    }

    /// Create a SQL validation error.
    pub fn sql_validation(message: impl Into<String>) -> Self {
        Self::SqlValidation {
            message: message.into(),
        }
    }

    /// Create a DDL execution error for the statement at `statement_index`.
    pub fn ddl_execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        statement_index: usize,
    ) -> Self {
        Self::DdlExecution {
            message: message.into(),
            sql_state,
            statement_index,
        }
    }

    /// Create a quota error.
    pub fn quota_exceeded(scope: impl Into<String>, current: i64, limit: i64) -> Self {
        Self::QuotaExceeded {
            scope: scope.into(),
            current,
            limit,
        }
    }

    /// Create a provisioning error tagged with the stage that failed.
    pub fn provisioning(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if the error came from one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } | Self::DdlExecution { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }

    /// Check if this error is worth retrying unchanged.
    ///
    /// Only transport-level failures qualify. Validation and quota errors need
    /// different input before another attempt can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Remediation hint for a PostgreSQL SQLSTATE.
fn sql_state_suggestion(code: Option<&str>) -> &'static str {
    match code {
        Some("28P01") | Some("28000") => "Check the username and password in the DSN",
        Some("3D000") => "The database does not exist; check the database name",
        Some("42P04") | Some("42710") => "The database or role already exists; retry with new names",
        Some("42501") => "The role lacks the privilege for this operation",
        Some("53300") => "Too many connections; close idle sessions or raise the role limit",
        Some("57014") => "The statement timed out; simplify it or raise statement_timeout",
        Some(code) if code.starts_with("42") => "Check the SQL and the referenced objects",
        _ => "Check the server log for details",
    }
}

impl From<sqlx::Error> for SchemaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = sql_state_suggestion(code.as_deref());
                SchemaError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::Configuration(e) => {
                SchemaError::connection(e.to_string(), "Check the DSN format and credentials")
            }
            sqlx::Error::Io(e) => SchemaError::connection(
                format!("I/O error: {}", e),
                "Check that the PostgreSQL server is reachable",
            ),
            sqlx::Error::Tls(e) => SchemaError::connection(
                format!("TLS error: {}", e),
                "Check the server's TLS settings and certificates",
            ),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => SchemaError::connection(
                err.to_string(),
                "Check that the PostgreSQL server is reachable",
            ),
            sqlx::Error::RowNotFound => SchemaError::not_found("No matching row"),
            other => SchemaError::internal(format!("Driver error: {}", other)),
        }
    }
}

/// Result type alias for schema core operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
