//! Error types for the database access core.
//!
//! Every failure leaving the core is one of the [`DbError`] variants below.
//! Backend errors are always classified by the adapter that produced them,
//! so callers never see a raw driver error.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown {resource}: '{name}'")]
    NotFound {
        resource: &'static str,
        name: String,
    },

    #[error("Access denied on '{alias}': {reason}")]
    AccessDenied { alias: String, reason: String },

    #[error("Pool for '{alias}' exhausted: no connection available within {waited_ms}ms")]
    PoolExhausted { alias: String, waited_ms: u64 },

    #[error("Connection failed: {message}")]
    Connect {
        message: String,
        code: Option<String>,
    },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// Backend-native code, e.g. "42P01" for an undefined table
        code: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
        code: Option<String>,
    },
}

/// Machine-readable error kind, stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    NotFound,
    AccessDenied,
    PoolExhausted,
    Connect,
    Execution,
    Timeout,
    BackendUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::NotFound => "not_found",
            Self::AccessDenied => "access_denied",
            Self::PoolExhausted => "pool_exhausted",
            Self::Connect => "connect",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not-found error for an alias, table or other named resource.
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub fn access_denied(alias: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            alias: alias.into(),
            reason: reason.into(),
        }
    }

    pub fn pool_exhausted(alias: impl Into<String>, waited_ms: u64) -> Self {
        Self::PoolExhausted {
            alias: alias.into(),
            waited_ms,
        }
    }

    pub fn connect(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Connect {
            message: message.into(),
            code,
        }
    }

    pub fn execution(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            code,
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    pub fn backend_unavailable(message: impl Into<String>, code: Option<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            code,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
        }
    }

    /// Backend-native error code, if the backend reported one.
    pub fn native_code(&self) -> Option<&str> {
        match self {
            Self::Connect { code, .. }
            | Self::Execution { code, .. }
            | Self::BackendUnavailable { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether trying again later may succeed without any change to the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. }
                | Self::Connect { .. }
                | Self::Timeout { .. }
                | Self::BackendUnavailable { .. }
        )
    }

    /// Whether the connection that produced this error must be discarded.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::BackendUnavailable { .. })
    }

    /// Whether the failure happened before any statement reached a backend.
    pub fn is_pre_backend(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::NotFound { .. }
                | Self::AccessDenied { .. }
                | Self::PoolExhausted { .. }
                | Self::Connect { .. }
        )
    }

    /// Classify a sqlx error raised while running a statement.
    ///
    /// `severed` decides, from the backend-native code, whether the server
    /// dropped the session. Each adapter supplies its own table of codes.
    pub fn from_sqlx(err: sqlx::Error, severed: impl Fn(&str) -> bool) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let message = db_err.message().to_string();
                match code {
                    Some(c) if severed(&c) => Self::backend_unavailable(message, Some(c)),
                    code => Self::execution(message, code),
                }
            }
            sqlx::Error::Io(io_err) => Self::backend_unavailable(format!("I/O error: {io_err}"), None),
            sqlx::Error::Tls(tls_err) => {
                Self::backend_unavailable(format!("TLS error: {tls_err}"), None)
            }
            sqlx::Error::Protocol(msg) => {
                Self::backend_unavailable(format!("Protocol error: {msg}"), None)
            }
            sqlx::Error::WorkerCrashed => {
                Self::backend_unavailable("Database worker crashed", None)
            }
            sqlx::Error::PoolClosed => Self::backend_unavailable("Connection closed", None),
            sqlx::Error::PoolTimedOut => Self::timeout("backend acquire", 0),
            // Mid-request, never a service configuration error
            sqlx::Error::Configuration(msg) => {
                Self::execution(format!("Invalid connection settings: {msg}"), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                Self::execution(format!("Failed to decode column {index}: {source}"), None)
            }
            sqlx::Error::Decode(source) => Self::execution(format!("Decode error: {source}"), None),
            other => Self::execution(other.to_string(), None),
        }
    }

    /// Classify a sqlx error raised while opening a connection.
    pub fn from_sqlx_connect(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                Self::connect(db_err.message(), db_err.code().map(|c| c.to_string()))
            }
            sqlx::Error::Configuration(msg) => {
                Self::connect(format!("Invalid connection settings: {msg}"), None)
            }
            other => Self::connect(other.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

fn error_data(err: &DbError, retryable: bool) -> serde_json::Value {
    serde_json::json!({
        "kind": err.kind(),
        "code": err.native_code(),
        "retryable": retryable,
    })
}

/// Map a classified error onto MCP error codes, attaching the kind,
/// native code and retryability in `data`.
pub fn to_error_data(err: &DbError, retryable: bool) -> rmcp::ErrorData {
    let data = Some(error_data(err, retryable));
    match err.kind() {
        ErrorKind::NotFound => rmcp::ErrorData::resource_not_found(err.to_string(), data),
        ErrorKind::Config | ErrorKind::AccessDenied | ErrorKind::Execution => {
            let message = match err.native_code() {
                Some(code) => format!("{err} (code: {code})"),
                None => err.to_string(),
            };
            rmcp::ErrorData::invalid_params(message, data)
        }
        ErrorKind::PoolExhausted
        | ErrorKind::Connect
        | ErrorKind::Timeout
        | ErrorKind::BackendUnavailable => rmcp::ErrorData::internal_error(err.to_string(), data),
    }
}

/// Without statement context only failures that never reached a backend
/// are reported as retryable.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let retryable = err.is_transient() && err.is_pre_backend();
        to_error_data(&err, retryable)
    }
}
