//! Database descriptors.
//!
//! A [`DatabaseDescriptor`] is the validated, immutable description of one
//! configured alias. Descriptors are built by the registry and shared behind
//! `Arc` by every pool and request that targets the alias.

use crate::error::{DbError, DbResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    /// Includes MariaDB
    MySql,
    Sqlite,
}

impl BackendKind {
    /// Parse a backend name as written in configuration.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Detect the backend from a connection URL scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::Sqlite => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Whether an alias accepts mutating statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-only" | "readonly" | "ro" => Some(Self::ReadOnly),
            "read-write" | "readwrite" | "rw" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
        }
    }
}

/// A secret string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("****")
    }
}

/// How a password is obtained when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Read from the named environment variable at connect time
    Env(String),
    Inline(Secret),
}

impl Credential {
    /// Resolve the credential to its secret value.
    pub fn resolve(&self) -> DbResult<Secret> {
        match self {
            Self::Inline(secret) => Ok(secret.clone()),
            Self::Env(var) => std::env::var(var).map(Secret::new).map_err(|_| {
                DbError::connect(format!("environment variable '{var}' is not set"), None)
            }),
        }
    }
}

/// Where a backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Network {
        host: String,
        port: Option<u16>,
        database: Option<String>,
        username: Option<String>,
        password: Option<Credential>,
    },
    File { path: PathBuf },
    /// Full connection URL, which may embed credentials
    Url(Secret),
}

impl ConnectionTarget {
    /// A display-safe rendering with credentials masked.
    pub fn masked(&self) -> String {
        match self {
            Self::Network {
                host,
                port,
                database,
                username,
                ..
            } => {
                let user = username.as_deref().map(|u| format!("{u}@")).unwrap_or_default();
                let port = port.map(|p| format!(":{p}")).unwrap_or_default();
                let db = database.as_deref().unwrap_or("");
                format!("{user}{host}{port}/{db}")
            }
            Self::File { path } => path.display().to_string(),
            Self::Url(url) => mask_url(url.expose()),
        }
    }
}

/// Replace the password component of a connection URL with `****`.
pub fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                "****".to_string()
            }
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "****".to_string(),
    }
}

/// Per-alias pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_size: u32,
    pub idle_timeout: Option<Duration>,
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_size: crate::config::DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Some(Duration::from_secs(crate::config::DEFAULT_IDLE_TIMEOUT_SECS)),
            acquire_timeout: Duration::from_secs(crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS),
            max_lifetime: None,
        }
    }
}

/// Validated description of one configured database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseDescriptor {
    pub alias: String,
    pub kind: BackendKind,
    pub target: ConnectionTarget,
    pub access_mode: AccessMode,
    pub pool: PoolLimits,
    /// Upper bound applied to every statement on this alias
    pub statement_timeout: Option<Duration>,
    pub description: Option<String>,
}

impl DatabaseDescriptor {
    /// Descriptor for a SQLite file with default limits.
    pub fn sqlite(alias: impl Into<String>, path: impl Into<PathBuf>, access_mode: AccessMode) -> Self {
        Self {
            alias: alias.into(),
            kind: BackendKind::Sqlite,
            target: ConnectionTarget::File { path: path.into() },
            access_mode,
            pool: PoolLimits::default(),
            statement_timeout: None,
            description: None,
        }
    }

    pub fn with_pool(mut self, pool: PoolLimits) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.access_mode.is_read_only()
    }
}

/// Check an alias for the allowed character set.
pub fn validate_alias(alias: &str) -> Result<(), String> {
    if alias.is_empty() {
        return Err("alias cannot be empty".to_string());
    }
    if !alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "alias '{alias}' contains invalid characters (allowed: letters, digits, '-', '_')"
        ));
    }
    Ok(())
}
