//! Configuration handling.
//!
//! Process settings come from CLI arguments and environment variables via
//! clap. Database definitions come from a YAML document with a top-level
//! `databases:` map, optionally extended with `--database alias=URL`
//! arguments. The document is only parsed here; validation into descriptors
//! happens in [`crate::registry`].

use crate::error::{DbError, DbResult};
use clap::Parser;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
/// Hard ceiling applied to every statement regardless of configuration
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 1800;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Pool options as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10, or 1 for writable SQLite)
    #[serde(alias = "max_connections")]
    pub max_size: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl PoolOptions {
    /// Writable SQLite files allow a single writer, so they default to one connection.
    pub fn max_size_or_default(&self, single_writer: bool) -> u32 {
        self.max_size.unwrap_or(if single_writer {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// `Some(0)` disables idle eviction.
    pub fn idle_timeout_or_default(&self) -> Option<Duration> {
        match self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_secs.map(Duration::from_secs)
    }

    /// Collect every problem with these options.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_size == Some(0) {
            problems.push("pool.max_size must be greater than 0".to_string());
        }
        if self.acquire_timeout_secs == Some(0) {
            problems.push("pool.acquire_timeout_secs must be greater than 0".to_string());
        }
        if self.max_lifetime_secs == Some(0) {
            problems.push("pool.max_lifetime_secs must be greater than 0".to_string());
        }
        if let (Some(idle), Some(lifetime)) = (self.idle_timeout_or_default(), self.max_lifetime())
        {
            if !lifetime.is_zero() && idle >= lifetime {
                problems.push(format!(
                    "pool.idle_timeout_secs ({}) must be less than pool.max_lifetime_secs ({})",
                    idle.as_secs(),
                    lifetime.as_secs()
                ));
            }
        }
        problems
    }
}

/// One entry under `databases:`.
///
/// `type` may be omitted: a `url` decides by scheme, `path`/`db_path`
/// means SQLite and `host`/`dbname` means PostgreSQL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseEntry {
    #[serde(rename = "type")]
    pub backend: Option<String>,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "database")]
    pub dbname: Option<String>,
    #[serde(alias = "username")]
    pub user: Option<String>,
    pub password: Option<String>,
    pub password_env: Option<String>,
    #[serde(alias = "db_path")]
    pub path: Option<PathBuf>,
    /// "read-only" (default) or "read-write"
    pub access: Option<String>,
    #[serde(default)]
    pub pool: PoolOptions,
    pub statement_timeout_secs: Option<u64>,
    pub description: Option<String>,
}

impl DatabaseEntry {
    /// The backend name, explicit or inferred from the fields present.
    pub fn backend_name(&self) -> Option<String> {
        if let Some(explicit) = &self.backend {
            return Some(explicit.clone());
        }
        if let Some(url) = &self.url {
            let scheme = url.split(':').next().unwrap_or_default();
            return Some(scheme.to_string());
        }
        if self.path.is_some() {
            Some("sqlite".to_string())
        } else if self.dbname.is_some() || self.host.is_some() {
            Some("postgres".to_string())
        } else {
            None
        }
    }
}

/// The parsed configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseEntry>,
}

impl ConfigDocument {
    pub fn from_yaml_str(source: &str) -> DbResult<Self> {
        serde_yaml::from_str(source).map_err(|e| DbError::config(format!("invalid YAML: {e}")))
    }

    pub fn from_path(path: &Path) -> DbResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            DbError::config(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&source)
    }

    /// Point every network entry at `host` instead of its configured host.
    pub fn override_host(&mut self, host: &str) {
        for entry in self.databases.values_mut() {
            if entry.host.is_some() {
                entry.host = Some(host.to_string());
            }
        }
    }

    /// Add an entry given on the command line, rejecting duplicate aliases.
    pub fn insert_cli_entry(&mut self, alias: String, entry: DatabaseEntry) -> DbResult<()> {
        if self.databases.contains_key(&alias) {
            return Err(DbError::config(format!("alias '{alias}' is defined twice")));
        }
        self.databases.insert(alias, entry);
        Ok(())
    }
}

/// Options carried in the query string of a `--database` URL.
const CLI_OPTION_KEYS: &[&str] = &[
    "access",
    "writable",
    "max_size",
    "idle_timeout",
    "acquire_timeout",
    "max_lifetime",
    "statement_timeout",
];

/// Parse a `--database` argument of the form `alias=URL`.
///
/// Recognized query parameters are stripped from the URL and turned into
/// entry settings; the rest stay for the driver.
///
/// ```text
/// sales=postgres://svc@db:5432/sales?access=read-write&max_size=4
/// local=sqlite:///var/data/app.db
/// ```
pub fn parse_cli_database(arg: &str) -> Result<(String, DatabaseEntry), String> {
    let scheme_pos = arg.find(':').unwrap_or(arg.len());
    let (alias, url_str) = match arg[..scheme_pos].find('=') {
        Some(idx) => (arg[..idx].trim(), &arg[idx + 1..]),
        None => return Err(format!("expected alias=URL, got '{}'", crate::models::mask_url(arg))),
    };

    let mut url = Url::parse(url_str).map_err(|e| format!("invalid URL for '{alias}': {e}"))?;
    let mut opts = extract_options(&mut url, CLI_OPTION_KEYS);

    let access = opts.remove("access").or_else(|| {
        opts.remove("writable")
            .filter(|v| v.eq_ignore_ascii_case("true"))
            .map(|_| "read-write".to_string())
    });
    let secs = |opts: &mut HashMap<String, String>, key: &str| -> Result<Option<u64>, String> {
        opts.remove(key)
            .map(|v| v.parse::<u64>().map_err(|_| format!("{key} must be a number, got '{v}'")))
            .transpose()
    };

    let pool = PoolOptions {
        max_size: opts
            .remove("max_size")
            .map(|v| v.parse::<u32>().map_err(|_| format!("max_size must be a number, got '{v}'")))
            .transpose()?,
        idle_timeout_secs: secs(&mut opts, "idle_timeout")?,
        acquire_timeout_secs: secs(&mut opts, "acquire_timeout")?,
        max_lifetime_secs: secs(&mut opts, "max_lifetime")?,
    };
    let statement_timeout_secs = secs(&mut opts, "statement_timeout")?;

    Ok((
        alias.to_string(),
        DatabaseEntry {
            url: Some(url.to_string()),
            access,
            pool,
            statement_timeout_secs,
            ..DatabaseEntry::default()
        },
    ))
}

/// Remove our own keys from the URL query, keeping the others encoded for the driver.
fn extract_options(url: &mut Url, keys: &[&str]) -> HashMap<String, String> {
    let mut opts = HashMap::new();
    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            let key_lower = k.to_ascii_lowercase();
            if keys.contains(&key_lower.as_str()) {
                opts.insert(key_lower, v.into_owned());
                None
            } else {
                Some((k.into_owned(), v.into_owned()))
            }
        })
        .collect();

    if remaining.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(remaining);
    }
    opts
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "unified-db",
    about = "Unified database access service for AI agents over MCP",
    version,
    author
)]
pub struct Config {
    /// Path to the YAML configuration file with a `databases:` map
    #[arg(short, long, value_name = "FILE", env = "DB_MCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Extra databases as "alias=URL". Add ?access=read-write to allow writes.
    #[arg(
        short = 'd',
        long = "database",
        value_name = "ALIAS=URL",
        env = "MCP_DATABASE",
        value_delimiter = ','
    )]
    pub databases: Vec<String>,

    /// Connect to this host instead of the configured one for network backends
    #[arg(long, env = "MCP_LOCAL_HOST")]
    pub local_host: Option<String>,

    /// Seconds between reconnect attempts for databases that failed the startup check
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_INTERVAL_SECS,
        env = "MCP_DB_RETRY_INTERVAL"
    )]
    pub retry_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Force debug logging
    #[arg(long, env = "MCP_DEBUG", value_parser = clap::builder::BoolishValueParser::new())]
    pub debug: bool,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            config: None,
            databases: Vec::new(),
            local_host: None,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            log_level: "info".to_string(),
            debug: false,
            json_logs: false,
        }
    }

    pub fn effective_log_level(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }

    /// Build the configuration document from the file and CLI databases.
    pub fn load_document(&self) -> DbResult<ConfigDocument> {
        let mut doc = match &self.config {
            Some(path) => ConfigDocument::from_path(path)?,
            None => ConfigDocument::default(),
        };
        for arg in &self.databases {
            let (alias, entry) = parse_cli_database(arg).map_err(DbError::config)?;
            doc.insert_cli_entry(alias, entry)?;
        }
        if let Some(host) = &self.local_host {
            doc.override_host(host);
        }
        if doc.databases.is_empty() {
            return Err(DbError::config(
                "no databases configured; pass --config FILE or --database alias=URL",
            ));
        }
        Ok(doc)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
databases:
  warehouse:
    host: db.internal
    dbname: analytics
    user: reader
    password_env: WAREHOUSE_PW
  local:
    db_path: /tmp/app.db
    access: read-write
    pool:
      max_size: 2
  orders:
    type: mysql
    host: mysql.internal
    database: shop
"#;

    #[test]
    fn test_parse_yaml_document() {
        let doc = ConfigDocument::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(doc.databases.len(), 3);
        let local = &doc.databases["local"];
        assert_eq!(local.path.as_deref(), Some(Path::new("/tmp/app.db")));
        assert_eq!(local.pool.max_size, Some(2));
        assert_eq!(doc.databases["orders"].dbname.as_deref(), Some("shop"));
    }

    #[test]
    fn test_backend_inference() {
        let doc = ConfigDocument::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(doc.databases["warehouse"].backend_name().as_deref(), Some("postgres"));
        assert_eq!(doc.databases["local"].backend_name().as_deref(), Some("sqlite"));
        assert_eq!(doc.databases["orders"].backend_name().as_deref(), Some("mysql"));
        assert_eq!(DatabaseEntry::default().backend_name(), None);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = ConfigDocument::from_yaml_str("databases: [1, 2").unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
    }

    #[test]
    fn test_override_host_only_touches_network_entries() {
        let mut doc = ConfigDocument::from_yaml_str(SAMPLE).unwrap();
        doc.override_host("127.0.0.1");
        assert_eq!(doc.databases["warehouse"].host.as_deref(), Some("127.0.0.1"));
        assert_eq!(doc.databases["local"].host, None);
    }

    #[test]
    fn test_parse_cli_database() {
        let (alias, entry) = parse_cli_database(
            "sales=postgres://svc:pw@db:5432/sales?access=read-write&max_size=4&sslmode=require",
        )
        .unwrap();
        assert_eq!(alias, "sales");
        assert_eq!(entry.access.as_deref(), Some("read-write"));
        assert_eq!(entry.pool.max_size, Some(4));
        let url = entry.url.unwrap();
        assert!(url.contains("sslmode=require"));
        assert!(!url.contains("max_size"));
    }

    #[test]
    fn test_parse_cli_database_writable_flag() {
        let (_, entry) = parse_cli_database("w=sqlite:///tmp/x.db?writable=true").unwrap();
        assert_eq!(entry.access.as_deref(), Some("read-write"));
    }

    #[test]
    fn test_parse_cli_database_requires_alias() {
        assert!(parse_cli_database("postgres://db/sales").is_err());
        assert!(parse_cli_database("a=mysql://db/x?max_size=lots").is_err());
    }

    #[test]
    fn test_pool_option_problems() {
        let opts = PoolOptions {
            max_size: Some(0),
            idle_timeout_secs: Some(600),
            acquire_timeout_secs: None,
            max_lifetime_secs: Some(300),
        };
        let problems = opts.problems();
        assert_eq!(problems.len(), 2);
        assert!(PoolOptions::default().problems().is_empty());
    }

    #[test]
    fn test_pool_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_size_or_default(false), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(opts.max_size_or_default(true), DEFAULT_MAX_CONNECTIONS_SQLITE);
        assert_eq!(
            opts.acquire_timeout_or_default(),
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_debug_flag_forces_level() {
        let mut config = Config::default_config();
        assert_eq!(config.effective_log_level(), "info");
        config.debug = true;
        assert_eq!(config.effective_log_level(), "debug");
    }
}
