//! Configuration registry.
//!
//! [`Registry::load`] turns a [`ConfigDocument`] into validated descriptors,
//! reporting every problem at once. [`SharedRegistry`] holds the active
//! registry and swaps it wholesale on reload, so a failed reload never
//! disturbs the registry that is serving requests.

use crate::config::{ConfigDocument, DatabaseEntry};
use crate::error::{DbError, DbResult};
use crate::models::{
    AccessMode, BackendKind, ConnectionTarget, Credential, DatabaseDescriptor, PoolLimits, Secret,
    validate_alias,
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Immutable alias to descriptor mapping.
#[derive(Debug, Default)]
pub struct Registry {
    databases: BTreeMap<String, Arc<DatabaseDescriptor>>,
}

impl Registry {
    /// Validate a whole document. Either every entry is valid or nothing is returned.
    pub fn load(doc: &ConfigDocument) -> DbResult<Self> {
        let mut problems = Vec::new();
        let mut databases = BTreeMap::new();
        let mut seen_lowercase = BTreeMap::new();

        for (alias, entry) in &doc.databases {
            if let Err(problem) = validate_alias(alias) {
                problems.push(problem);
                continue;
            }
            // Aliases differing only in case would be ambiguous to callers.
            if let Some(previous) = seen_lowercase.insert(alias.to_ascii_lowercase(), alias.clone()) {
                problems.push(format!("aliases '{previous}' and '{alias}' differ only in case"));
                continue;
            }
            match build_descriptor(alias, entry) {
                Ok(descriptor) => {
                    databases.insert(alias.clone(), Arc::new(descriptor));
                }
                Err(mut entry_problems) => problems.append(&mut entry_problems),
            }
        }

        if !problems.is_empty() {
            return Err(DbError::config(problems.join("; ")));
        }
        Ok(Self { databases })
    }

    /// Build directly from descriptors, checking alias format and uniqueness.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = DatabaseDescriptor>,
    ) -> DbResult<Self> {
        let mut problems = Vec::new();
        let mut databases = BTreeMap::new();
        for descriptor in descriptors {
            if let Err(problem) = validate_alias(&descriptor.alias) {
                problems.push(problem);
                continue;
            }
            if descriptor.pool.max_size == 0 {
                problems.push(format!("{}: pool.max_size must be greater than 0", descriptor.alias));
            }
            let alias = descriptor.alias.clone();
            if databases.insert(alias.clone(), Arc::new(descriptor)).is_some() {
                problems.push(format!("alias '{alias}' is defined twice"));
            }
        }
        if !problems.is_empty() {
            return Err(DbError::config(problems.join("; ")));
        }
        Ok(Self { databases })
    }

    pub fn resolve(&self, alias: &str) -> DbResult<Arc<DatabaseDescriptor>> {
        self.databases
            .get(alias)
            .cloned()
            .ok_or_else(|| DbError::not_found("alias", alias))
    }

    /// All descriptors, sorted by alias.
    pub fn list(&self) -> Vec<Arc<DatabaseDescriptor>> {
        self.databases.values().cloned().collect()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

fn build_descriptor(alias: &str, entry: &DatabaseEntry) -> Result<DatabaseDescriptor, Vec<String>> {
    let mut problems = Vec::new();
    let mut problem = |message: String| problems.push(format!("{alias}: {message}"));

    let kind = match entry.backend_name() {
        None => {
            problem("cannot determine database type; set `type`, `url`, `path` or `host`".into());
            None
        }
        Some(name) => {
            let kind = BackendKind::parse(&name);
            if kind.is_none() {
                problem(format!("unsupported database type '{name}'"));
            }
            kind
        }
    };

    let access_mode = match entry.access.as_deref() {
        None => AccessMode::ReadOnly,
        Some(raw) => AccessMode::parse(raw).unwrap_or_else(|| {
            problem(format!("access must be 'read-only' or 'read-write', got '{raw}'"));
            AccessMode::ReadOnly
        }),
    };

    if entry.statement_timeout_secs == Some(0) {
        problem("statement_timeout_secs must be greater than 0".into());
    }
    if entry.password.is_some() && entry.password_env.is_some() {
        problem("set only one of `password` and `password_env`".into());
    }

    let target = kind.and_then(|kind| match build_target(kind, entry) {
        Ok(target) => Some(target),
        Err(message) => {
            problem(message);
            None
        }
    });

    for message in entry.pool.problems() {
        problem(message);
    }

    match (kind, target) {
        (Some(kind), Some(target)) if problems.is_empty() => {
            let single_writer = kind == BackendKind::Sqlite && !access_mode.is_read_only();
            Ok(DatabaseDescriptor {
                alias: alias.to_string(),
                kind,
                target,
                access_mode,
                pool: PoolLimits {
                    max_size: entry.pool.max_size_or_default(single_writer),
                    idle_timeout: entry.pool.idle_timeout_or_default(),
                    acquire_timeout: entry.pool.acquire_timeout_or_default(),
                    max_lifetime: entry.pool.max_lifetime(),
                },
                statement_timeout: entry.statement_timeout_secs.map(Duration::from_secs),
                description: entry.description.clone(),
            })
        }
        _ => Err(problems),
    }
}

fn build_target(kind: BackendKind, entry: &DatabaseEntry) -> Result<ConnectionTarget, String> {
    if let Some(url) = &entry.url {
        if BackendKind::from_connection_string(url) != Some(kind) {
            return Err(format!("url scheme does not match type {kind}"));
        }
        return Ok(ConnectionTarget::Url(Secret::new(url.clone())));
    }

    match kind {
        BackendKind::Sqlite => match &entry.path {
            Some(path) if !path.as_os_str().is_empty() => {
                Ok(ConnectionTarget::File { path: path.clone() })
            }
            _ => Err("SQLite requires `path`".to_string()),
        },
        BackendKind::Postgres | BackendKind::MySql => {
            let host = entry
                .host
                .clone()
                .unwrap_or_else(|| "localhost".to_string());
            if entry.dbname.is_none() {
                return Err(format!("{kind} requires `dbname`"));
            }
            let password = match (&entry.password, &entry.password_env) {
                (Some(inline), _) => Some(Credential::Inline(Secret::new(inline.clone()))),
                (None, Some(var)) => Some(Credential::Env(var.clone())),
                (None, None) => None,
            };
            Ok(ConnectionTarget::Network {
                host,
                port: entry.port.or(kind.default_port()),
                database: entry.dbname.clone(),
                username: entry.user.clone(),
                password,
            })
        }
    }
}

/// The active registry, replaced atomically on reload.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    current: RwLock<Arc<Registry>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Snapshot of the active registry; later reloads do not affect it.
    pub fn current(&self) -> Arc<Registry> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validate `doc` and, only if it is entirely valid, make it active.
    pub fn reload(&self, doc: &ConfigDocument) -> DbResult<Arc<Registry>> {
        let next = match Registry::load(doc) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                warn!(error = %e, "Configuration reload rejected, keeping previous registry");
                return Err(e);
            }
        };
        self.replace(next.clone());
        info!(databases = next.len(), "Configuration reloaded");
        Ok(next)
    }

    pub fn replace(&self, registry: Arc<Registry>) {
        match self.current.write() {
            Ok(mut guard) => *guard = registry,
            Err(poisoned) => *poisoned.into_inner() = registry,
        }
    }
}
