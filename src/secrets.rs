use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

/// Conventional mount point for deployment-provided secret files.
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// Where a resolved secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Config,
    Env,
    File,
    Default,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Config => "config",
            Provenance::Env => "env",
            Provenance::File => "file",
            Provenance::Default => "default",
        };
        f.write_str(s)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
    pub provenance: Provenance,
}

// never print the value
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("provenance", &self.provenance)
            .finish_non_exhaustive()
    }
}

/// The secrets this service knows how to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    JwtSecret,
    SharedSecret,
    HealthToken,
    DbPassword,
    AdminUsername,
    AdminPassword,
}

impl SecretKind {
    pub fn name(self) -> &'static str {
        match self {
            SecretKind::JwtSecret => "JwtSecret",
            SecretKind::SharedSecret => "SharedSecret",
            SecretKind::HealthToken => "HealthToken",
            SecretKind::DbPassword => "DbPassword",
            SecretKind::AdminUsername => "AdminUsername",
            SecretKind::AdminPassword => "AdminPassword",
        }
    }

    /// Environment variable names, primary first.
    pub fn env_vars(self) -> &'static [&'static str] {
        match self {
            SecretKind::JwtSecret => &["JwtSecret", "JWT_SECRET"],
            SecretKind::SharedSecret => &["SharedSecret", "SHARED_SECRET"],
            SecretKind::HealthToken => &["PRIMROSE_HEALTH_TOKEN", "HEALTH_TOKEN"],
            SecretKind::DbPassword => &["DB_PASSWORD"],
            SecretKind::AdminUsername => &["PRIMROSE_ADMIN_USERNAME", "ADMIN_USERNAME"],
            SecretKind::AdminPassword => &["PRIMROSE_ADMIN_PASSWORD", "ADMIN_PASSWORD"],
        }
    }

    /// Mounted-file names relative to the secrets root, in lookup order.
    pub fn file_names(self) -> &'static [&'static str] {
        match self {
            SecretKind::JwtSecret => &["primrose_jwt", "jwt_secret"],
            SecretKind::SharedSecret => &["primrose_shared", "shared_secret"],
            SecretKind::HealthToken => &["primrose_health_token", "health_token"],
            SecretKind::DbPassword => &["db_password"],
            SecretKind::AdminUsername => &["primrose_admin_username", "admin_username"],
            SecretKind::AdminPassword => &["primrose_admin_password", "admin_password"],
        }
    }

    pub fn default_value(self) -> Option<&'static str> {
        match self {
            SecretKind::DbPassword => Some(""),
            _ => None,
        }
    }
}

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok())
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// Reads a secret file, trimming surrounding whitespace. Missing, unreadable
/// and blank files all count as absent.
pub fn read_secret_file(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        debug!(path = %path.display(), "secret file is blank, skipping");
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Layered secret lookup: configured value, environment, mounted files.
///
/// The first successful resolution for a name is pinned in an in-memory cache
/// for the lifetime of the resolver, so later calls return the same value and
/// provenance even if the environment or the files change underneath.
#[derive(Clone)]
pub struct SecretResolver {
    secrets_root: PathBuf,
    overrides: Arc<HashMap<SecretKind, String>>,
    env: EnvLookup,
    cache: Arc<DashMap<String, Secret>>,
}

impl SecretResolver {
    pub fn new(secrets_root: impl Into<PathBuf>) -> Self {
        Self {
            secrets_root: secrets_root.into(),
            overrides: Arc::new(HashMap::new()),
            env: process_env(),
            cache: Arc::new(DashMap::new()),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<SecretKind, String>) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    /// Replace the process environment with a custom lookup.
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn secrets_root(&self) -> &Path {
        &self.secrets_root
    }

    /// Generic resolution. Returns `None` when nothing non-blank was found.
    pub fn resolve(
        &self,
        name: &str,
        configured: Option<&str>,
        env_vars: &[&str],
        files: &[PathBuf],
    ) -> Option<Secret> {
        if let Some(hit) = self.cache.get(name) {
            return Some(hit.clone());
        }

        let found = non_blank(configured.map(str::to_string))
            .map(|v| (v, Provenance::Config))
            .or_else(|| {
                env_vars
                    .iter()
                    .find_map(|var| non_blank((self.env)(var)))
                    .map(|v| (v, Provenance::Env))
            })
            .or_else(|| {
                files
                    .iter()
                    .find_map(|p| read_secret_file(p))
                    .map(|v| (v, Provenance::File))
            });

        let (value, provenance) = found?;
        Some(self.pin(name, value, provenance))
    }

    /// Resolve one of the well-known secrets, applying its default last.
    pub fn resolve_kind(&self, kind: SecretKind) -> Option<Secret> {
        let files: Vec<PathBuf> = kind
            .file_names()
            .iter()
            .map(|f| self.secrets_root.join(f))
            .collect();
        let configured = self.overrides.get(&kind).map(String::as_str);
        let resolved = self.resolve(kind.name(), configured, kind.env_vars(), &files);
        match resolved {
            Some(s) => Some(s),
            None => kind
                .default_value()
                .map(|d| self.pin(kind.name(), d.to_string(), Provenance::Default)),
        }
    }

    /// Convenience returning only the value.
    pub fn value(&self, kind: SecretKind) -> Option<String> {
        self.resolve_kind(kind).map(|s| s.value)
    }

    // First writer wins when two threads race on the same name.
    fn pin(&self, name: &str, value: String, provenance: Provenance) -> Secret {
        let entry = self.cache.entry(name.to_string()).or_insert_with(|| {
            info!(secret = name, %provenance, "secret resolved");
            Secret { name: name.to_string(), value, provenance }
        });
        entry.value().clone()
    }
}
