use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use tracing::warn;

use crate::rate_limit::RateLimitConfig;
use crate::secrets::{SecretKind, DEFAULT_SECRETS_DIR};

pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: String,
    pub secrets_dir: PathBuf,
    /// Connection-string template, possibly carrying a `PasswordFile=` directive.
    pub database: Option<String>,
    pub token_validity: chrono::Duration,
    pub cors_origins: Vec<String>,
    pub internal_health_allow: Vec<IpAddr>,
    pub rate_limit: RateLimitConfig,
    /// Explicitly configured secret values; these win over env and files.
    pub secret_overrides: HashMap<SecretKind, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            secrets_dir: PathBuf::from(DEFAULT_SECRETS_DIR),
            database: None,
            token_validity: chrono::Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            internal_health_allow: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            secret_overrides: HashMap::new(),
        }
    }
}

fn csv(v: &str) -> impl Iterator<Item = &str> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a comma list of IP literals. Anything unparsable (including CIDR
/// ranges) is skipped with a warning.
pub fn parse_ip_list(v: &str) -> Vec<IpAddr> {
    csv(v)
        .filter_map(|s| match s.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(entry = s, "ignoring non-literal entry in internal health allow-list");
                None
            }
        })
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("PRIMROSE_BIND") { cfg.bind = v; }
        if let Ok(v) = std::env::var("PRIMROSE_SECRETS_DIR") { cfg.secrets_dir = PathBuf::from(v); }
        cfg.database = std::env::var("PRIMROSE_DATABASE").ok().filter(|v| !v.trim().is_empty());
        if let Some(h) = std::env::var("PRIMROSE_TOKEN_TTL_HOURS").ok().and_then(|v| v.parse::<i64>().ok()) {
            cfg.token_validity = chrono::Duration::hours(h);
        }
        if let Ok(v) = std::env::var("PRIMROSE_CORS_ORIGINS") {
            cfg.cors_origins = csv(&v).map(str::to_string).collect();
        }
        if let Ok(v) = std::env::var("PRIMROSE_INTERNAL_HEALTH_ALLOW") {
            cfg.internal_health_allow = parse_ip_list(&v);
        }
        cfg.rate_limit = RateLimitConfig::from_env();
        cfg
    }

    pub fn with_secret(mut self, kind: SecretKind, value: impl Into<String>) -> Self {
        self.secret_overrides.insert(kind, value.into());
        self
    }

    pub fn password_fallback(&self) -> PathBuf {
        self.secrets_dir.join("db_password")
    }
}
