use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::secrets::read_secret_file;

/// Well-known location of the database password when nothing else names one.
pub const DEFAULT_PASSWORD_FILE: &str = "/run/secrets/db_password";

static PASSWORD_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)PasswordFile=([^;]+)").expect("static regex"));
static PASSWORD_FILE_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)PasswordFile=[^;]+;?").expect("static regex"));

/// Turns a connection-string template into a usable connection string by
/// replacing a `PasswordFile=<path>` directive with a literal `Password=`.
#[derive(Debug, Clone)]
pub struct ConnectionStringBuilder {
    secrets_root: PathBuf,
    fallback: PathBuf,
}

impl ConnectionStringBuilder {
    pub fn new(secrets_root: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self { secrets_root: secrets_root.into(), fallback: fallback.into() }
    }

    pub fn build(&self, template: Option<&str>) -> String {
        let template = match template.filter(|t| !t.trim().is_empty()) {
            Some(t) => t,
            None => {
                let pwd = read_secret_file(&self.fallback).unwrap_or_default();
                info!("no connection string configured, using default template");
                return default_connection_string(&pwd);
            }
        };

        let Some(caps) = PASSWORD_FILE_RE.captures(template) else {
            return template.to_string();
        };
        let raw = caps[1].trim().trim_matches(|c| c == '"' || c == '\'');
        let path = self.locate(raw);

        let pwd = read_secret_file(&path).or_else(|| {
            warn!(path = %path.display(), "password file unreadable, trying fallback");
            read_secret_file(&self.fallback)
        });
        match pwd {
            Some(pwd) => substitute_password(template, &pwd),
            None => {
                warn!("no database password file found; leaving PasswordFile directive in place");
                template.to_string()
            }
        }
    }

    // Relative paths are tried under the secrets root first.
    fn locate(&self, raw: &str) -> PathBuf {
        let p = Path::new(raw);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        let under_root = self.secrets_root.join(p);
        if under_root.is_file() {
            under_root
        } else {
            p.to_path_buf()
        }
    }
}

pub fn default_connection_string(password: &str) -> String {
    format!("Server=db;Database=primrose;User=postgres;Password={password};")
}

fn substitute_password(template: &str, password: &str) -> String {
    let stripped = PASSWORD_FILE_SEGMENT_RE.replace_all(template, "");
    format!("{};Password={password};", stripped.trim_end_matches(';'))
}

/// Splits a `Key=Value;` connection string into trimmed pairs. Keys are
/// lower-cased, values are kept as written.
pub fn parse_segments(conn: &str) -> Vec<(String, String)> {
    conn.split(';')
        .filter_map(|seg| {
            let (k, v) = seg.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect()
}
