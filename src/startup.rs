//! Boot sequence: resolve secrets, migrate, seed, then hand back the state
//! the HTTP layer serves from.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::connection::ConnectionStringBuilder;
use crate::error::StartupError;
use crate::otp::OtpVerifier;
use crate::password::DEFAULT_COST;
use crate::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use crate::repo::Repo;
use crate::routes::{AppState, AuthSettings};
use crate::secrets::{SecretKind, SecretResolver};
use crate::seed::{seed_admin, SeedOutcome};

/// Secrets needed before anything else can happen.
#[derive(Clone)]
pub struct ResolvedSecrets {
    pub jwt_secret: String,
    pub shared_secret: Option<String>,
    pub health_token: Option<String>,
}

pub fn resolver_for(cfg: &AppConfig) -> SecretResolver {
    SecretResolver::new(&cfg.secrets_dir).with_overrides(cfg.secret_overrides.clone())
}

/// The JWT secret is mandatory; the others degrade their feature.
pub fn resolve_secrets(resolver: &SecretResolver) -> Result<ResolvedSecrets, StartupError> {
    let jwt_secret = resolver.value(SecretKind::JwtSecret).ok_or_else(|| {
        StartupError::MissingJwtSecret(resolver.secrets_root().join("primrose_jwt").display().to_string())
    })?;
    let shared_secret = resolver.value(SecretKind::SharedSecret);
    let health_token = resolver.value(SecretKind::HealthToken);
    if health_token.is_none() {
        warn!("no health token configured; /health is open but rate limited");
    }
    Ok(ResolvedSecrets { jwt_secret, shared_secret, health_token })
}

pub fn database_connection_string(cfg: &AppConfig) -> String {
    ConnectionStringBuilder::new(&cfg.secrets_dir, cfg.password_fallback()).build(cfg.database.as_deref())
}

/// Options that only matter to tests and embedders.
#[derive(Clone)]
pub struct PrepareOptions {
    pub bcrypt_cost: u32,
    pub limiter: InMemoryRateLimiter,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self { bcrypt_cost: DEFAULT_COST, limiter: InMemoryRateLimiter::new() }
    }
}

/// Run the startup steps in order and build the serving state.
pub async fn prepare(
    cfg: &AppConfig,
    resolver: &SecretResolver,
    repo: Arc<dyn Repo>,
    opts: PrepareOptions,
) -> Result<AppState, StartupError> {
    let secrets = resolve_secrets(resolver)?;

    info!("applying database migrations (if any)");
    match repo.apply_migrations().await {
        Ok(()) => info!("database migrations applied"),
        Err(e) => warn!("database migration failed or skipped: {e}"),
    }

    let username = resolver.value(SecretKind::AdminUsername);
    let password = resolver.value(SecretKind::AdminPassword);
    let outcome = seed_admin(username.as_deref(), password.as_deref(), repo.as_ref(), opts.bcrypt_cost).await;
    if outcome == SeedOutcome::Failed {
        warn!("admin seeding failed; continuing startup");
    }

    Ok(AppState {
        repo,
        auth: AuthSettings {
            jwt_secret: secrets.jwt_secret,
            token_validity: cfg.token_validity,
            bcrypt_cost: opts.bcrypt_cost,
        },
        otp: Arc::new(OtpVerifier::from_base32(secrets.shared_secret.as_deref())),
        health_token: secrets.health_token,
        health_limiter: RateLimiterFacade::new(opts.limiter, cfg.rate_limit.clone()),
    })
}
