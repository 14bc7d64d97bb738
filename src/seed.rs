use chrono::Utc;
use tracing::{error, info, warn};

use crate::auth::roles;
use crate::models::NewAdmin;
use crate::password;
use crate::repo::{AdminRepo, RepoError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Inserted,
    AlreadyPresent,
    MissingCredentials,
    Failed,
}

/// Insert the bootstrap administrator unless one with that username exists.
/// Never fails startup: every problem is logged and reported as an outcome.
pub async fn seed_admin<R: AdminRepo + ?Sized>(
    username: Option<&str>,
    password: Option<&str>,
    repo: &R,
    bcrypt_cost: u32,
) -> SeedOutcome {
    let (Some(username), Some(password)) = (
        username.map(str::trim).filter(|u| !u.is_empty()),
        password.filter(|p| !p.trim().is_empty()),
    ) else {
        warn!("admin credentials not resolved (primrose_admin_username / primrose_admin_password); no admin seeded");
        return SeedOutcome::MissingCredentials;
    };

    match repo.any_admin_with_username(username).await {
        Ok(true) => {
            info!(user = username, "admin already exists, skipping seed");
            return SeedOutcome::AlreadyPresent;
        }
        Ok(false) => {}
        Err(e) => {
            error!("admin lookup failed during seed: {e}");
            return SeedOutcome::Failed;
        }
    }

    let hash = match password::hash_password_with_cost(password, bcrypt_cost) {
        Ok(h) => h,
        Err(e) => {
            error!("failed to hash seed admin password: {e}");
            return SeedOutcome::Failed;
        }
    };

    let new = NewAdmin {
        username: username.to_string(),
        password_hash: hash,
        is_admin: true,
        role: roles::ADMIN.to_string(),
        created_at: Utc::now(),
    };
    match repo.insert_admin(new).await {
        Ok(_) => {
            info!(user = username, "admin user seeded");
            SeedOutcome::Inserted
        }
        Err(RepoError::Conflict) => SeedOutcome::AlreadyPresent,
        Err(e) => {
            error!("failed to insert seed admin: {e}");
            SeedOutcome::Failed
        }
    }
}
