use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

/// The first administrator ever created; it can never be deleted.
pub const PROTECTED_ADMIN_ID: Id = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Admin {
    pub id: Id,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    /// Comma-separated role list.
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAdmin {
    pub password_hash: Option<String>,
    pub role: Option<String>,
    /// Set together with `role`; derived from whether it contains Admin.
    pub is_admin: Option<bool>,
}

/// Administrator as returned over HTTP (no hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminView {
    pub id: Id,
    pub username: String,
    pub is_admin: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Admin> for AdminView {
    fn from(a: Admin) -> Self {
        Self {
            id: a.id,
            roles: crate::auth::split_roles(&a.role),
            username: a.username,
            is_admin: a.is_admin,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Page {
    pub id: Id,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPage {
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePage {
    pub id: Id,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAdminRequest {
    pub username: String,
    pub password: String,
    pub roles: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAdminRequest {
    pub password: Option<String>,
    pub roles: Option<String>,
}
