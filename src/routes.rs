use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{error, info, warn};

use crate::auth::{issue_token, roles, split_roles, Auth};
use crate::error::ApiError;
use crate::models::*;
use crate::otp::OtpVerifier;
use crate::password;
use crate::rate_limit::{client_key, RateLimiterFacade};
use crate::repo::Repo;
use crate::require_role;
use crate::security::{tokens_match, InternalAccess};

pub const APP_AUTH_HEADER: &str = "X-App-Auth";
pub const HEALTH_TOKEN_HEADER: &str = "X-Health-Token";

/// Everything administrator authentication needs.
#[derive(Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_validity: chrono::Duration,
    pub bcrypt_cost: u32,
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub auth: AuthSettings,
    pub otp: Arc<OtpVerifier>,
    /// When `None` the health endpoint is open (but still rate limited).
    pub health_token: Option<String>,
    pub health_limiter: RateLimiterFacade,
}

/// Routes with the internal health probe open to loopback only.
pub fn config(cfg: &mut web::ServiceConfig) {
    configure(cfg, InternalAccess::default());
}

pub fn configure(cfg: &mut web::ServiceConfig, internal: InternalAccess) {
    cfg.service(
        web::scope("/api")
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(
                web::resource("/pages")
                    .route(web::get().to(list_pages))
                    .route(web::post().to(create_page)),
            )
            .service(web::resource("/pages/admin").route(web::get().to(list_pages_admin)))
            .service(web::resource("/pages/{id}").route(web::put().to(update_page)))
            .service(
                web::resource("/admins")
                    .route(web::get().to(list_admins))
                    .route(web::post().to(create_admin)),
            )
            .service(
                web::resource("/admins/{id}")
                    .route(web::put().to(update_admin))
                    .route(web::delete().to(delete_admin)),
            ),
    );
    cfg.service(web::resource("/health").route(web::get().to(health)));
    cfg.service(
        web::resource("/health/internal")
            .wrap(internal)
            .route(web::get().to(health_internal)),
    );
}

async fn hash_off_thread(password: String, cost: u32) -> Result<String, ApiError> {
    web::block(move || password::hash_password_with_cost(&password, cost))
        .await
        .map_err(|e| {
            error!("hashing task failed: {e}");
            ApiError::Internal
        })?
        .map_err(|e| {
            error!("password hashing failed: {e}");
            ApiError::Internal
        })
}

fn grants_admin(role_csv: &str) -> bool {
    split_roles(role_csv).iter().any(|r| r == roles::ADMIN)
}

// ---------------- Administrator login -----------------------------

pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let LoginRequest { username, password } = payload.into_inner();
    if username.trim().is_empty() || password.trim().is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let admin = data.repo.find_admin_by_username(&username).await?;
    let stored_hash = admin.as_ref().map(|a| a.password_hash.clone());
    let ok = web::block(move || match stored_hash {
        Some(h) => password::verify_password(&password, &h),
        None => password::verify_against_dummy(&password),
    })
    .await
    .unwrap_or(false);

    let Some(admin) = admin.filter(|_| ok) else {
        info!("login rejected");
        return Err(ApiError::Unauthorized);
    };

    let token = issue_token(
        &admin.username,
        admin.is_admin,
        &admin.role,
        &data.auth.jwt_secret,
        data.auth.token_validity,
    )
    .map_err(|e| {
        error!("token issue failed: {e}");
        ApiError::Internal
    })?;
    info!(user = %admin.username, "admin logged in");
    Ok(HttpResponse::Ok().json(LoginResponse { token }))
}

// ---------------- Pages -------------------------------------------

/// Machine clients: requires a current one-time code in `X-App-Auth`.
pub async fn list_pages(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let code = req
        .headers()
        .get(APP_AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !data.otp.verify(code) {
        return Err(ApiError::Unauthorized);
    }
    let pages = data.repo.list_pages().await?;
    Ok(HttpResponse::Ok().json(pages))
}

pub async fn list_pages_admin(_auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let pages = data.repo.list_pages().await?;
    Ok(HttpResponse::Ok().json(pages))
}

pub async fn create_page(
    _auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPage>,
) -> Result<HttpResponse, ApiError> {
    let page = data.repo.create_page(payload.into_inner()).await?;
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("/api/pages/{}", page.id)))
        .json(page))
}

pub async fn update_page(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePage>,
) -> Result<HttpResponse, ApiError> {
    if payload.id != path.into_inner() {
        return Err(ApiError::BadRequest);
    }
    let page = data.repo.update_page(payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(page))
}

// ---------------- Administrator management (Admin role) ------------

pub async fn list_admins(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, roles::ADMIN);
    let admins: Vec<AdminView> = data.repo.list_admins().await?.into_iter().map(AdminView::from).collect();
    Ok(HttpResponse::Ok().json(admins))
}

pub async fn create_admin(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreateAdminRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, roles::ADMIN);
    let CreateAdminRequest { username, password, roles: role_list } = payload.into_inner();
    if username.trim().is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest);
    }
    let password_hash = hash_off_thread(password, data.auth.bcrypt_cost).await?;
    let role = role_list.unwrap_or_else(|| roles::ADMIN.to_string());
    let is_admin = grants_admin(&role);
    let admin = data
        .repo
        .insert_admin(NewAdmin {
            username: username.trim().to_string(),
            password_hash,
            is_admin,
            role,
            created_at: chrono::Utc::now(),
        })
        .await?;
    info!(by = %auth.0.sub, user = %admin.username, "admin created");
    Ok(HttpResponse::Created().json(AdminView::from(admin)))
}

pub async fn update_admin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateAdminRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, roles::ADMIN);
    let UpdateAdminRequest { password, roles: role } = payload.into_inner();
    let password_hash = match password.filter(|p| !p.is_empty()) {
        Some(p) => Some(hash_off_thread(p, data.auth.bcrypt_cost).await?),
        None => None,
    };
    let is_admin = role.as_deref().map(grants_admin);
    let admin = data
        .repo
        .update_admin(path.into_inner(), UpdateAdmin { password_hash, role, is_admin })
        .await?;
    Ok(HttpResponse::Ok().json(AdminView::from(admin)))
}

pub async fn delete_admin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, roles::ADMIN);
    let id = path.into_inner();
    data.repo.delete_admin(id).await?;
    info!(by = %auth.0.sub, id, "admin deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- Health ------------------------------------------

/// Token check (when configured) first, then per-client throttling.
pub async fn health(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    if let Some(expected) = data.health_token.as_deref() {
        let presented = req.headers().get(HEALTH_TOKEN_HEADER).and_then(|v| v.to_str().ok());
        if !presented.is_some_and(|p| tokens_match(p, expected)) {
            return Err(ApiError::Forbidden);
        }
    }

    let client = client_key(&req);
    if !data.health_limiter.admit(&client) {
        warn!(client = %client, "health probe throttled");
        return Err(ApiError::TooManyRequests {
            retry_after_secs: data.health_limiter.retry_after_secs(),
        });
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}

pub async fn health_internal() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}
