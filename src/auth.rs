use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use tracing::debug;

use crate::error::ApiError;
use crate::routes::AppState;

pub mod roles {
    pub const ADMIN: &str = "Admin";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    /// "true" / "false"
    pub is_admin: String,
    pub roles: Vec<String>,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("token expiry out of range")]
    Expiry,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Splits a stored comma-separated role list, dropping empty entries.
pub fn split_roles(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build an HS256 token for `subject`, valid for `validity` from now.
pub fn issue_token(
    subject: &str,
    is_admin: bool,
    roles_csv: &str,
    secret: &str,
    validity: Duration,
) -> Result<String, TokenError> {
    let now = Utc::now();
    let exp = now.checked_add_signed(validity).ok_or(TokenError::Expiry)?;
    let claims = Claims {
        sub: subject.to_string(),
        is_admin: is_admin.to_string(),
        roles: split_roles(roles_csv),
        iat: now.timestamp() as usize,
        exp: exp.timestamp() as usize,
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Validate signature and expiry. Issuer and audience are not checked.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(ApiError::Unauthorized));
        };
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthorized));
        };
        match decode_token(bearer.token(), &state.auth.jwt_secret) {
            Ok(claims) => ready(Ok(Auth(claims))),
            Err(e) => {
                debug!("rejected bearer token: {e}");
                ready(Err(ApiError::Unauthorized))
            }
        }
    }
}

/// Role guard for handlers returning `Result<_, ApiError>`.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:expr) => {
        if !$auth.0.has_role($role) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}
