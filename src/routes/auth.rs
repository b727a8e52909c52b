/// Authentication Routes
///
/// Public endpoints: registration, login, token refresh and the token
/// introspection calls used by other services.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ValidationError};
use crate::session::{RefreshCredential, SessionEngine, TokenPair};
use crate::validators::parse_identifier;

/// User registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
    pub email: Option<String>,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    pub device_code: String,
}

/// Token refresh request; exactly one of the fields is expected
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
    pub refresh_token_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CheckRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
}

/// Issued access and refresh tokens
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

impl From<TokenPair> for AuthResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            expires_in: (pair.access_expires_at - pair.issued_at).num_seconds(),
            refresh_expires_in: (pair.refresh_expires_at - pair.issued_at).num_seconds(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            refresh_token_id: pair.refresh_token_id,
            token_type: "Bearer".to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub user_id: Uuid,
    pub device_code: String,
    pub token_type: String,
    pub token_id: Uuid,
    pub roles: Vec<String>,
    pub expires_at: String,
}

#[derive(Serialize)]
pub struct RevokedResponse {
    pub revoked: bool,
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid login, password or email
/// - 409: login already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let user_id = engine
        .register(&form.login, &form.password, form.email.as_deref())
        .await?;

    Ok(HttpResponse::Created().json(RegisterResponse { user_id }))
}

/// POST /auth/login
///
/// Starts a new session for the device, ending any previous one.
///
/// # Errors
/// - 400: invalid login or device code
/// - 401: unknown login or wrong password (same response for both)
pub async fn login(
    form: web::Json<LoginRequest>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let pair = engine
        .login(&form.login, &form.password, &form.device_code)
        .await?;

    Ok(HttpResponse::Ok().json(AuthResponse::from(pair)))
}

/// POST /auth/refresh
///
/// Rotates the refresh token. Presenting a consumed refresh token revokes
/// the whole device session.
///
/// # Errors
/// - 400: neither `refresh_token` nor a valid `refresh_token_id` given
/// - 401: revoked, expired or malformed refresh token
/// - 404: unknown refresh token
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();
    let credential = match (form.refresh_token, form.refresh_token_id) {
        (Some(token), _) => RefreshCredential::Signed(token),
        (None, Some(id)) => RefreshCredential::TokenId(parse_identifier(&id, "refresh_token_id")?),
        (None, None) => {
            return Err(ValidationError::EmptyField("refresh_token").into());
        }
    };

    let pair = engine.refresh(credential).await?;

    Ok(HttpResponse::Ok().json(AuthResponse::from(pair)))
}

/// POST /auth/check
///
/// Full validation of a token: signature, validity window and store record.
pub async fn check_token(
    form: web::Json<CheckRequest>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let claims = engine.check_token(&form.token).await?;

    Ok(HttpResponse::Ok().json(CheckResponse {
        user_id: claims.sub,
        token_type: claims.token_type.to_string(),
        token_id: claims.jti,
        expires_at: claims.expires_at().to_rfc3339(),
        device_code: claims.device,
        roles: claims.roles,
    }))
}

/// GET /auth/tokens/{token_id}/revoked
pub async fn token_revoked(
    path: web::Path<String>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let token_id = parse_identifier(&path, "token_id")?;
    let revoked = engine.token_is_revoked(token_id).await?;

    Ok(HttpResponse::Ok().json(RevokedResponse { revoked }))
}
