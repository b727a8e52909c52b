/// Account Routes
///
/// Everything here sits behind `JwtMiddleware`; the caller's claims are read
/// from the request extensions.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::AppError;
use crate::session::SessionEngine;
use crate::validators::parse_identifier;

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub new_password: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub login: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

/// GET /api/me
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let profile = engine.current_user(claims.sub).await?;

    Ok(HttpResponse::Ok().json(UserResponse {
        user_id: profile.user_id,
        login: profile.login,
        email: profile.email,
        roles: profile.roles,
    }))
}

/// POST /api/logout
///
/// Ends the session of the device the access token was issued to.
pub async fn logout(
    claims: web::ReqData<Claims>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    engine.logout(claims.sub, &claims.device).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// PUT /api/password
///
/// Every session of the user, this one included, ends.
pub async fn update_password(
    claims: web::ReqData<Claims>,
    form: web::Json<PasswordRequest>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    engine.update_password(claims.sub, &form.new_password).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /api/account
pub async fn delete_account(
    claims: web::ReqData<Claims>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    engine.unregister(claims.sub).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/tokens/{token_id}/revoke
///
/// Only the caller's own tokens can be revoked; any other id is reported as
/// not found.
pub async fn revoke_token(
    claims: web::ReqData<Claims>,
    path: web::Path<String>,
    engine: web::Data<SessionEngine>,
) -> Result<HttpResponse, AppError> {
    let token_id = parse_identifier(&path, "token_id")?;
    engine.revoke_owned_token(claims.sub, token_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
