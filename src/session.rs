/// Session Engine
///
/// Orchestrates register/login/refresh/logout/revoke/check against the
/// credential store and the token codec.
///
/// # Rotation
/// Every refresh token is single-use. Presenting one that was already
/// consumed is treated as a stolen-token signal: every live record of that
/// device is revoked and the caller gets `TokenRevoked`.
///
/// # Token records
/// Both tokens of a pair are persisted, so `check_token` can reject an access
/// token that is still inside its signed validity window but was revoked,
/// logged out, or superseded by a newer login on the same device.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::{Claims, MintedToken, PasswordHasher, SigningKey, TokenCodec, TokenType};
use crate::clock::Clock;
use crate::configuration::TokenSettings;
use crate::error::{AppError, AuthError, StoreError};
use crate::store::{CredentialStore, NewUser, RotateOutcome, TokenRecord};
use crate::validators::{
    is_valid_device_code, is_valid_email, is_valid_login, is_valid_password,
};

/// Signed access and refresh tokens issued together for one device
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub issued_at: DateTime<Utc>,
    pub access_token: String,
    pub access_token_id: Uuid,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
    pub refresh_expires_at: DateTime<Utc>,
}

/// What a caller may present to `refresh`
#[derive(Debug, Clone)]
pub enum RefreshCredential {
    TokenId(Uuid),
    Signed(String),
}

/// Public view of a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub login: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

pub struct SessionEngine {
    store: Arc<dyn CredentialStore>,
    codec: TokenCodec,
    hasher: PasswordHasher,
    clock: Arc<dyn Clock>,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        key: Arc<SigningKey>,
        hasher: PasswordHasher,
        clock: Arc<dyn Clock>,
        settings: &TokenSettings,
    ) -> Self {
        Self {
            store,
            codec: TokenCodec::new(key, settings, clock.clone()),
            hasher,
            clock,
            access_lifetime: Duration::seconds(settings.access_token_lifetime_secs),
            refresh_lifetime: Duration::seconds(settings.refresh_token_lifetime_secs),
        }
    }

    /// Create a user and return its id
    pub async fn register(
        &self,
        login: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<Uuid, AppError> {
        let login = is_valid_login(login)?;
        is_valid_password(password)?;
        let email = email.map(is_valid_email).transpose()?;

        let password_hash = self.hash_password(password).await?;
        let user_id = self
            .store
            .add_user(NewUser {
                login: login.clone(),
                password_hash,
                email,
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation => {
                    AppError::AlreadyExists("login is already registered".to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(user_id = %user_id, login = %login, "User registered");
        Ok(user_id)
    }

    /// Authenticate and start a fresh session on `device_code`, replacing any
    /// session that device already had.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        device_code: &str,
    ) -> Result<TokenPair, AppError> {
        let login = is_valid_login(login)?;
        is_valid_device_code(device_code)?;

        // Unknown login and wrong password must be indistinguishable
        let user = match self.store.get_user_by_login(&login).await {
            Ok(user) => user,
            Err(StoreError::RecordNotFound) => {
                tracing::warn!(login = %login, "Login failed");
                return Err(AuthError::InvalidCredentials.into());
            }
            Err(e) => return Err(e.into()),
        };

        if !self.verify_password(password, &user.password_hash).await? {
            tracing::warn!(login = %login, "Login failed");
            return Err(AuthError::InvalidCredentials.into());
        }

        let roles = self.store.get_roles_by_user_id(user.user_id).await?;
        let (pair, issued) = self.issue_pair(user.user_id, device_code, &roles)?;
        self.store
            .replace_session(user.user_id, device_code, &issued)
            .await?;

        tracing::info!(
            user_id = %user.user_id,
            device_code = %device_code,
            "User logged in"
        );
        Ok(pair)
    }

    /// Exchange a live refresh token for a new pair
    pub async fn refresh(&self, credential: RefreshCredential) -> Result<TokenPair, AppError> {
        let token_id = match credential {
            RefreshCredential::TokenId(token_id) => token_id,
            RefreshCredential::Signed(token) => {
                let claims = self.codec.verify(&token)?;
                if claims.token_type != TokenType::Refresh {
                    return Err(AuthError::InvalidTokenType.into());
                }
                claims.jti
            }
        };

        let record = match self.store.get_token(token_id).await {
            Ok(record) => record,
            Err(StoreError::RecordNotFound) => return Err(AuthError::TokenNotFound.into()),
            Err(e) => return Err(e.into()),
        };

        // Only a consumed refresh token is a replay; access ids are bearer
        // material seen on every request.
        if record.token_type != TokenType::Refresh {
            return Err(AuthError::InvalidTokenType.into());
        }
        if record.is_revoked {
            return Err(self.revoke_replayed_session(&record).await);
        }
        if record.is_expired(self.clock.now()) {
            return Err(AuthError::TokenExpired.into());
        }

        let roles = self.store.get_roles_by_user_id(record.user_id).await?;
        let (pair, issued) = self.issue_pair(record.user_id, &record.device_code, &roles)?;

        match self.store.rotate_session(record.token_id, &issued).await? {
            RotateOutcome::Rotated => {
                tracing::info!(
                    user_id = %record.user_id,
                    device_code = %record.device_code,
                    token_id = %record.token_id,
                    "Refresh token rotated"
                );
                Ok(pair)
            }
            // Lost the race to a concurrent refresh of the same token
            RotateOutcome::AlreadyConsumed => Err(self.revoke_replayed_session(&record).await),
            // Deleted by a re-login, logout or sweep since it was read
            RotateOutcome::Missing => Err(AuthError::TokenNotFound.into()),
        }
    }

    /// End the session of one device. Idempotent.
    pub async fn logout(&self, user_id: Uuid, device_code: &str) -> Result<(), AppError> {
        is_valid_device_code(device_code)?;

        let removed = self
            .store
            .remove_tokens_by_user_and_device(user_id, device_code)
            .await?;

        tracing::info!(
            user_id = %user_id,
            device_code = %device_code,
            removed = removed,
            "User logged out"
        );
        Ok(())
    }

    /// Change the password and end every session of the user
    pub async fn update_password(&self, user_id: Uuid, new_password: &str) -> Result<(), AppError> {
        is_valid_password(new_password)?;

        let password_hash = self.hash_password(new_password).await?;
        let revoked = self
            .store
            .update_password(user_id, &password_hash)
            .await
            .map_err(|e| not_found_as(e, "user"))?;

        tracing::info!(user_id = %user_id, revoked = revoked, "Password updated");
        Ok(())
    }

    pub async fn revoke_token(&self, token_id: Uuid) -> Result<(), AppError> {
        self.store
            .revoke_token(token_id)
            .await
            .map_err(|e| not_found_as(e, "token"))?;

        tracing::info!(token_id = %token_id, "Token revoked");
        Ok(())
    }

    /// Like `revoke_token`, but a token owned by someone else is reported as
    /// absent.
    pub async fn revoke_owned_token(&self, user_id: Uuid, token_id: Uuid) -> Result<(), AppError> {
        let record = self
            .store
            .get_token(token_id)
            .await
            .map_err(|e| not_found_as(e, "token"))?;

        if record.user_id != user_id {
            return Err(AppError::NotFound("token not found".to_string()));
        }

        self.revoke_token(token_id).await
    }

    /// Verify a signed token and confirm against the store that it is still
    /// live.
    pub async fn check_token(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.codec.verify(token)?;

        let record = match self.store.get_token(claims.jti).await {
            Ok(record) => record,
            Err(StoreError::RecordNotFound) => return Err(AuthError::TokenInvalid.into()),
            Err(e) => return Err(e.into()),
        };

        if record.user_id != claims.sub || record.token_type != claims.token_type {
            return Err(AuthError::TokenInvalid.into());
        }
        if record.is_revoked {
            tracing::warn!(
                user_id = %record.user_id,
                token_id = %record.token_id,
                "Revoked token presented"
            );
            return Err(AuthError::TokenRevoked.into());
        }
        if record.is_expired(self.clock.now()) {
            return Err(AuthError::TokenExpired.into());
        }

        Ok(claims)
    }

    /// Whether the record is revoked or past its expiry
    pub async fn token_is_revoked(&self, token_id: Uuid) -> Result<bool, AppError> {
        let record = self
            .store
            .get_token(token_id)
            .await
            .map_err(|e| not_found_as(e, "token"))?;

        Ok(record.is_revoked || record.is_expired(self.clock.now()))
    }

    /// Delete the user; their tokens go with them
    pub async fn unregister(&self, user_id: Uuid) -> Result<(), AppError> {
        self.store
            .remove_user(user_id)
            .await
            .map_err(|e| not_found_as(e, "user"))?;

        tracing::info!(user_id = %user_id, "User unregistered");
        Ok(())
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<UserProfile, AppError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(|e| not_found_as(e, "user"))?;
        let roles = self.store.get_roles_by_user_id(user_id).await?;

        Ok(UserProfile {
            user_id: user.user_id,
            login: user.login,
            email: user.email,
            roles,
        })
    }

    fn issue_pair(
        &self,
        user_id: Uuid,
        device_code: &str,
        roles: &[String],
    ) -> Result<(TokenPair, Vec<TokenRecord>), AppError> {
        let access = self.codec.mint(
            user_id,
            device_code,
            TokenType::Access,
            roles,
            self.access_lifetime,
        )?;
        let refresh = self.codec.mint(
            user_id,
            device_code,
            TokenType::Refresh,
            roles,
            self.refresh_lifetime,
        )?;

        let issued = vec![record_for(&access), record_for(&refresh)];
        let pair = TokenPair {
            issued_at: access.claims.issued_at(),
            access_token_id: access.token_id(),
            access_expires_at: access.claims.expires_at(),
            access_token: access.token,
            refresh_token_id: refresh.token_id(),
            refresh_expires_at: refresh.claims.expires_at(),
            refresh_token: refresh.token,
        };

        Ok((pair, issued))
    }

    /// Revoke every live record of the replayed token's device and return the
    /// error to surface.
    async fn revoke_replayed_session(&self, record: &TokenRecord) -> AppError {
        match self
            .store
            .revoke_tokens_by_user_and_device(record.user_id, Some(&record.device_code))
            .await
        {
            Ok(revoked) => {
                tracing::warn!(
                    user_id = %record.user_id,
                    device_code = %record.device_code,
                    token_id = %record.token_id,
                    revoked = revoked,
                    "Refresh token replay detected, device session revoked"
                );
                AuthError::TokenRevoked.into()
            }
            Err(e) => e.into(),
        }
    }

    async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash_password(&password))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify_password(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
    }
}

fn record_for(minted: &MintedToken) -> TokenRecord {
    TokenRecord {
        token_id: minted.claims.jti,
        user_id: minted.claims.sub,
        device_code: minted.claims.device.clone(),
        token_type: minted.claims.token_type,
        expires_at: minted.claims.expires_at(),
        is_revoked: false,
    }
}

fn not_found_as(err: StoreError, what: &str) -> AppError {
    match err {
        StoreError::RecordNotFound => AppError::NotFound(format!("{} not found", what)),
        other => other.into(),
    }
}
