//! Credential store
//!
//! The session engine's only persistence dependency. Every operation is atomic
//! on its own; `replace_session` and `rotate_session` additionally bundle the
//! multi-step writes of login and refresh into a single unit so that two
//! concurrent requests for the same device can never both win.

mod memory;
mod postgres;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::TokenType;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub password_hash: String,
    pub email: Option<String>,
}

/// Partial update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub login: Option<String>,
    pub password_hash: Option<String>,
    pub email: Option<String>,
}

/// A persisted, revocable grant. The signed string itself is not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub device_code: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.timestamp() < now.timestamp()
    }
}

/// Result of trying to consume a refresh token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented token was live and is now consumed; the new pair is stored
    Rotated,
    /// The token exists but was already revoked; nothing was written
    AlreadyConsumed,
    /// The token is gone, e.g. deleted by a re-login; nothing was written
    Missing,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with `UniqueViolation` if the login is taken
    async fn add_user(&self, user: NewUser) -> Result<Uuid, StoreError>;

    async fn get_user_by_login(&self, login: &str) -> Result<User, StoreError>;

    async fn get_user(&self, user_id: Uuid) -> Result<User, StoreError>;

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<(), StoreError>;

    /// Atomically set a new password hash and revoke every live record of
    /// the user. Returns the number of records revoked.
    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<u64, StoreError>;

    /// Deletes the user and every token record they own
    async fn remove_user(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Role names, ordered and de-duplicated
    async fn get_roles_by_user_id(&self, user_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Fails with `UniqueViolation` on a reused id and `RecordNotFound` if the
    /// owner does not exist
    async fn add_token(&self, token: &TokenRecord) -> Result<(), StoreError>;

    async fn get_token(&self, token_id: Uuid) -> Result<TokenRecord, StoreError>;

    /// Idempotent; only an unknown id is an error
    async fn revoke_token(&self, token_id: Uuid) -> Result<(), StoreError>;

    /// `None` means every device of the user. Returns the number of records
    /// that changed.
    async fn revoke_tokens_by_user_and_device(
        &self,
        user_id: Uuid,
        device_code: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn remove_tokens_by_user_and_device(
        &self,
        user_id: Uuid,
        device_code: &str,
    ) -> Result<u64, StoreError>;

    /// Deletes records with `expires_at < now`
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Atomically drop every record of `(user_id, device_code)` and insert
    /// `issued`.
    async fn replace_session(
        &self,
        user_id: Uuid,
        device_code: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError>;

    /// Atomically mark refresh token `consumed` revoked (only if it is still
    /// live), revoke the other live records of its device, and insert `issued`.
    /// Implementations lock the owning user before the token rows, the same
    /// order `replace_session` uses.
    async fn rotate_session(
        &self,
        consumed: Uuid,
        issued: &[TokenRecord],
    ) -> Result<RotateOutcome, StoreError>;
}
