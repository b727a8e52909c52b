use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CredentialStore, NewUser, RotateOutcome, TokenRecord, User, UserUpdate};
use crate::auth::TokenType;
use crate::error::StoreError;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, BTreeSet<String>>,
    tokens: HashMap<Uuid, TokenRecord>,
}

impl State {
    fn revoke_device(&mut self, user_id: Uuid, device_code: Option<&str>) -> u64 {
        let mut changed = 0;
        for token in self.tokens.values_mut() {
            let same_device = device_code.map_or(true, |d| token.device_code == d);
            if token.user_id == user_id && same_device && !token.is_revoked {
                token.is_revoked = true;
                changed += 1;
            }
        }
        changed
    }

    fn check_insertable(&self, issued: &[TokenRecord]) -> Result<(), StoreError> {
        for token in issued {
            if self.tokens.contains_key(&token.token_id) {
                return Err(StoreError::UniqueViolation);
            }
            if !self.users.contains_key(&token.user_id) {
                return Err(StoreError::RecordNotFound);
            }
        }
        Ok(())
    }
}

/// Process-local store. All state sits behind one lock, which makes every
/// operation (including the compound ones) serializable.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: Mutex<State>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a role to a user. Role management has no engine operation; this
    /// exists for seeding.
    pub async fn grant_role(&self, user_id: Uuid, role: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::RecordNotFound);
        }
        state.roles.entry(user_id).or_default().insert(role.to_string());
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn add_user(&self, user: NewUser) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.login == user.login) {
            return Err(StoreError::UniqueViolation);
        }

        let user_id = Uuid::new_v4();
        state.users.insert(
            user_id,
            User {
                user_id,
                login: user.login,
                password_hash: user.password_hash,
                email: user.email,
            },
        );
        Ok(user_id)
    }

    async fn get_user_by_login(&self, login: &str) -> Result<User, StoreError> {
        let state = self.state.lock().await;
        state
            .users
            .values()
            .find(|u| u.login == login)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<User, StoreError> {
        let state = self.state.lock().await;
        state.users.get(&user_id).cloned().ok_or(StoreError::RecordNotFound)
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(login) = &update.login {
            if state.users.values().any(|u| &u.login == login && u.user_id != user_id) {
                return Err(StoreError::UniqueViolation);
            }
        }

        let user = state.users.get_mut(&user_id).ok_or(StoreError::RecordNotFound)?;
        if let Some(login) = update.login {
            user.login = login;
        }
        if let Some(password_hash) = update.password_hash {
            user.password_hash = password_hash;
        }
        if let Some(email) = update.email {
            user.email = Some(email);
        }
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let user = state.users.get_mut(&user_id).ok_or(StoreError::RecordNotFound)?;
        user.password_hash = password_hash.to_string();
        Ok(state.revoke_device(user_id, None))
    }

    async fn remove_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.users.remove(&user_id).ok_or(StoreError::RecordNotFound)?;
        state.roles.remove(&user_id);
        state.tokens.retain(|_, t| t.user_id != user_id);
        Ok(())
    }

    async fn get_roles_by_user_id(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .roles
            .get(&user_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_insertable(std::slice::from_ref(token))?;
        state.tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn get_token(&self, token_id: Uuid) -> Result<TokenRecord, StoreError> {
        let state = self.state.lock().await;
        state.tokens.get(&token_id).cloned().ok_or(StoreError::RecordNotFound)
    }

    async fn revoke_token(&self, token_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let token = state.tokens.get_mut(&token_id).ok_or(StoreError::RecordNotFound)?;
        token.is_revoked = true;
        Ok(())
    }

    async fn revoke_tokens_by_user_and_device(
        &self,
        user_id: Uuid,
        device_code: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.revoke_device(user_id, device_code))
    }

    async fn remove_tokens_by_user_and_device(
        &self,
        user_id: Uuid,
        device_code: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state
            .tokens
            .retain(|_, t| !(t.user_id == user_id && t.device_code == device_code));
        Ok((before - state.tokens.len()) as u64)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| !t.is_expired(now));
        Ok((before - state.tokens.len()) as u64)
    }

    async fn replace_session(
        &self,
        user_id: Uuid,
        device_code: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::RecordNotFound);
        }
        state.check_insertable(issued)?;

        state
            .tokens
            .retain(|_, t| !(t.user_id == user_id && t.device_code == device_code));
        for token in issued {
            state.tokens.insert(token.token_id, token.clone());
        }
        Ok(())
    }

    async fn rotate_session(
        &self,
        consumed: Uuid,
        issued: &[TokenRecord],
    ) -> Result<RotateOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let (user_id, device_code) = match state.tokens.get(&consumed) {
            Some(t) if !t.is_revoked && t.token_type == TokenType::Refresh => {
                (t.user_id, t.device_code.clone())
            }
            Some(_) => return Ok(RotateOutcome::AlreadyConsumed),
            None => return Ok(RotateOutcome::Missing),
        };
        state.check_insertable(issued)?;

        state.revoke_device(user_id, Some(&device_code));
        for token in issued {
            state.tokens.insert(token.token_id, token.clone());
        }
        Ok(RotateOutcome::Rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(login: &str) -> NewUser {
        NewUser {
            login: login.to_string(),
            password_hash: "hash".to_string(),
            email: None,
        }
    }

    fn record(user_id: Uuid, device: &str, token_type: TokenType, expires_at: DateTime<Utc>) -> TokenRecord {
        TokenRecord {
            token_id: Uuid::new_v4(),
            user_id,
            device_code: device.to_string(),
            token_type,
            expires_at,
            is_revoked: false,
        }
    }

    #[tokio::test]
    async fn duplicate_login_is_unique_violation() {
        let store = InMemoryCredentialStore::new();
        store.add_user(new_user("alice")).await.unwrap();

        assert_eq!(
            store.add_user(new_user("alice")).await,
            Err(StoreError::UniqueViolation)
        );
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();

        store
            .update_user(
                id,
                UserUpdate {
                    email: Some("a@example.com".to_string()),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap();

        let user = store.get_user(id).await.unwrap();
        assert_eq!(user.login, "alice");
        assert_eq!(user.password_hash, "hash");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        assert_eq!(
            store.update_user(Uuid::new_v4(), UserUpdate::default()).await,
            Err(StoreError::RecordNotFound)
        );
    }

    #[tokio::test]
    async fn remove_user_cascades_to_tokens() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let token = record(id, "d", TokenType::Access, Utc::now() + Duration::hours(1));
        store.add_token(&token).await.unwrap();

        store.remove_user(id).await.unwrap();

        assert_eq!(store.get_token(token.token_id).await, Err(StoreError::RecordNotFound));
        assert_eq!(store.remove_user(id).await, Err(StoreError::RecordNotFound));
    }

    #[tokio::test]
    async fn add_token_rejects_reused_id_and_unknown_owner() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let token = record(id, "d", TokenType::Access, Utc::now());
        store.add_token(&token).await.unwrap();

        assert_eq!(store.add_token(&token).await, Err(StoreError::UniqueViolation));
        assert_eq!(
            store
                .add_token(&record(Uuid::new_v4(), "d", TokenType::Access, Utc::now()))
                .await,
            Err(StoreError::RecordNotFound)
        );
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_scoped_to_device() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let later = Utc::now() + Duration::hours(1);
        let a = record(id, "a", TokenType::Access, later);
        let b = record(id, "b", TokenType::Access, later);
        store.add_token(&a).await.unwrap();
        store.add_token(&b).await.unwrap();

        assert_eq!(store.revoke_tokens_by_user_and_device(id, Some("a")).await, Ok(1));
        assert_eq!(store.revoke_tokens_by_user_and_device(id, Some("a")).await, Ok(0));
        assert!(!store.get_token(b.token_id).await.unwrap().is_revoked);

        store.revoke_token(a.token_id).await.unwrap();
        assert_eq!(store.revoke_token(Uuid::new_v4()).await, Err(StoreError::RecordNotFound));

        assert_eq!(store.revoke_tokens_by_user_and_device(id, None).await, Ok(1));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let now = Utc::now();
        let old = record(id, "d", TokenType::Access, now - Duration::seconds(1));
        let edge = record(id, "d", TokenType::Access, now);
        store.add_token(&old).await.unwrap();
        store.add_token(&edge).await.unwrap();

        assert_eq!(store.sweep_expired(now).await, Ok(1));
        assert!(store.get_token(edge.token_id).await.is_ok());
    }

    #[tokio::test]
    async fn rotate_consumes_only_once() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let later = Utc::now() + Duration::hours(1);
        let refresh = record(id, "d", TokenType::Refresh, later);
        store.add_token(&refresh).await.unwrap();

        let first = [record(id, "d", TokenType::Refresh, later)];
        let second = [record(id, "d", TokenType::Refresh, later)];

        assert_eq!(
            store.rotate_session(refresh.token_id, &first).await,
            Ok(RotateOutcome::Rotated)
        );
        assert_eq!(
            store.rotate_session(refresh.token_id, &second).await,
            Ok(RotateOutcome::AlreadyConsumed)
        );
        assert!(store.get_token(refresh.token_id).await.unwrap().is_revoked);
        assert!(!store.get_token(first[0].token_id).await.unwrap().is_revoked);
        assert_eq!(
            store.get_token(second[0].token_id).await,
            Err(StoreError::RecordNotFound)
        );
    }

    #[tokio::test]
    async fn rotate_reports_missing_token() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let later = Utc::now() + Duration::hours(1);
        let refresh = record(id, "d", TokenType::Refresh, later);
        store.add_token(&refresh).await.unwrap();
        store.remove_tokens_by_user_and_device(id, "d").await.unwrap();

        let issued = [record(id, "d", TokenType::Refresh, later)];
        assert_eq!(
            store.rotate_session(refresh.token_id, &issued).await,
            Ok(RotateOutcome::Missing)
        );
        assert_eq!(
            store.get_token(issued[0].token_id).await,
            Err(StoreError::RecordNotFound)
        );
    }

    #[tokio::test]
    async fn password_update_revokes_every_device() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        let other = store.add_user(new_user("bob")).await.unwrap();
        let later = Utc::now() + Duration::hours(1);
        let a = record(id, "a", TokenType::Access, later);
        let b = record(id, "b", TokenType::Refresh, later);
        let foreign = record(other, "a", TokenType::Access, later);
        for token in [&a, &b, &foreign] {
            store.add_token(token).await.unwrap();
        }

        assert_eq!(store.update_password(id, "new-hash").await, Ok(2));

        assert_eq!(store.get_user(id).await.unwrap().password_hash, "new-hash");
        assert!(store.get_token(a.token_id).await.unwrap().is_revoked);
        assert!(store.get_token(b.token_id).await.unwrap().is_revoked);
        assert!(!store.get_token(foreign.token_id).await.unwrap().is_revoked);
        assert_eq!(
            store.update_password(Uuid::new_v4(), "x").await,
            Err(StoreError::RecordNotFound)
        );
    }

    #[tokio::test]
    async fn roles_are_sorted_and_deduplicated() {
        let store = InMemoryCredentialStore::new();
        let id = store.add_user(new_user("alice")).await.unwrap();
        store.grant_role(id, "writer").await.unwrap();
        store.grant_role(id, "admin").await.unwrap();
        store.grant_role(id, "writer").await.unwrap();

        assert_eq!(
            store.get_roles_by_user_id(id).await.unwrap(),
            vec!["admin".to_string(), "writer".to_string()]
        );
    }
}
