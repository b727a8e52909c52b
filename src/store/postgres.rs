use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CredentialStore, NewUser, RotateOutcome, TokenRecord, User, UserUpdate};
use crate::auth::TokenType;
use crate::error::StoreError;

type TokenRow = (Uuid, Uuid, String, String, DateTime<Utc>, bool);

fn token_from_row(row: TokenRow) -> Result<TokenRecord, StoreError> {
    let (token_id, user_id, device_code, token_type, expires_at, is_revoked) = row;
    let token_type = TokenType::parse(&token_type)
        .ok_or_else(|| StoreError::Database(format!("unknown token type {}", token_type)))?;

    Ok(TokenRecord {
        token_id,
        user_id,
        device_code,
        token_type,
        expires_at,
        is_revoked,
    })
}

async fn insert_tokens(
    transaction: &mut Transaction<'_, Postgres>,
    issued: &[TokenRecord],
) -> Result<(), StoreError> {
    for token in issued {
        sqlx::query(
            r#"
            INSERT INTO tokens (token_id, user_id, device_code, token_type, expires_at, is_revoked)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.device_code)
        .bind(token.token_type.as_str())
        .bind(token.expires_at)
        .bind(token.is_revoked)
        .execute(&mut *transaction)
        .await
        .map_err(foreign_key_as_not_found)?;
    }
    Ok(())
}

/// A token pointing at a missing user surfaces as `RecordNotFound`
fn foreign_key_as_not_found(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23503") {
            return StoreError::RecordNotFound;
        }
    }
    err.into()
}

/// Credential store backed by PostgreSQL
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn add_user(&self, user: NewUser) -> Result<Uuid, StoreError> {
        let user_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (user_id, login, password_hash, email, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(user_id)
    }

    async fn get_user_by_login(&self, login: &str) -> Result<User, StoreError> {
        let (user_id, login, password_hash, email) =
            sqlx::query_as::<_, (Uuid, String, String, Option<String>)>(
                "SELECT user_id, login, password_hash, email FROM users WHERE login = $1",
            )
            .bind(login)
            .fetch_one(&self.pool)
            .await?;

        Ok(User {
            user_id,
            login,
            password_hash,
            email,
        })
    }

    async fn get_user(&self, user_id: Uuid) -> Result<User, StoreError> {
        let (user_id, login, password_hash, email) =
            sqlx::query_as::<_, (Uuid, String, String, Option<String>)>(
                "SELECT user_id, login, password_hash, email FROM users WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(User {
            user_id,
            login,
            password_hash,
            email,
        })
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET login = COALESCE($2, login),
                password_hash = COALESCE($3, password_hash),
                email = COALESCE($4, email)
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&update.login)
        .bind(&update.password_hash)
        .bind(&update.email)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<u64, StoreError> {
        let mut transaction = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut transaction)
            .await?;

        if updated.rows_affected() == 0 {
            transaction.rollback().await?;
            return Err(StoreError::RecordNotFound);
        }

        let revoked = sqlx::query(
            "UPDATE tokens SET is_revoked = TRUE WHERE user_id = $1 AND NOT is_revoked",
        )
        .bind(user_id)
        .execute(&mut transaction)
        .await?;

        transaction.commit().await?;
        Ok(revoked.rows_affected())
    }

    async fn remove_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        // tokens and user_roles go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }

    async fn get_roles_by_user_id(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        let roles = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT DISTINCT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.role_id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles.into_iter().map(|(name,)| name).collect())
    }

    async fn add_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        let mut transaction = self.pool.begin().await?;
        insert_tokens(&mut transaction, std::slice::from_ref(token)).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn get_token(&self, token_id: Uuid) -> Result<TokenRecord, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token_id, user_id, device_code, token_type, expires_at, is_revoked
            FROM tokens
            WHERE token_id = $1
            "#,
        )
        .bind(token_id)
        .fetch_one(&self.pool)
        .await?;

        token_from_row(row)
    }

    async fn revoke_token(&self, token_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tokens SET is_revoked = TRUE WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }

    async fn revoke_tokens_by_user_and_device(
        &self,
        user_id: Uuid,
        device_code: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET is_revoked = TRUE
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR device_code = $2)
              AND NOT is_revoked
            "#,
        )
        .bind(user_id)
        .bind(device_code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn remove_tokens_by_user_and_device(
        &self,
        user_id: Uuid,
        device_code: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND device_code = $2")
            .bind(user_id)
            .bind(device_code)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn replace_session(
        &self,
        user_id: Uuid,
        device_code: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        let mut transaction = self.pool.begin().await?;

        // Serializes concurrent logins of the same user
        sqlx::query("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut transaction)
            .await?;

        sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND device_code = $2")
            .bind(user_id)
            .bind(device_code)
            .execute(&mut transaction)
            .await?;

        insert_tokens(&mut transaction, issued).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn rotate_session(
        &self,
        consumed: Uuid,
        issued: &[TokenRecord],
    ) -> Result<RotateOutcome, StoreError> {
        let mut transaction = self.pool.begin().await?;

        // Owner first, then token rows: the same lock order as replace_session
        let owner = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT u.user_id
            FROM users u
            JOIN tokens t ON t.user_id = u.user_id
            WHERE t.token_id = $1
            FOR UPDATE OF u
            "#,
        )
        .bind(consumed)
        .fetch_optional(&mut transaction)
        .await?;

        if owner.is_none() {
            transaction.rollback().await?;
            return Ok(RotateOutcome::Missing);
        }

        // Only one caller can flip a live refresh token; behind the owner lock
        // the second one sees is_revoked = TRUE and matches nothing.
        let claimed = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            UPDATE tokens
            SET is_revoked = TRUE
            WHERE token_id = $1 AND NOT is_revoked AND token_type = 'refresh'
            RETURNING user_id, device_code
            "#,
        )
        .bind(consumed)
        .fetch_optional(&mut transaction)
        .await?;

        let (user_id, device_code) = match claimed {
            Some(row) => row,
            None => {
                // The row may have been deleted while we waited for the lock
                let still_there = sqlx::query_as::<_, (Uuid,)>(
                    "SELECT token_id FROM tokens WHERE token_id = $1",
                )
                .bind(consumed)
                .fetch_optional(&mut transaction)
                .await?;
                transaction.rollback().await?;

                return Ok(match still_there {
                    Some(_) => RotateOutcome::AlreadyConsumed,
                    None => RotateOutcome::Missing,
                });
            }
        };

        sqlx::query(
            r#"
            UPDATE tokens
            SET is_revoked = TRUE
            WHERE user_id = $1 AND device_code = $2 AND NOT is_revoked
            "#,
        )
        .bind(user_id)
        .bind(&device_code)
        .execute(&mut transaction)
        .await?;

        insert_tokens(&mut transaction, issued).await?;
        transaction.commit().await?;
        Ok(RotateOutcome::Rotated)
    }
}
