use std::collections::HashMap;

use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("email already registered")]
    Duplicate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for user records.
///
/// Token consumption is a single conditional write: a token matching and
/// unexpired at `now` is cleared in the same step that applies its effect,
/// so two concurrent consumers cannot both succeed.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn insert(&self, new_user: NewUser) -> Result<User, RepoError>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    async fn set_email_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()>;
    async fn set_password_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// Marks the owner verified and clears the token. `None` if no live match.
    async fn consume_email_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
    /// Stores `password_hash` and clears the token. `None` if no live match.
    async fn consume_password_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, is_email_verified, \
     email_verification_token, email_verification_expires, \
     password_reset_token, password_reset_expires, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn insert(&self, new_user: NewUser) -> Result<User, RepoError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    RepoError::Duplicate
                }
                other => RepoError::Other(anyhow::Error::new(other).context("insert user")),
            })
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn set_email_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email_verification_token = $2, email_verification_expires = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires)
        .execute(&self.db)
        .await
        .context("store email verification token")?;
        Ok(())
    }

    async fn set_password_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $2, password_reset_expires = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires)
        .execute(&self.db)
        .await
        .context("store password reset token")?;
        Ok(())
    }

    async fn consume_email_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
            SET is_email_verified = TRUE,
                email_verification_token = NULL,
                email_verification_expires = NULL,
                updated_at = now()
            WHERE email_verification_token = $1 AND email_verification_expires > $2
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("consume email verification token")?;
        Ok(user)
    }

    async fn consume_password_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                password_reset_token = NULL,
                password_reset_expires = NULL,
                updated_at = now()
            WHERE password_reset_token = $1 AND password_reset_expires > $2
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .bind(now)
            .bind(password_hash)
            .fetch_optional(&self.db)
            .await
            .context("consume password reset token")?;
        Ok(user)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update password hash")?;
        Ok(())
    }
}

/// In-process store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn insert(&self, new_user: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(RepoError::Duplicate);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            is_email_verified: false,
            email_verification_token: None,
            email_verification_expires: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn set_email_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.email_verification_token = Some(token.to_string());
            user.email_verification_expires = Some(expires);
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn set_password_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.password_reset_token = Some(token.to_string());
            user.password_reset_expires = Some(expires);
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn consume_email_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().await;
        let Some(user) = users.values_mut().find(|u| {
            u.email_verification_token.as_deref() == Some(token)
                && u.email_verification_expires.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        user.is_email_verified = true;
        user.email_verification_token = None;
        user.email_verification_expires = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn consume_password_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().await;
        let Some(user) = users.values_mut().find(|u| {
            u.password_reset_token.as_deref() == Some(token)
                && u.password_reset_expires.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        user.password_hash = password_hash.to_string();
        user.password_reset_token = None;
        user.password_reset_expires = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: email.into(),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() {
        let repo = MemoryUserRepo::new();
        repo.insert(new_user("jane@x.com")).await.unwrap();
        let err = repo.insert(new_user("JANE@x.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::Duplicate));
    }

    #[tokio::test]
    async fn find_by_email_is_case_insensitive() {
        let repo = MemoryUserRepo::new();
        let user = repo.insert(new_user("jane@x.com")).await.unwrap();
        let found = repo.find_by_email("Jane@X.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.find_by_email("john@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consume_clears_token_and_expiry() {
        let repo = MemoryUserRepo::new();
        let user = repo.insert(new_user("jane@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        repo.set_email_verification_token(user.id, "tok", now + Duration::hours(1))
            .await
            .unwrap();

        let consumed = repo
            .consume_email_verification_token("tok", now)
            .await
            .unwrap()
            .unwrap();
        assert!(consumed.is_email_verified);
        assert!(consumed.email_verification_token.is_none());
        assert!(consumed.email_verification_expires.is_none());

        assert!(repo
            .consume_email_verification_token("tok", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn consume_ignores_expired_token() {
        let repo = MemoryUserRepo::new();
        let user = repo.insert(new_user("jane@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        repo.set_password_reset_token(user.id, "tok", now - Duration::seconds(1))
            .await
            .unwrap();

        let result = repo
            .consume_password_reset_token("tok", now, "new-hash")
            .await
            .unwrap();
        assert!(result.is_none());
        let stored = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash");
    }

    #[tokio::test]
    async fn concurrent_consumers_succeed_at_most_once() {
        let repo = Arc::new(MemoryUserRepo::new());
        let user = repo.insert(new_user("jane@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        repo.set_password_reset_token(user.id, "tok", now + Duration::hours(1))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    repo.consume_password_reset_token("tok", now, &format!("hash-{i}"))
                        .await
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
