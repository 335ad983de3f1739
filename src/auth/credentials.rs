use std::sync::Arc;

use anyhow::Context;
use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    auth::{
        password::{self, Argon2Hasher},
        repo::{RepoError, UserRepo},
        repo_types::{NewUser, User},
    },
    error::{AppError, TokenPurpose},
};

pub const EMAIL_VERIFICATION_TTL: Duration = Duration::hours(24);
pub const PASSWORD_RESET_TTL: Duration = Duration::hours(1);

const SECRET_TOKEN_BYTES: usize = 32;
const DUMMY_PASSWORD: &str = "authkeep-unknown-account";

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 32 random bytes, hex encoded.
fn generate_secret_token() -> String {
    let mut bytes = [0u8; SECRET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Owns user records and everything derived from a user's password:
/// hashing, verification, and the server-side verification/reset secrets.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn UserRepo>,
    hasher: Argon2Hasher,
    // Hash with the live cost params, verified against when no account matches.
    dummy_hash: Arc<OnceCell<String>>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn UserRepo>, hasher: Argon2Hasher) -> Self {
        Self {
            repo,
            hasher,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    async fn dummy_hash(&self) -> anyhow::Result<String> {
        self.dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await
            .cloned()
    }

    async fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let hasher = self.hasher.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .context("password hashing task")?
    }

    fn ensure_password_policy(plain: &str) -> Result<(), AppError> {
        if !password::is_long_enough(plain) {
            return Err(AppError::Validation(vec![format!(
                "Password must be at least {} characters",
                password::MIN_PASSWORD_LEN
            )]));
        }
        Ok(())
    }

    #[instrument(skip(self, first_name, last_name, password))]
    pub async fn create_user(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AppError> {
        Self::ensure_password_policy(password)?;
        let email = normalize_email(email);
        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateEmail);
        }

        let password_hash = self.hash(password).await?;
        let user = self
            .repo
            .insert(NewUser {
                first_name: first_name.trim().to_string(),
                last_name: last_name.trim().to_string(),
                email,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                RepoError::Duplicate => AppError::DuplicateEmail,
                RepoError::Other(e) => AppError::Internal(e),
            })?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    async fn verify_hash(&self, candidate: &str, hash: String) -> bool {
        let hasher = self.hasher.clone();
        let candidate = candidate.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&candidate, &hash))
            .await
            .unwrap_or(false)
    }

    pub async fn verify_password(&self, user: &User, candidate: &str) -> bool {
        self.verify_hash(candidate, user.password_hash.clone()).await
    }

    /// Returns the account only when the email exists and the password
    /// matches. An unknown email still costs one Argon2 verification, so
    /// timing does not reveal which check failed.
    #[instrument(skip(self, candidate))]
    pub async fn check_login(&self, email: &str, candidate: &str) -> anyhow::Result<Option<User>> {
        let user = self.find_by_email(email).await?;
        let hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash().await?,
        };
        let matched = self.verify_hash(candidate, hash).await;
        match user {
            Some(user) if matched => Ok(Some(user)),
            Some(user) => {
                debug!(user_id = %user.id, "password mismatch");
                Ok(None)
            }
            None => {
                debug!("no account for email");
                Ok(None)
            }
        }
    }

    pub async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.repo.find_by_email(&normalize_email(email)).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        self.repo.find_by_id(id).await
    }

    /// Replaces any outstanding verification token.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn issue_email_verification_token(&self, user: &User) -> anyhow::Result<String> {
        let token = generate_secret_token();
        let expires = OffsetDateTime::now_utc() + EMAIL_VERIFICATION_TTL;
        self.repo
            .set_email_verification_token(user.id, &token, expires)
            .await?;
        debug!(%expires, "email verification token issued");
        Ok(token)
    }

    /// Replaces any outstanding reset token.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn issue_password_reset_token(&self, user: &User) -> anyhow::Result<String> {
        let token = generate_secret_token();
        let expires = OffsetDateTime::now_utc() + PASSWORD_RESET_TTL;
        self.repo
            .set_password_reset_token(user.id, &token, expires)
            .await?;
        debug!(%expires, "password reset token issued");
        Ok(token)
    }

    #[instrument(skip_all)]
    pub async fn consume_email_verification_token(&self, token: &str) -> Result<User, AppError> {
        let user = self
            .repo
            .consume_email_verification_token(token, OffsetDateTime::now_utc())
            .await?
            .ok_or(AppError::InvalidOrExpiredToken(TokenPurpose::EmailVerification))?;
        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    #[instrument(skip_all)]
    pub async fn consume_password_reset_token(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<User, AppError> {
        Self::ensure_password_policy(new_password)?;
        let password_hash = self.hash(new_password).await?;
        let user = self
            .repo
            .consume_password_reset_token(token, OffsetDateTime::now_utc(), &password_hash)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken(TokenPurpose::PasswordReset))?;
        info!(user_id = %user.id, "password reset");
        Ok(user)
    }

    #[instrument(skip(self, user, new_password), fields(user_id = %user.id))]
    pub async fn change_password(&self, user: &User, new_password: &str) -> Result<(), AppError> {
        Self::ensure_password_policy(new_password)?;
        let password_hash = self.hash(new_password).await?;
        self.repo.update_password_hash(user.id, &password_hash).await?;
        info!("password changed");
        Ok(())
    }
}
