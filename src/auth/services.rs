use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        credentials::{normalize_email, CredentialStore},
        dto::{
            ChangePasswordRequest, LoginData, LoginRequest, RegisterRequest, ResetPasswordRequest,
        },
        jwt::JwtKeys,
        repo_types::{PublicUser, User},
        validation::{
            validate_login, validate_password_change, validate_password_reset,
            validate_registration,
        },
    },
    error::AppError,
    mail::Notifier,
};

/// Composes the credential store, the session token issuer and the mail
/// notifier into the account flows.
#[derive(Clone)]
pub struct AuthService {
    credentials: CredentialStore,
    tokens: JwtKeys,
    notifier: Notifier,
}

impl AuthService {
    pub fn new(credentials: CredentialStore, tokens: JwtKeys, notifier: Notifier) -> Self {
        Self {
            credentials,
            tokens,
            notifier,
        }
    }

    #[instrument(skip_all)]
    pub async fn register(&self, req: RegisterRequest) -> Result<PublicUser, AppError> {
        validate_registration(&req)?;

        let user = self
            .credentials
            .create_user(&req.first_name, &req.last_name, &req.email, &req.password)
            .await?;

        match self.credentials.issue_email_verification_token(&user).await {
            Ok(token) => self.notifier.dispatch(
                "verification",
                self.notifier
                    .verification_email(&user.email, &user.first_name, &token),
            ),
            // The account is already stored, so registration still succeeds.
            Err(e) => error!(error = %e, user_id = %user.id, "issuing verification token failed"),
        }

        info!(user_id = %user.id, "user registered");
        Ok(PublicUser::from(&user))
    }

    #[instrument(skip_all)]
    pub async fn login(&self, req: LoginRequest) -> Result<LoginData, AppError> {
        validate_login(&req)?;

        let email = normalize_email(&req.email);
        let Some(user) = self.credentials.check_login(&email, &req.password).await? else {
            warn!("login rejected");
            return Err(AppError::InvalidCredentials);
        };

        let token = self.tokens.issue_session_token(user.id, &user.email)?;
        info!(user_id = %user.id, "user logged in");
        Ok(LoginData {
            user: PublicUser::from(&user),
            token,
        })
    }

    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<(), AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::BadRequest("Verification token is required"));
        }

        let user = self.credentials.consume_email_verification_token(token).await?;
        self.notifier.dispatch(
            "welcome",
            self.notifier.welcome_email(&user.email, &user.first_name),
        );
        Ok(())
    }

    /// Succeeds identically whether or not the account exists.
    #[instrument(skip_all)]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        if email.trim().is_empty() {
            return Err(AppError::BadRequest("Email is required"));
        }

        let user = match self.credentials.find_by_email(email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!("password reset requested for unknown email");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "password reset lookup failed");
                return Ok(());
            }
        };

        match self.credentials.issue_password_reset_token(&user).await {
            Ok(token) => self.notifier.dispatch(
                "password_reset",
                self.notifier
                    .password_reset_email(&user.email, &user.first_name, &token),
            ),
            Err(e) => error!(error = %e, user_id = %user.id, "issuing reset token failed"),
        }
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), AppError> {
        validate_password_reset(&req)?;
        self.credentials
            .consume_password_reset_token(req.token.trim(), &req.password)
            .await?;
        Ok(())
    }

    /// Authenticated password change; verification state is untouched.
    #[instrument(skip(self, req))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        req: ChangePasswordRequest,
    ) -> Result<(), AppError> {
        validate_password_change(&req)?;
        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Unauthorized("Invalid token"))?;
        if !self
            .credentials
            .verify_password(&user, &req.current_password)
            .await
        {
            warn!("password change with wrong current password");
            return Err(AppError::BadRequest("Current password is incorrect"));
        }
        self.credentials.change_password(&user, &req.password).await
    }

    /// Only a currently valid token can be refreshed, and only while its user
    /// still exists. The old token stays valid until it expires.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, token: &str) -> Result<String, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::BadRequest("Token is required"));
        }

        let identity = self.tokens.validate_session_token(token).map_err(|e| {
            warn!(error = %e, "refresh with invalid token");
            AppError::Unauthorized("Invalid token")
        })?;
        let user = self
            .credentials
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AppError::Unauthorized("Invalid token"))?;

        let token = self.tokens.issue_session_token(user.id, &user.email)?;
        info!(user_id = %user.id, "session token refreshed");
        Ok(token)
    }

    /// Resolves a bearer token to its current user record.
    pub async fn authenticate(&self, token: &str) -> Result<User, AppError> {
        let identity = self.tokens.validate_session_token(token).map_err(|e| {
            warn!(error = %e, "rejected session token");
            AppError::Unauthorized("Invalid token")
        })?;
        debug!(user_id = %identity.user_id, email = %identity.email, "session token accepted");
        self.credentials
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AppError::Unauthorized("Invalid token"))
    }
}
