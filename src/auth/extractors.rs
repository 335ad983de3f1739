use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::{
    auth::{repo_types::PublicUser, services::AuthService},
    error::AppError,
};

/// Sanitized user resolved from `Authorization: Bearer <token>`.
pub struct AuthUser(pub PublicUser);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthService::from_ref(state);

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized("Access token required"))?;

        let user = auth.authenticate(token).await?;
        Ok(AuthUser(PublicUser::from(&user)))
    }
}

/// Like [`AuthUser`], but also requires a verified email address.
pub struct VerifiedUser(pub PublicUser);

#[async_trait]
impl<S> FromRequestParts<S> for VerifiedUser
where
    S: Send + Sync,
    AuthService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_email_verified {
            return Err(AppError::EmailNotVerified);
        }
        Ok(VerifiedUser(user))
    }
}
