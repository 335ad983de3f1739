use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Which secret a rejected token was presented as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    fn rejection_message(self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "Invalid or expired verification token",
            TokenPurpose::PasswordReset => "Invalid or expired reset token",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("User with this email already exists")]
    DuplicateEmail,

    /// Covers both unknown email and wrong password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{}", .0.rejection_message())]
    InvalidOrExpiredToken(TokenPurpose),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Email verification required")]
    EmailNotVerified,

    #[error("Something went wrong")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::BadRequest(_)
            | AppError::DuplicateEmail
            | AppError::InvalidOrExpiredToken(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::EmailNotVerified => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(vec![rejection.body_text()])
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                json!({ "success": false, "message": self.to_string() })
            }
            AppError::Validation(errors) => json!({
                "success": false,
                "message": self.to_string(),
                "errors": errors,
            }),
            _ => json!({ "success": false, "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::Validation(vec![]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::DuplicateEmail.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::InvalidOrExpiredToken(TokenPurpose::PasswordReset).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("Invalid token").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::EmailNotVerified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_error_hides_cause() {
        let err = AppError::Internal(anyhow::anyhow!("connection refused at 10.0.0.3"));
        assert_eq!(err.to_string(), "Something went wrong");
    }

    #[test]
    fn token_messages_depend_on_purpose() {
        assert_eq!(
            AppError::InvalidOrExpiredToken(TokenPurpose::EmailVerification).to_string(),
            "Invalid or expired verification token"
        );
        assert_eq!(
            AppError::InvalidOrExpiredToken(TokenPurpose::PasswordReset).to_string(),
            "Invalid or expired reset token"
        );
    }
}
