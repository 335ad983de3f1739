use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    auth::{
        dto::{ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
        password,
    },
    error::AppError,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    }
    EMAIL_RE.is_match(email.trim())
}

fn name_ok(name: &str) -> bool {
    (2..=50).contains(&name.trim().chars().count())
}

fn password_errors(password: &str, confirm: &str, errors: &mut Vec<String>) {
    if !password::is_long_enough(password) {
        errors.push(format!(
            "Password must be at least {} characters",
            password::MIN_PASSWORD_LEN
        ));
    }
    if confirm.is_empty() {
        errors.push("Password confirmation is required".into());
    }
    if password != confirm {
        errors.push("Passwords do not match".into());
    }
}

fn finish(errors: Vec<String>) -> Result<(), AppError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

pub fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if !name_ok(&req.first_name) {
        errors.push("First name must be between 2 and 50 characters".into());
    }
    if !name_ok(&req.last_name) {
        errors.push("Last name must be between 2 and 50 characters".into());
    }
    if !is_valid_email(&req.email) {
        errors.push("Valid email is required".into());
    }
    password_errors(&req.password, &req.confirm_password, &mut errors);
    finish(errors)
}

pub fn validate_login(req: &LoginRequest) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if !is_valid_email(&req.email) {
        errors.push("Valid email is required".into());
    }
    if req.password.is_empty() {
        errors.push("Password is required".into());
    }
    finish(errors)
}

pub fn validate_password_reset(req: &ResetPasswordRequest) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if req.token.trim().is_empty() {
        errors.push("Reset token is required".into());
    }
    password_errors(&req.password, &req.confirm_password, &mut errors);
    finish(errors)
}

pub fn validate_password_change(req: &ChangePasswordRequest) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if req.current_password.is_empty() {
        errors.push("Current password is required".into());
    }
    password_errors(&req.password, &req.confirm_password, &mut errors);
    finish(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> RegisterRequest {
        RegisterRequest {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane@x.com".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        }
    }

    fn errors_of(result: Result<(), AppError>) -> Vec<String> {
        match result {
            Err(AppError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email(" a@example.com "));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
    }

    #[test]
    fn accepts_complete_registration() {
        assert!(validate_registration(&registration()).is_ok());
    }

    #[test]
    fn collects_every_registration_problem() {
        let errors = errors_of(validate_registration(&RegisterRequest::default()));
        assert!(errors.contains(&"First name must be between 2 and 50 characters".to_string()));
        assert!(errors.contains(&"Last name must be between 2 and 50 characters".to_string()));
        assert!(errors.contains(&"Valid email is required".to_string()));
        assert!(errors.contains(&"Password must be at least 6 characters".to_string()));
        assert!(errors.contains(&"Password confirmation is required".to_string()));
    }

    #[test]
    fn rejects_mismatched_confirmation() {
        let mut req = registration();
        req.confirm_password = "secret2".into();
        assert_eq!(
            errors_of(validate_registration(&req)),
            vec!["Passwords do not match".to_string()]
        );
    }

    #[test]
    fn login_requires_email_and_password() {
        let errors = errors_of(validate_login(&LoginRequest::default()));
        assert_eq!(errors.len(), 2);
        assert!(validate_login(&LoginRequest {
            email: "jane@x.com".into(),
            password: "whatever".into(),
        })
        .is_ok());
    }

    #[test]
    fn reset_requires_token() {
        let errors = errors_of(validate_password_reset(&ResetPasswordRequest {
            token: " ".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        }));
        assert_eq!(errors, vec!["Reset token is required".to_string()]);
    }

    #[test]
    fn password_change_requires_current_password() {
        let errors = errors_of(validate_password_change(&ChangePasswordRequest {
            current_password: String::new(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        }));
        assert_eq!(errors, vec!["Current password is required".to_string()]);
    }
}
