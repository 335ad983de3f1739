use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::claims::Claims, config::JwtConfig};

/// Lifetime of every session token.
pub const SESSION_TTL: Duration = Duration::days(7);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
}

/// Identity carried by a valid session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: Uuid,
    pub email: String,
}

/// Signs and validates stateless session tokens (HS256).
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    pub fn issue_session_token(&self, user_id: Uuid, email: &str) -> anyhow::Result<String> {
        self.issue_at(user_id, email, OffsetDateTime::now_utc())
    }

    fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        issued_at: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let exp = issued_at + SESSION_TTL;
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iat: issued_at.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "session token signed");
        Ok(token)
    }

    /// Full claims of a valid token. The signature is checked before expiry,
    /// and expiry before the payload shape.
    pub fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;
        Ok(data.claims)
    }

    pub fn validate_session_token(&self, token: &str) -> Result<SessionIdentity, TokenError> {
        let claims = self.decode_claims(token)?;
        debug!(user_id = %claims.sub, "session token verified");
        Ok(SessionIdentity {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_keys() -> JwtKeys {
    make_keys("test-secret", "test-issuer", "test-aud")
}

#[cfg(test)]
fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
    JwtKeys::new(&JwtConfig {
        secret: secret.into(),
        issuer: issuer.into(),
        audience: audience.into(),
    })
}

#[cfg(test)]
impl JwtKeys {
    pub(crate) fn issue_backdated(
        &self,
        user_id: Uuid,
        email: &str,
        age: Duration,
    ) -> anyhow::Result<String> {
        self.issue_at(user_id, email, OffsetDateTime::now_utc() - age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_validate_session_token() {
        let keys = test_keys();
        let user_id = Uuid::new_v4();
        let token = keys
            .issue_session_token(user_id, "jane@x.com")
            .expect("sign session");
        let identity = keys.validate_session_token(&token).expect("verify token");
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.email, "jane@x.com");
    }

    #[test]
    fn session_lasts_seven_days() {
        let keys = test_keys();
        let before = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let token = keys.issue_session_token(Uuid::new_v4(), "a@b.co").unwrap();
        let claims = keys.decode_claims(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, SESSION_TTL.whole_seconds() as usize);
        assert!(claims.iat >= before);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let token = make_keys("other-secret", "test-issuer", "test-aud")
            .issue_session_token(Uuid::new_v4(), "a@b.co")
            .unwrap();
        let err = test_keys().validate_session_token(&token).unwrap_err();
        assert_eq!(err, TokenError::InvalidSignature);
    }

    #[test]
    fn rejects_expired_token() {
        let keys = test_keys();
        let token = keys
            .issue_backdated(Uuid::new_v4(), "a@b.co", SESSION_TTL + Duration::hours(1))
            .unwrap();
        assert_eq!(
            keys.validate_session_token(&token).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn bad_signature_wins_over_expiry() {
        let token = make_keys("other-secret", "test-issuer", "test-aud")
            .issue_backdated(Uuid::new_v4(), "a@b.co", SESSION_TTL + Duration::hours(1))
            .unwrap();
        assert_eq!(
            test_keys().validate_session_token(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn rejects_garbage_and_foreign_audience() {
        let keys = test_keys();
        assert_eq!(
            keys.validate_session_token("not.a.jwt").unwrap_err(),
            TokenError::Malformed
        );
        assert_eq!(
            keys.validate_session_token("").unwrap_err(),
            TokenError::Malformed
        );

        let foreign = make_keys("test-secret", "test-issuer", "someone-else")
            .issue_session_token(Uuid::new_v4(), "a@b.co")
            .unwrap();
        assert_eq!(
            keys.validate_session_token(&foreign).unwrap_err(),
            TokenError::Malformed
        );
    }
}
