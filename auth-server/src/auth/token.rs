//! Session tokens
//!
//! Session tokens are stateless JWTs signed with HMAC-SHA256. Nothing about issued tokens is
//! stored - a token is valid as long as its signature matches and the current time falls into
//! the `[nbf, exp)` window. Refreshing a token issues a new one with the same identity, the old
//! token stays valid until it expires.

use chrono::{DateTime, TimeDelta, Utc};
use derivative::Derivative;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::model::users::UserId;

/// Issuer of all the session tokens
pub const ISSUER: &str = "auth-service";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Session token secret key is not configured")]
    MissingSecret,
    #[error("Session token lifetime is out of range")]
    InvalidExpiration,
    #[error("Invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("Cannot sign session token")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Claims carried by the session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user
    pub user_id: UserId,
    /// User name, empty if user has none
    pub username: String,
    /// User email, empty if user has none
    pub email: String,
    /// Issuer
    pub iss: String,
    /// Subject, the user id
    pub sub: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Not valid before, seconds since the epoch
    pub nbf: i64,
    /// Expiration time, seconds since the epoch
    pub exp: i64,
}

/// Issues and verifies session tokens
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct TokenService {
    #[derivative(Debug = "ignore")]
    encoding: EncodingKey,
    #[derivative(Debug = "ignore")]
    decoding: DecodingKey,
    /// Validation rules for incoming tokens
    validation: Validation,
    /// Lifetime of issued tokens
    expiration: TimeDelta,
}

impl TokenService {
    /// Creates the service from configuration
    ///
    /// Fails if there is no secret configured - tokens must never be signed with a guessable key.
    pub fn new(config: &config::Token) -> Result<Self, Error> {
        let secret = config
            .secret_key
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or(Error::MissingSecret)?;

        // Expiration of every issued token has to stay representable
        let expiration = TimeDelta::try_hours(config.expiration_hours.into())
            .filter(|expiration| *expiration > TimeDelta::zero())
            .filter(|expiration| Utc::now().checked_add_signed(*expiration).is_some())
            .ok_or(Error::InvalidExpiration)?;

        // Only HS256 is accepted, whatever the token header claims
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiration,
        })
    }

    /// Lifetime of issued tokens
    pub fn expiration(&self) -> TimeDelta {
        self.expiration
    }

    /// Issues a new session token for the user
    pub fn issue(&self, user_id: UserId, username: &str, email: &str) -> Result<String, Error> {
        self.issue_at(user_id, username, email, Utc::now())
    }

    /// Verifies the token returning its claims
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(Error::InvalidToken)?
            .claims;

        // The token is no longer valid at the very second of its expiration
        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::InvalidToken(ErrorKind::ExpiredSignature.into()));
        }

        Ok(claims)
    }

    /// Issues a new token for the identity of a still valid token
    pub fn refresh(&self, token: &str) -> Result<String, Error> {
        let claims = self.verify(token)?;
        self.issue(claims.user_id, &claims.username, &claims.email)
    }

    /// Builds claims for a token issued at the given time
    fn claims_at(
        &self,
        user_id: UserId,
        username: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, Error> {
        let exp = now
            .checked_add_signed(self.expiration)
            .ok_or(Error::InvalidExpiration)?;

        Ok(Claims {
            user_id,
            username: username.to_owned(),
            email: email.to_owned(),
            iss: ISSUER.to_owned(),
            sub: user_id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
        })
    }

    fn issue_at(
        &self,
        user_id: UserId,
        username: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<String, Error> {
        let claims = self.claims_at(user_id, username, email, now)?;
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(Error::Signing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key";

    fn service() -> TokenService {
        TokenService::new(&config::Token {
            secret_key: Some(SECRET.to_owned()),
            expiration_hours: 24,
        })
        .unwrap()
    }

    fn user_id(id: i64) -> UserId {
        UserId::from(id)
    }

    #[test]
    fn missing_secret_fails() {
        let err = TokenService::new(&config::Token::default()).unwrap_err();
        assert!(matches!(err, Error::MissingSecret), "{err:?}");

        let err = TokenService::new(&config::Token {
            secret_key: Some(String::new()),
            expiration_hours: 24,
        })
        .unwrap_err();
        assert!(matches!(err, Error::MissingSecret), "{err:?}");
    }

    #[test]
    fn zero_expiration_fails() {
        let err = TokenService::new(&config::Token {
            secret_key: Some(SECRET.to_owned()),
            expiration_hours: 0,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidExpiration), "{err:?}");
    }

    #[test]
    fn unrepresentable_expiration_fails() {
        let err = TokenService::new(&config::Token {
            secret_key: Some(SECRET.to_owned()),
            expiration_hours: u32::MAX,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidExpiration), "{err:?}");
    }

    #[test]
    fn long_expiration_issues_tokens() {
        // Ten years
        let tokens = TokenService::new(&config::Token {
            secret_key: Some(SECRET.to_owned()),
            expiration_hours: 24 * 3653,
        })
        .unwrap();

        let token = tokens.issue(user_id(7), "alice", "a@x.com").unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, 24 * 3653 * 60 * 60);
    }

    #[test]
    fn default_expiration_is_a_day() {
        let tokens = TokenService::new(&config::Token {
            secret_key: Some(SECRET.to_owned()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(tokens.expiration(), TimeDelta::hours(24));
    }

    #[test]
    fn secret_hidden_from_debug() {
        let tokens = service();
        assert!(!format!("{tokens:?}").contains(SECRET));
    }

    #[test]
    fn verify_issued_token() {
        let tokens = service();

        let token = tokens.issue(user_id(7), "alice", "a@x.com").unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.user_id, user_id(7));
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);

        assert!((Utc::now().timestamp() - claims.iat).abs() <= 5);
    }

    #[test]
    fn missing_identifiers_are_empty() {
        let tokens = service();

        let token = tokens.issue(user_id(1), "", "").unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.username, "");
        assert_eq!(claims.email, "");
    }

    #[test]
    fn expired_token_fails() {
        let tokens = service();
        let issued_at = Utc::now() - TimeDelta::hours(25);

        let token = tokens
            .issue_at(user_id(7), "alice", "a@x.com", issued_at)
            .unwrap();

        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }

    #[test]
    fn token_expires_at_its_exact_expiration() {
        let tokens = service();
        let issued_at = Utc::now() - tokens.expiration();

        let token = tokens
            .issue_at(user_id(7), "alice", "a@x.com", issued_at)
            .unwrap();

        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }

    #[test]
    fn premature_token_fails() {
        let tokens = service();
        let issued_at = Utc::now() + TimeDelta::hours(1);

        let token = tokens
            .issue_at(user_id(7), "alice", "a@x.com", issued_at)
            .unwrap();

        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }

    #[test]
    fn foreign_secret_fails() {
        let tokens = service();
        let other = TokenService::new(&config::Token {
            secret_key: Some("other-secret".to_owned()),
            expiration_hours: 24,
        })
        .unwrap();

        let token = other.issue(user_id(7), "alice", "a@x.com").unwrap();
        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }

    #[test]
    fn other_algorithm_fails() {
        let tokens = service();
        let claims = tokens
            .claims_at(user_id(7), "alice", "a@x.com", Utc::now())
            .unwrap();

        // Same secret, different HMAC variant
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }

    #[test]
    fn foreign_issuer_fails() {
        let tokens = service();
        let claims = Claims {
            iss: "someone-else".to_owned(),
            ..tokens
                .claims_at(user_id(7), "alice", "a@x.com", Utc::now())
                .unwrap()
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = tokens.verify(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }

    #[test]
    fn malformed_token_fails() {
        let tokens = service();

        for token in ["", "fake_token", "a.b.c"] {
            let err = tokens.verify(token).unwrap_err();
            assert!(matches!(err, Error::InvalidToken(_)), "{token:?}: {err:?}");
        }

        let mut token = tokens.issue(user_id(7), "alice", "a@x.com").unwrap();
        token.push('x');
        let _ = tokens.verify(&token).unwrap_err();
    }

    #[test]
    fn refresh_preserves_identity() {
        let tokens = service();
        let issued_at = Utc::now() - TimeDelta::minutes(10);

        let token = tokens
            .issue_at(user_id(7), "alice", "a@x.com", issued_at)
            .unwrap();
        let old_claims = tokens.verify(&token).unwrap();

        let refreshed = tokens.refresh(&token).unwrap();
        assert_ne!(refreshed, token);

        let new_claims = tokens.verify(&refreshed).unwrap();
        assert_eq!(new_claims.user_id, old_claims.user_id);
        assert_eq!(new_claims.username, old_claims.username);
        assert_eq!(new_claims.email, old_claims.email);
        assert_eq!(new_claims.sub, old_claims.sub);
        assert!(new_claims.iat > old_claims.iat);
        assert!(new_claims.exp > old_claims.exp);

        // Refreshing doesn't revoke the previous token
        tokens.verify(&token).unwrap();
    }

    #[test]
    fn refresh_expired_fails() {
        let tokens = service();
        let issued_at = Utc::now() - TimeDelta::hours(25);

        let token = tokens
            .issue_at(user_id(7), "alice", "a@x.com", issued_at)
            .unwrap();

        let err = tokens.refresh(&token).unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err:?}");
    }
}
