//! Authentication: registration, login and session token validation

pub mod password;
pub mod token;

use chrono::{DateTime, NaiveDate, TimeDelta};
use derivative::Derivative;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::users::{self, Identifier, NewUser, User, UserId, UserStore};
use token::TokenService;

/// Authentication failure
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(&'static str),
    #[error("{} already exists", .0.map_or("account", Identifier::label))]
    Conflict(Option<Identifier>),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("User not found")]
    NotFound,
    #[error("Password hashing failed")]
    Hashing(#[from] password::Error),
    #[error("User store failed")]
    Store(#[source] users::Error),
    #[error("Session token signing failed")]
    Signing(#[source] token::Error),
}

/// Classification of authentication failures reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input
    Validation,
    /// Identifier already used by another user
    Conflict,
    /// Unknown account or wrong password
    InvalidCredentials,
    /// Token rejected for any reason
    InvalidToken,
    /// Referenced user doesn't exist
    NotFound,
    /// Failure on the service side
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::InvalidToken => ErrorKind::InvalidToken,
            Self::NotFound => ErrorKind::NotFound,
            Self::Hashing(_) | Self::Store(_) | Self::Signing(_) => ErrorKind::Internal,
        }
    }
}

impl From<token::Error> for Error {
    fn from(err: token::Error) -> Self {
        match err {
            token::Error::InvalidToken(err) => {
                debug!(%err, "Token rejected");
                Self::InvalidToken
            }
            err => Self::Signing(err),
        }
    }
}

impl From<users::Error> for Error {
    fn from(err: users::Error) -> Self {
        match err {
            users::Error::Conflict(identifier) => Self::Conflict(identifier),
            err => Self::Store(err),
        }
    }
}

/// New user registration data
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct RegisterRequest {
    pub fullname: String,
    #[derivative(Debug = "ignore")]
    pub password: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    /// Either a plain date or an RFC 3339 timestamp
    #[serde(default, deserialize_with = "RegisterRequest::deserialize_birthday")]
    pub birthday: Option<NaiveDate>,
}

impl RegisterRequest {
    fn deserialize_birthday<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(birthday) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };

        birthday
            .parse::<NaiveDate>()
            .or_else(|_| DateTime::parse_from_rfc3339(&birthday).map(|date| date.date_naive()))
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Treats empty identifiers as missing
fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

/// Authentication service
#[derive(Debug)]
pub struct AuthService<S = sqlx::SqlitePool> {
    /// Users credentials storage
    store: S,
    /// Session tokens issuer
    tokens: TokenService,
}

impl<S> AuthService<S>
where
    S: UserStore,
{
    pub fn new(store: S, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Lifetime of issued session tokens
    pub fn token_lifetime(&self) -> TimeDelta {
        self.tokens.expiration()
    }

    /// Registers a new user, returning the assigned id
    ///
    /// Every given identifier has to be unused - not only in its own field, but as any identifier
    /// of other users, so the account used for login is never ambiguous. Pre-checking identifiers
    /// is racy, concurrent registrations are settled by the store uniqueness constraints.
    #[instrument(skip_all)]
    pub async fn register(&self, req: RegisterRequest) -> Result<UserId, Error> {
        if req.fullname.is_empty() || req.password.is_empty() {
            return Err(Error::Validation("fullname and password are required"));
        }

        let email = present(req.email);
        let username = present(req.username);
        let phone_number = present(req.phone_number);

        let identifiers = [
            (Identifier::Email, &email),
            (Identifier::Username, &username),
            (Identifier::PhoneNumber, &phone_number),
        ];

        if identifiers.iter().all(|(_, value)| value.is_none()) {
            return Err(Error::Validation(
                "at least one of email, username, or phone number is required",
            ));
        }

        for (identifier, value) in identifiers {
            let Some(value) = value else {
                continue;
            };

            if self.store.exists(value).await? {
                debug!(%identifier, "Identifier already taken");
                return Err(Error::Conflict(Some(identifier)));
            }
        }

        let password_hash = password::hash(&req.password)?;
        let user_id = self
            .store
            .create(NewUser {
                fullname: req.fullname,
                email,
                username,
                phone_number,
                password_hash,
                birthday: req.birthday,
            })
            .await?;

        info!(%user_id, "User registered");
        Ok(user_id)
    }

    /// Authenticates user by any of their identifiers, returning a new session token
    ///
    /// Unknown account and wrong password are indistinguishable for the caller.
    #[instrument(skip_all)]
    pub async fn login(&self, account: &str, password: &str) -> Result<String, Error> {
        let user = match self.store.find_by_account(account).await {
            Ok(user) => user,
            Err(users::Error::NotFound) => {
                debug!("Unknown account");
                password::verify_decoy(password);
                return Err(Error::InvalidCredentials);
            }
            Err(err) => return Err(err.into()),
        };

        if !password::verify(&user.password_hash, password)? {
            debug!(user_id = %user.id, "Password mismatch");
            return Err(Error::InvalidCredentials);
        }

        // Login stays successful even if it cannot be recorded
        if let Err(err) = self.store.update_last_login(user.id).await {
            warn!(user_id = %user.id, %err, "Failed to update last login");
        }

        let token = self.tokens.issue(
            user.id,
            user.username.as_deref().unwrap_or_default(),
            user.email.as_deref().unwrap_or_default(),
        )?;

        info!(user_id = %user.id, "User logged in");
        Ok(token)
    }

    /// Validates session token, returning the authenticated user
    #[instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> Result<(UserId, User), Error> {
        if token.is_empty() {
            return Err(Error::Validation("token is required"));
        }

        let claims = self.tokens.verify(token)?;
        let user = match self.store.find_by_id(claims.user_id).await {
            Ok(user) => user,
            Err(users::Error::NotFound) => {
                debug!(user_id = %claims.user_id, "Token issued for missing user");
                return Err(Error::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        Ok((user.id, user))
    }

    /// Issues a fresh session token for the identity of a valid one
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, token: &str) -> Result<String, Error> {
        if token.is_empty() {
            return Err(Error::Validation("token is required"));
        }

        let token = self.tokens.refresh(token)?;
        Ok(token)
    }
}
