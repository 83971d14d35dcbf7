//! Service users storage

use chrono::{DateTime, NaiveDate, Utc};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("User not found")]
    NotFound,
    #[error("{} already taken", .0.map_or("account", Identifier::label))]
    Conflict(Option<Identifier>),
    #[error("Database failure")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(Identifier::from_violation(db_err.message()))
            }
            _ => Self::Database(err),
        }
    }
}

/// Newtype for user id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(i64);

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique user identifiers usable as a login account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifier {
    Email,
    Username,
    PhoneNumber,
}

impl Identifier {
    /// Human readable identifier name
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Username => "username",
            Self::PhoneNumber => "phone number",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Username => "username",
            Self::PhoneNumber => "phone_number",
        }
    }

    /// Figures out the violated column from the SQLite `UNIQUE constraint failed: users.<column>` message
    fn from_violation(message: &str) -> Option<Self> {
        [Self::PhoneNumber, Self::Username, Self::Email]
            .into_iter()
            .find(|id| message.ends_with(&format!("users.{}", id.column())))
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Stored user record
#[derive(Derivative, Clone, PartialEq, FromRow, Serialize)]
#[derivative(Debug)]
pub struct User {
    pub id: UserId,
    pub fullname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "id, fullname, email, username, phone_number, password_hash, birthday, \
                            last_login, created_at, updated_at";

impl User {
    /// Fetches user by id
    pub async fn fetch(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<Option<Self>, Error> {
        let user = sqlx::query_as(&format!("select {USER_COLUMNS} from users where id = ?"))
            .bind(user_id)
            .fetch_optional(db)
            .await?;

        Ok(user)
    }

    /// Fetches user whose email, username or phone number matches the account
    ///
    /// Should multiple users match, the oldest one is returned.
    pub async fn fetch_by_account(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        account: &str,
    ) -> Result<Option<Self>, Error> {
        let user = sqlx::query_as(&format!(
            "select {USER_COLUMNS} from users \
             where email = ?1 or username = ?1 or phone_number = ?1 \
             order by id limit 1"
        ))
        .bind(account)
        .fetch_optional(db)
        .await?;

        Ok(user)
    }

    /// Checks if any user is identified by the account
    pub async fn account_exists(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        account: &str,
    ) -> Result<bool, Error> {
        let (count,): (i64,) = sqlx::query_as(
            "select count(*) from users where email = ?1 or username = ?1 or phone_number = ?1",
        )
        .bind(account)
        .fetch_one(db)
        .await?;

        Ok(count > 0)
    }

    /// Sets the last login time to now
    pub async fn touch_login(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<(), Error> {
        let now = Utc::now();
        let update = sqlx::query("update users set last_login = ?, updated_at = ? where id = ?")
            .bind(now)
            .bind(now)
            .bind(user_id)
            .execute(db)
            .await?;

        if update.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }
}

/// User to be created
#[derive(Derivative, Clone, PartialEq)]
#[derivative(Debug)]
pub struct NewUser {
    pub fullname: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    #[derivative(Debug = "ignore")]
    pub password_hash: String,
    pub birthday: Option<NaiveDate>,
}

impl NewUser {
    /// Creates user in the database
    pub async fn create(
        self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    ) -> Result<UserId, Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "insert into users \
             (fullname, email, username, phone_number, password_hash, birthday, created_at, updated_at) \
             values (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.fullname)
        .bind(self.email)
        .bind(self.username)
        .bind(self.phone_number)
        .bind(self.password_hash)
        .bind(self.birthday)
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;

        Ok(UserId(result.last_insert_rowid()))
    }
}

/// Credentials storage used by the authentication service
#[allow(async_fn_in_trait)]
pub trait UserStore {
    /// Persists a new user. Fails with [`Error::Conflict`] if any identifier is already taken.
    async fn create(&self, user: NewUser) -> Result<UserId, Error>;
    /// Finds user by email, username or phone number
    async fn find_by_account(&self, account: &str) -> Result<User, Error>;
    /// Checks if the value is used as any user identifier
    async fn exists(&self, account: &str) -> Result<bool, Error>;
    async fn find_by_id(&self, user_id: UserId) -> Result<User, Error>;
    async fn update_last_login(&self, user_id: UserId) -> Result<(), Error>;
}

impl UserStore for sqlx::SqlitePool {
    async fn create(&self, user: NewUser) -> Result<UserId, Error> {
        user.create(self).await
    }

    async fn find_by_account(&self, account: &str) -> Result<User, Error> {
        User::fetch_by_account(self, account)
            .await?
            .ok_or(Error::NotFound)
    }

    async fn exists(&self, account: &str) -> Result<bool, Error> {
        User::account_exists(self, account).await
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<User, Error> {
        User::fetch(self, user_id).await?.ok_or(Error::NotFound)
    }

    async fn update_last_login(&self, user_id: UserId) -> Result<(), Error> {
        User::touch_login(self, user_id).await
    }
}
