//! Persistent service state

use std::path::PathBuf;
use std::str::FromStr;

use color_eyre::Result;

pub mod users;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;

use crate::config;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid SQLite path: {path}")]
    InvalidSQLitePath { path: PathBuf },
}

/// Database backed model
#[derive(Clone)]
pub struct Model {
    /// Database access
    db: sqlx::SqlitePool,
}

impl Model {
    /// Model for testing purposes - using the in-memory SQLite database
    #[cfg(test)]
    pub async fn test() -> Result<Self> {
        Self::with_config(config::Database::Memory { max_connections: 1 }).await
    }

    /// Model from configuration
    ///
    /// If the database is created in-memory, the migrations are being executed automatically. If database is
    /// file based migrations would be executed only if requested by configuration.
    pub async fn with_config(config: config::Database) -> Result<Self> {
        use config::Database::*;

        let db = match config {
            Memory { max_connections } => {
                // Every parsed `:memory:` URL names a fresh database shared by the pool connections
                let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;

                // In-memory database lives as long as its connections do
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(opts)
                    .await?;

                sqlx::migrate!("model/migrations").run(&pool).await?;
                pool
            }

            SqLite {
                path,
                max_connections,
                migrate,
            } => {
                let path = path
                    .as_path()
                    .to_str()
                    .ok_or_else(|| Error::InvalidSQLitePath { path: path.clone() })?;

                let opts = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect_lazy_with(opts);

                if migrate {
                    sqlx::migrate!("model/migrations").run(&pool).await?;
                }

                pool
            }
        };

        Ok(Self { db })
    }

    /// Accesses the DB pool
    pub fn db(&self) -> &sqlx::SqlitePool {
        &self.db
    }
}
