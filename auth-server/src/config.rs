//! Service configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use derivative::Derivative;
use serde::{Deserialize, Deserializer};
use tracing::warn;
use tracing_subscriber::filter::Directive;

/// Environment variable overriding the token signing secret
pub const SECRET_KEY_ENV: &str = "JWT_SECRET_KEY";

/// Environment variable overriding the token lifetime in hours
pub const EXPIRATION_HOURS_ENV: &str = "JWT_EXPIRATION_HOURS";

/// Logging output format
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Compact
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Logging {
    /// Additional filtering directives
    #[serde(default, deserialize_with = "Logging::deserialize_filters")]
    pub filters: Vec<Directive>,

    /// Logging format
    #[serde(default)]
    pub format: LogFormat,
}

impl Logging {
    fn deserialize_filters<'de, D>(deserializer: D) -> Result<Vec<Directive>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dirs: Vec<String> = Deserialize::deserialize(deserializer)?;
        dirs.into_iter()
            .map(|dir| dir.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Database {
    /// In-memory database, migrated on startup. Data is lost on shutdown.
    Memory {
        #[serde(default = "Database::default_max_connections")]
        max_connections: u32,
    },
    /// File based SQLite database
    SqLite {
        path: PathBuf,
        #[serde(default = "Database::default_max_connections")]
        max_connections: u32,
        /// Run migrations on startup
        #[serde(default)]
        migrate: bool,
    },
}

impl Database {
    fn default_max_connections() -> u32 {
        1
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::Memory {
            max_connections: Self::default_max_connections(),
        }
    }
}

/// Session token configuration
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct Token {
    /// HMAC secret used to sign session tokens. Required for the service to start.
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    pub secret_key: Option<String>,

    /// Session token lifetime
    #[serde(default = "Token::default_expiration_hours")]
    pub expiration_hours: u32,
}

impl Token {
    fn default_expiration_hours() -> u32 {
        24
    }

    /// Applies overrides from the process environment
    pub fn with_env(self) -> Self {
        self.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Applies overrides from the given variable lookup
    ///
    /// A set secret always wins over the configured one. A lifetime which is not a valid number
    /// of hours is ignored, keeping the configured value.
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secret) = lookup(SECRET_KEY_ENV).filter(|secret| !secret.is_empty()) {
            self.secret_key = Some(secret);
        }

        if let Some(hours) = lookup(EXPIRATION_HOURS_ENV) {
            match hours.parse() {
                Ok(hours) => self.expiration_hours = hours,
                Err(err) => warn!(
                    value = %hours,
                    %err,
                    "Ignoring invalid {EXPIRATION_HOURS_ENV}"
                ),
            }
        }

        self
    }
}

impl Default for Token {
    fn default() -> Self {
        Self {
            secret_key: None,
            expiration_hours: Self::default_expiration_hours(),
        }
    }
}

/// Top level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address where to host the service
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,

    /// Service name reported by the health endpoint
    #[serde(default = "Config::default_app_name")]
    pub app_name: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: Logging,

    /// Users database
    #[serde(default)]
    pub db: Database,

    /// Session tokens
    #[serde(default)]
    pub token: Token,
}

impl Config {
    fn default_host() -> SocketAddr {
        ([127, 0, 0, 1], 8080).into()
    }

    fn default_app_name() -> String {
        "auth-service".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.host, Config::default_host());
        assert_eq!(config.app_name, "auth-service");
        assert!(config.logging.filters.is_empty());
        assert!(matches!(
            config.db,
            Database::Memory { max_connections: 1 }
        ));
        assert_eq!(config.token.secret_key, None);
        assert_eq!(config.token.expiration_hours, 24);
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            host = "0.0.0.0:9000"
            app_name = "accounts"

            [logging]
            format = "Pretty"
            filters = ["sqlx=warn", "auth_server=debug"]

            [db]
            type = "SqLite"
            path = "users.db"
            max_connections = 4
            migrate = true

            [token]
            secret_key = "top-secret"
            expiration_hours = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.host, ([0, 0, 0, 0], 9000).into());
        assert_eq!(config.app_name, "accounts");
        assert!(matches!(config.logging.format, LogFormat::Pretty));
        assert_eq!(config.logging.filters.len(), 2);
        let Database::SqLite {
            path,
            max_connections,
            migrate,
        } = config.db
        else {
            panic!("Expected SQLite database, got {:?}", config.db);
        };
        assert_eq!(path, PathBuf::from("users.db"));
        assert_eq!(max_connections, 4);
        assert!(migrate);
        assert_eq!(config.token.secret_key.as_deref(), Some("top-secret"));
        assert_eq!(config.token.expiration_hours, 2);
    }

    #[test]
    fn invalid_filter_directive_fails() {
        let _ = toml::from_str::<Config>(
            r#"
            [logging]
            filters = ["auth_server=loudest"]
            "#,
        )
        .unwrap_err();
    }

    #[test]
    fn secret_is_hidden_from_debug() {
        let token = Token {
            secret_key: Some("top-secret".to_owned()),
            expiration_hours: 1,
        };

        assert!(!format!("{token:?}").contains("top-secret"));
    }

    #[test]
    fn env_overrides_token_config() {
        let token = Token::default().with_env_lookup(|name| match name {
            SECRET_KEY_ENV => Some("from-env".to_owned()),
            EXPIRATION_HOURS_ENV => Some("48".to_owned()),
            _ => None,
        });

        assert_eq!(token.secret_key.as_deref(), Some("from-env"));
        assert_eq!(token.expiration_hours, 48);
    }

    #[test]
    fn missing_env_keeps_token_config() {
        let token = Token {
            secret_key: Some("from-file".to_owned()),
            expiration_hours: 3,
        }
        .with_env_lookup(|_| None);

        assert_eq!(token.secret_key.as_deref(), Some("from-file"));
        assert_eq!(token.expiration_hours, 3);
    }

    #[test]
    fn invalid_env_expiration_is_ignored() {
        let token = Token::default().with_env_lookup(|name| match name {
            EXPIRATION_HOURS_ENV => Some("a day".to_owned()),
            SECRET_KEY_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(token.secret_key, None);
        assert_eq!(token.expiration_hours, 24);
    }
}
