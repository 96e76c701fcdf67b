//! SurrealDB connection management.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::{info, warn};

use crate::error::DbError;

/// Configuration for connecting to SurrealDB. Nested under `[db]` in
/// the server's TOML file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// WebSocket address, with or without a `ws://` scheme
    /// (e.g., `127.0.0.1:8000`).
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials.
    pub username: String,
    pub password: String,
    /// Connection attempts before giving up. The scheduler often starts
    /// before the database accepts connections.
    pub connect_attempts: u32,
    /// Pause between two connection attempts.
    pub connect_retry_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "tutorly".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
            connect_attempts: 10,
            connect_retry_ms: 500,
        }
    }
}

impl DbConfig {
    /// The address in the `host:port` form the WebSocket engine expects.
    pub fn endpoint(&self) -> &str {
        let url = self.url.trim();
        url.strip_prefix("ws://").unwrap_or(url).trim_end_matches('/')
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_retry_ms", &self.connect_retry_ms)
            .finish()
    }
}

/// Manages a connection to SurrealDB.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Connect, sign in as root and select the configured namespace and
    /// database. Failed attempts are retried up to
    /// `connect_attempts` times.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let attempts = config.connect_attempts.max(1);
        let pause = Duration::from_millis(config.connect_retry_ms);
        info!(
            endpoint = config.endpoint(),
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );

        let mut attempt = 1;
        loop {
            match Self::try_connect(config).await {
                Ok(db) => {
                    info!(attempt, "Connected to SurrealDB");
                    return Ok(Self { db });
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "SurrealDB not reachable, retrying");
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn try_connect(config: &DbConfig) -> Result<Surreal<Client>, surrealdb::Error> {
        let db = Surreal::new::<Ws>(config.endpoint()).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;
        Ok(db)
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_drops_scheme_and_trailing_slash() {
        let mut config = DbConfig {
            url: "ws://db.internal:8000/".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "db.internal:8000");

        config.url = "127.0.0.1:8000".into();
        assert_eq!(config.endpoint(), "127.0.0.1:8000");
    }

    #[test]
    fn partial_config_keeps_retry_defaults() {
        let config: DbConfig =
            serde_json::from_str(r#"{"url": "db:8000", "password": "s3cret"}"#).unwrap();
        assert_eq!(config.url, "db:8000");
        assert_eq!(config.namespace, "tutorly");
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.connect_retry_ms, 500);
    }

    #[test]
    fn debug_output_hides_the_password() {
        let config = DbConfig {
            password: "s3cret".into(),
            ..Default::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("tutorly"));
    }
}
