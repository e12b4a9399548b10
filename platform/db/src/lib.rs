//! Database primitives: settings, connection and the SeaORM-backed store.

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

mod store;

pub use store::SeaStore;

/// Shared connection pool alias.
pub type DbPool = DatabaseConnection;

/// A SQLite file in the working directory, created on first use.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://rbac.db?mode=rwc";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid value {value:?} for {key}")]
    InvalidSetting { key: &'static str, value: String },
    #[error("failed to connect to database")]
    Connect(#[source] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

/// Environment-driven connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    8
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Reads `DATABASE_URL` and `DATABASE_MAX_CONNECTIONS`.
    pub fn from_env() -> DbResult<Self> {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into());
        let mut settings = Self::new(url);
        if let Ok(raw) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            let parsed = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(DbError::InvalidSetting {
                    key: "DATABASE_MAX_CONNECTIONS",
                    value: raw.clone(),
                })?;
            settings.max_connections = Some(parsed);
        }
        Ok(settings)
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// Opens a pool for `settings`. In-memory SQLite is pinned to one connection
/// so every query sees the same database.
pub async fn connect(settings: &DatabaseSettings) -> DbResult<DbPool> {
    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .sqlx_logging(true);
    if settings.is_in_memory() {
        options.max_connections(1).min_connections(1);
    } else if let Some(max) = settings.max_connections {
        options.max_connections(max);
    }
    debug!(in_memory = settings.is_in_memory(), "connecting to database");
    Database::connect(options).await.map_err(DbError::Connect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_in_memory_sqlite() {
        assert!(DatabaseSettings::new("sqlite::memory:").is_in_memory());
        assert!(!DatabaseSettings::new(DEFAULT_DATABASE_URL).is_in_memory());
        assert!(!DatabaseSettings::new("postgres://localhost/rbac").is_in_memory());
    }
}
