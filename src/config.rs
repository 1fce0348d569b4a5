//! Configuration surface
//!
//! Plain key-value inputs resolved once at startup: defaults, then an
//! optional TOML file, then `DATAQUERY_`-prefixed environment overrides
//! (nested keys separated with `__`, e.g. `DATAQUERY_EMBEDDING__DIMENSION`).
//! Validation runs at load time; a bad configuration never reaches the
//! factory or planner.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, QueryError};

/// Connection parameters for one storage engine instance
///
/// Also serves as part of the factory's cache key, so identical parameters
/// resolve to the same backend handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    /// Database or namespace; the SQLite-backed tabular engine treats this
    /// as the database file path, with `:memory:` for an in-memory database
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Collection or table name the handle is bound to
    pub collection: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 19530,
            database: "default".to_string(),
            username: None,
            password: None,
            collection: "documents".to_string(),
        }
    }
}

impl ConnectionParams {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

/// Embedding endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    /// Fixed vector length the endpoint must return; also the dimensionality
    /// of the builtin schemas
    pub dimension: usize,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/embed".to_string(),
            dimension: 4096,
            timeout_ms: 30_000,
        }
    }
}

/// Planner execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub default_top_k: usize,
    pub embed_timeout_ms: u64,
    pub storage_timeout_ms: u64,
    /// Additional attempts for retryable backend failures; 0 means surface
    /// the first failure unchanged
    pub retry_attempts: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            embed_timeout_ms: 30_000,
            storage_timeout_ms: 30_000,
            retry_attempts: 0,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Schema used when a request does not name one
    #[serde(default = "default_schema_type")]
    pub schema_type: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: ConnectionParams,
    #[serde(default = "default_tabular_params")]
    pub tabular: ConnectionParams,
    #[serde(default)]
    pub planner: PlannerConfig,
}

fn default_schema_type() -> String {
    "document".to_string()
}

fn default_tabular_params() -> ConnectionParams {
    ConnectionParams {
        port: 3306,
        database: ":memory:".to_string(),
        ..ConnectionParams::default()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            embedding: EmbeddingConfig::default(),
            vector: ConnectionParams::default(),
            tabular: default_tabular_params(),
            planner: PlannerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from defaults, an optional file, and environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DATAQUERY").separator("__"),
        );

        let mut loaded: ServiceConfig = builder.build()?.try_deserialize()?;
        if loaded.schema_type.is_empty() {
            loaded.schema_type = default_schema_type();
        }
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.schema_type.trim().is_empty() {
            return Err(QueryError::Config(config::ConfigError::Message(
                "schema_type must not be empty".to_string(),
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(QueryError::Config(config::ConfigError::Message(
                "embedding.dimension must be greater than zero".to_string(),
            )));
        }
        if self.embedding.endpoint.trim().is_empty() {
            return Err(QueryError::Config(config::ConfigError::Message(
                "embedding.endpoint must not be empty".to_string(),
            )));
        }
        if self.planner.default_top_k == 0 {
            return Err(QueryError::Config(config::ConfigError::Message(
                "planner.default_top_k must be greater than zero".to_string(),
            )));
        }
        if self.planner.embed_timeout_ms == 0 || self.planner.storage_timeout_ms == 0 {
            return Err(QueryError::Config(config::ConfigError::Message(
                "planner timeouts must be greater than zero".to_string(),
            )));
        }
        Ok(())
    }
}
