//! dataquery: a query-resolution core over vector and tabular stores.
//!
//! A raw text query goes through deterministic, rule-based filter extraction
//! against a schema descriptor; extracted and explicit filters merge, the
//! planner routes to the right storage engine through a caching backend
//! factory, and results come back as scored records.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataquery::{
//!     BackendFactory, HashEmbedder, QueryPlanner, QueryRequest, SchemaRegistry, ServiceConfig,
//! };
//!
//! # async fn run() -> dataquery::EngineResult<()> {
//! let config = ServiceConfig::default();
//! let registry = Arc::new(SchemaRegistry::with_builtins(config.embedding.dimension)?);
//! let factory = Arc::new(BackendFactory::new(registry));
//! let embedder = Arc::new(HashEmbedder::new(config.embedding.dimension));
//! let planner = QueryPlanner::new(factory, embedder, config);
//!
//! let response = planner
//!     .execute(QueryRequest::new("revenue for company: Acme Corp in year: 2023"))
//!     .await?;
//! println!("{} hits via {}", response.hits.len(), response.route);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod factory;
pub mod filter;
pub mod planner;
pub mod schema;
pub mod storage;

pub use config::{ConnectionParams, EmbeddingConfig, PlannerConfig, ServiceConfig};
pub use embedding::{EmbeddingProvider, HashEmbedder, HttpEmbeddingClient};
pub use error::{EngineResult, QueryError};
pub use extract::{Extraction, FilterExtractor};
pub use factory::{BackendFactory, BackendHandle, BackendKind};
pub use filter::{Combine, FilterClause, FilterOp, FilterSet, FilterValue};
pub use planner::{QueryPlanner, QueryRequest, QueryResponse};
pub use schema::{
    FieldDescriptor, FieldType, SchemaDescriptor, SchemaRegistry, SimilarityMetric,
};
pub use storage::{
    BackendStats, QueryResult, Record, ScoredRecord, StorageBackend, TabularStoreAdapter,
    VectorStoreAdapter,
};
