//! Query planning and execution
//!
//! The planner is the top of the stack: it resolves the request's schema,
//! extracts filters from the raw text, merges in explicit filters, routes to
//! the vector or tabular engine, and executes with timeouts and an optional
//! retry pass for transient backend failures.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineResult, QueryError};
use crate::extract::FilterExtractor;
use crate::factory::{BackendFactory, BackendKind};
use crate::filter::FilterSet;
use crate::storage::{QueryResult, ScoredRecord};

/// One query against the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Raw user text; filters are extracted from it and the residue becomes
    /// the semantic search text
    pub raw_text: String,
    /// Caller-supplied filters; these override extracted clauses field by field
    pub explicit_filters: Option<FilterSet>,
    pub top_k: Option<usize>,
    /// Collection/table override; defaults come from configuration
    pub collection: Option<String>,
    /// Schema override; defaults to the configured schema type
    pub schema_type: Option<String>,
}

impl QueryRequest {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            ..Self::default()
        }
    }
}

/// Lifecycle stages a query moves through, logged at each transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Received,
    Extracting,
    Resolving,
    Executing,
    Merging,
    Completed,
    Failed,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryPhase::Received => "received",
            QueryPhase::Extracting => "extracting",
            QueryPhase::Resolving => "resolving",
            QueryPhase::Executing => "executing",
            QueryPhase::Merging => "merging",
            QueryPhase::Completed => "completed",
            QueryPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Resolved answer plus how it was produced
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub hits: Vec<ScoredRecord>,
    /// Effective filters after extraction and explicit overrides
    pub filters: FilterSet,
    /// Residual text that drove the similarity search; empty on the tabular route
    pub semantic_text: String,
    pub route: BackendKind,
    pub collection: String,
    pub schema: String,
}

/// Executes [`QueryRequest`]s against factory-managed backends
pub struct QueryPlanner {
    factory: Arc<BackendFactory>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: ServiceConfig,
}

impl QueryPlanner {
    pub fn new(
        factory: Arc<BackendFactory>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            factory,
            embedder,
            config,
        }
    }

    pub fn factory(&self) -> &Arc<BackendFactory> {
        &self.factory
    }

    /// Run one query end to end
    pub async fn execute(&self, request: QueryRequest) -> EngineResult<QueryResponse> {
        match self.run(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(phase = %QueryPhase::Failed, error = %err, "query failed");
                Err(err)
            }
        }
    }

    async fn run(&self, request: QueryRequest) -> EngineResult<QueryResponse> {
        let phase = QueryPhase::Received;
        debug!(%phase, text = %request.raw_text, "query accepted");

        let schema_type = request
            .schema_type
            .clone()
            .unwrap_or_else(|| self.config.schema_type.clone());
        let schema = self.factory.registry().get(&schema_type)?;

        let phase = QueryPhase::Extracting;
        debug!(%phase, schema = schema.name(), "extracting filters");
        let extraction = FilterExtractor::new(schema.clone()).extract(&request.raw_text);

        let filters = match &request.explicit_filters {
            Some(explicit) => {
                explicit.validate(&schema)?;
                extraction.filters.overridden_by(explicit)
            }
            None => extraction.filters,
        };
        let semantic_text = extraction.semantic_text;

        let phase = QueryPhase::Resolving;
        let route = if schema.vector_field().is_some() && !semantic_text.is_empty() {
            BackendKind::Vector
        } else {
            BackendKind::Tabular
        };
        debug!(%phase, %route, filters = filters.len(), semantic = %semantic_text, "route chosen");

        let mut params = match route {
            BackendKind::Vector => self.config.vector.clone(),
            BackendKind::Tabular => self.config.tabular.clone(),
        };
        if let Some(collection) = &request.collection {
            params = params.with_collection(collection.clone());
        }

        let handle = self
            .factory
            .create(route, &schema_type, &params, None)
            .await?;
        let top_k = request.top_k.unwrap_or(self.config.planner.default_top_k);

        let phase = QueryPhase::Executing;
        debug!(%phase, top_k, collection = %params.collection, "dispatching");
        let result = match self
            .dispatch(route, &handle.backend, &filters, &semantic_text, top_k)
            .await
        {
            Ok(result) => result,
            Err(err) if err.is_retryable() && self.config.planner.retry_attempts > 0 => {
                self.retry(route, &handle.backend, &filters, &semantic_text, top_k, err)
                    .await?
            }
            Err(err) => return Err(err),
        };

        let phase = QueryPhase::Merging;
        let mut result = result;
        result.truncate(top_k);
        debug!(%phase, hits = result.len(), "results assembled");

        info!(
            phase = %QueryPhase::Completed,
            %route,
            hits = result.len(),
            "query completed"
        );
        Ok(QueryResponse {
            hits: result.hits,
            filters,
            semantic_text,
            route,
            collection: params.collection,
            schema: schema.name().to_string(),
        })
    }

    async fn dispatch(
        &self,
        route: BackendKind,
        backend: &Arc<dyn crate::storage::StorageBackend>,
        filters: &FilterSet,
        semantic_text: &str,
        top_k: usize,
    ) -> EngineResult<QueryResult> {
        let storage_timeout = Duration::from_millis(self.config.planner.storage_timeout_ms);
        match route {
            BackendKind::Vector => {
                let query_vector = self.embed(semantic_text).await?;
                if let Some(dim) = backend.schema().vector_dim() {
                    if query_vector.len() != dim {
                        return Err(QueryError::UpstreamUnavailable {
                            message: format!(
                                "embedding dimension {} does not match schema dimension {}",
                                query_vector.len(),
                                dim
                            ),
                        });
                    }
                }
                timed(
                    storage_timeout,
                    "storage",
                    backend.filtered_search(filters, &query_vector, top_k),
                )
                .await
            }
            BackendKind::Tabular => {
                timed(
                    storage_timeout,
                    "storage",
                    backend.exact_lookup(filters, Some(top_k)),
                )
                .await
            }
        }
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let embed_timeout = Duration::from_millis(self.config.planner.embed_timeout_ms);
        timed(embed_timeout, "embedding", self.embedder.embed_query(text)).await
    }

    async fn retry(
        &self,
        route: BackendKind,
        backend: &Arc<dyn crate::storage::StorageBackend>,
        filters: &FilterSet,
        semantic_text: &str,
        top_k: usize,
        first: QueryError,
    ) -> EngineResult<QueryResult> {
        let mut last = first;
        for attempt in 1..=self.config.planner.retry_attempts {
            warn!(attempt, error = %last, "retrying after transient failure");
            match self
                .dispatch(route, backend, filters, semantic_text, top_k)
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() => last = err,
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }
}

/// Wrap a future in a deadline, mapping expiry to [`QueryError::UpstreamTimeout`]
async fn timed<T>(
    deadline: Duration,
    operation: &str,
    fut: impl std::future::Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(QueryError::UpstreamTimeout {
            operation: operation.to_string(),
            waited_ms: deadline.as_millis() as u64,
        }),
    }
}
