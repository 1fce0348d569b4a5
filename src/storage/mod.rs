//! Storage abstraction layer
//!
//! Both backend adapters sit behind one capability set: insert, upsert,
//! delete, filtered similarity search, and exact lookup. An adapter is bound
//! to exactly one [`SchemaDescriptor`] and one collection/table; a single
//! instance may serve concurrent calls, and every call is dispatched
//! independently to the underlying engine.

pub mod tabular;
pub mod vector;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineResult;
use crate::filter::FilterSet;
use crate::schema::SchemaDescriptor;

pub use tabular::TabularStoreAdapter;
pub use vector::VectorStoreAdapter;

/// A stored record: field name to typed value
pub type Record = HashMap<String, Value>;

/// One result entry. `score` is the similarity rank on the vector path and
/// fixed at 1.0 on the exact-match path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f32,
}

/// Ordered sequence of scored records returned by a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub hits: Vec<ScoredRecord>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn truncate(&mut self, top_k: usize) {
        self.hits.truncate(top_k);
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.hits.iter().map(|hit| &hit.record)
    }
}

/// Collection/table statistics reported by an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub collection: String,
    pub schema: String,
    pub record_count: u64,
}

/// Uniform contract over vector and tabular storage engines
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn schema(&self) -> &SchemaDescriptor;

    fn collection(&self) -> &str;

    /// Insert new records. Every record is validated against the schema
    /// before any write is issued; a failing record aborts the whole batch
    /// with no partial insert.
    async fn insert(&self, records: Vec<Record>) -> EngineResult<usize>;

    /// Insert or replace records by primary key, with the same all-or-nothing
    /// validation as [`insert`](StorageBackend::insert).
    async fn upsert(&self, records: Vec<Record>) -> EngineResult<usize>;

    /// Delete records matching the filter set, returning how many were removed
    async fn delete(&self, filters: &FilterSet) -> EngineResult<usize>;

    /// Nearest-neighbor search restricted to records matching the filter set,
    /// ordered by similarity descending with ties broken by insertion order
    async fn filtered_search(
        &self,
        filters: &FilterSet,
        query_vector: &[f32],
        top_k: usize,
    ) -> EngineResult<QueryResult>;

    /// Exact/range matching with no similarity ranking; every hit scores 1.0
    /// and results are ordered by primary key ascending
    async fn exact_lookup(
        &self,
        filters: &FilterSet,
        limit: Option<usize>,
    ) -> EngineResult<QueryResult>;

    async fn stats(&self) -> EngineResult<BackendStats>;

    /// Release engine resources. Called by the factory at teardown.
    async fn close(&self) -> EngineResult<()>;
}
