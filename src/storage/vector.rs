//! Vector store adapter
//!
//! Schema-validated writes and filtered nearest-neighbor search over an
//! embedded vector collection. Records are kept in insertion order, which is
//! also the tie-break order for equal similarity scores.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineResult, QueryError};
use crate::filter::FilterSet;
use crate::schema::{FieldType, SchemaDescriptor, SimilarityMetric};
use crate::storage::{BackendStats, QueryResult, Record, ScoredRecord, StorageBackend};

struct StoredRow {
    key: Value,
    vector: Vec<f32>,
    /// Scalar fields only; the vector never leaves the adapter
    scalars: Record,
}

/// Adapter over a vector collection bound to one schema
pub struct VectorStoreAdapter {
    schema: Arc<SchemaDescriptor>,
    collection: String,
    rows: RwLock<Vec<StoredRow>>,
    next_id: AtomicU64,
}

impl VectorStoreAdapter {
    /// Fails with `SchemaViolation` when the schema declares no vector field.
    pub fn new(schema: Arc<SchemaDescriptor>, collection: impl Into<String>) -> EngineResult<Self> {
        if schema.vector_field().is_none() {
            return Err(QueryError::schema_violation(format!(
                "schema `{}` declares no vector field",
                schema.name()
            )));
        }
        Ok(Self {
            schema,
            collection: collection.into(),
            rows: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn vector_field_name(&self) -> &str {
        &self.schema.vector_field().expect("validated in new").name
    }

    fn metric(&self) -> SimilarityMetric {
        match self.schema.vector_field().expect("validated in new").field_type {
            FieldType::Vector { metric, .. } => metric,
            _ => unreachable!(),
        }
    }

    /// Validate a batch and split each record into key, vector, and scalars.
    /// Nothing is written unless every record passes.
    fn prepare(&self, records: Vec<Record>) -> EngineResult<Vec<StoredRow>> {
        let vector_name = self.vector_field_name().to_string();
        let pk = self.schema.primary_key().to_string();
        let pk_type = self.schema.field(&pk).expect("validated by builder").field_type.clone();

        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            self.schema.validate_record(&record)?;

            let vector_value = record.remove(&vector_name).ok_or_else(|| {
                QueryError::schema_violation(format!(
                    "record is missing vector field `{}`",
                    vector_name
                ))
            })?;
            let vector = as_vector(&vector_value);

            let key = match record.get(&pk) {
                Some(value) => value.clone(),
                None => {
                    let generated = match pk_type {
                        FieldType::Text => Value::String(Uuid::new_v4().to_string()),
                        _ => Value::from(self.next_id.fetch_add(1, AtomicOrdering::Relaxed)),
                    };
                    record.insert(pk.clone(), generated.clone());
                    generated
                }
            };
            if let Some(explicit) = key.as_u64() {
                self.next_id.fetch_max(explicit + 1, AtomicOrdering::Relaxed);
            }

            prepared.push(StoredRow { key, vector, scalars: record });
        }
        Ok(prepared)
    }

    /// Distinct values observed for a field, in first-seen order
    pub async fn unique_values(&self, field: &str) -> EngineResult<Vec<Value>> {
        if self.schema.field(field).is_none() {
            return Err(QueryError::InvalidFilterField { field: field.to_string() });
        }
        let rows = self.rows.read().await;
        let mut seen = Vec::new();
        for row in rows.iter() {
            if let Some(value) = row.scalars.get(field) {
                if !value.is_null() && !seen.contains(value) {
                    seen.push(value.clone());
                }
            }
        }
        Ok(seen)
    }
}

#[async_trait]
impl StorageBackend for VectorStoreAdapter {
    fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert(&self, records: Vec<Record>) -> EngineResult<usize> {
        let prepared = self.prepare(records)?;

        let mut rows = self.rows.write().await;
        for row in &prepared {
            if rows.iter().any(|existing| existing.key == row.key) {
                return Err(QueryError::schema_violation(format!(
                    "duplicate primary key {} in collection `{}`",
                    row.key, self.collection
                )));
            }
        }
        let inserted = prepared.len();
        rows.extend(prepared);
        info!(collection = %self.collection, inserted, "inserted records");
        Ok(inserted)
    }

    async fn upsert(&self, records: Vec<Record>) -> EngineResult<usize> {
        let prepared = self.prepare(records)?;

        let mut rows = self.rows.write().await;
        let count = prepared.len();
        for row in prepared {
            // Replacing in place keeps the original insertion order, which
            // similarity tie-breaking depends on
            match rows.iter_mut().find(|existing| existing.key == row.key) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
        }
        info!(collection = %self.collection, count, "upserted records");
        Ok(count)
    }

    async fn delete(&self, filters: &FilterSet) -> EngineResult<usize> {
        filters.validate(&self.schema)?;
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| !filters.matches(&row.scalars));
        let removed = before - rows.len();
        info!(collection = %self.collection, removed, "deleted records");
        Ok(removed)
    }

    async fn filtered_search(
        &self,
        filters: &FilterSet,
        query_vector: &[f32],
        top_k: usize,
    ) -> EngineResult<QueryResult> {
        filters.validate(&self.schema)?;

        let dim = self.schema.vector_dim().expect("validated in new");
        if query_vector.len() != dim {
            return Err(QueryError::schema_violation(format!(
                "query vector length {} does not match declared dimension {}",
                query_vector.len(),
                dim
            )));
        }

        let metric = self.metric();
        let rows = self.rows.read().await;
        let mut scored: Vec<ScoredRecord> = rows
            .iter()
            .filter(|row| filters.matches(&row.scalars))
            .map(|row| ScoredRecord {
                record: row.scalars.clone(),
                score: similarity(metric, query_vector, &row.vector),
            })
            .collect();

        // Stable sort: equal scores keep insertion order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        debug!(
            collection = %self.collection,
            hits = scored.len(),
            filtered = !filters.is_empty(),
            "similarity search completed"
        );
        Ok(QueryResult { hits: scored })
    }

    async fn exact_lookup(
        &self,
        filters: &FilterSet,
        limit: Option<usize>,
    ) -> EngineResult<QueryResult> {
        filters.validate(&self.schema)?;

        let rows = self.rows.read().await;
        let mut matched: Vec<(&Value, &Record)> = rows
            .iter()
            .filter(|row| filters.matches(&row.scalars))
            .map(|row| (&row.key, &row.scalars))
            .collect();
        matched.sort_by(|(a, _), (b, _)| value_cmp(a, b));

        let mut hits: Vec<ScoredRecord> = matched
            .into_iter()
            .map(|(_, scalars)| ScoredRecord { record: scalars.clone(), score: 1.0 })
            .collect();
        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        debug!(collection = %self.collection, hits = hits.len(), "exact lookup completed");
        Ok(QueryResult { hits })
    }

    async fn stats(&self) -> EngineResult<BackendStats> {
        let rows = self.rows.read().await;
        Ok(BackendStats {
            collection: self.collection.clone(),
            schema: self.schema.name().to_string(),
            record_count: rows.len() as u64,
        })
    }

    async fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}

fn as_vector(value: &Value) -> Vec<f32> {
    // validate_record already guaranteed a numeric array of the right length
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect()
        })
        .unwrap_or_default()
}

fn similarity(metric: SimilarityMetric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        SimilarityMetric::Dot => dot,
        SimilarityMetric::Cosine => {
            let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a * norm_b)
            }
        }
        SimilarityMetric::Euclidean => {
            let dist: f32 = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + dist)
        }
    }
}

/// Primary-key ordering: numbers before strings, each compared natively
fn value_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.as_str().unwrap_or("").cmp(b.as_str().unwrap_or("")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterClause;
    use crate::schema::annual_report_schema;
    use serde_json::json;

    fn adapter() -> VectorStoreAdapter {
        let schema = Arc::new(annual_report_schema(4).unwrap());
        VectorStoreAdapter::new(schema, "reports").unwrap()
    }

    fn report(company: &str, year: i64, content: &str, embedding: [f32; 4]) -> Record {
        serde_json::from_value(json!({
            "company": company,
            "year": year,
            "content": content,
            "embedding": embedding,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_search_finds_record() {
        let adapter = adapter();
        adapter
            .insert(vec![report("Acme Corp", 2023, "revenue grew", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();

        let filters =
            FilterSet::from_clauses(vec![FilterClause::eq("company", "Acme Corp")]);
        let result = adapter
            .filtered_search(&filters, &[1.0, 0.0, 0.0, 0.0], 10)
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert!(result.hits[0].score > 0.0);
        assert_eq!(
            result.hits[0].record.get("company"),
            Some(&Value::String("Acme Corp".into()))
        );
        // The vector never appears in results
        assert!(result.hits[0].record.get("embedding").is_none());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_write_performs_no_partial_insert() {
        let adapter = adapter();
        let good = report("Acme Corp", 2023, "ok", [1.0, 0.0, 0.0, 0.0]);
        let mut bad = report("Acme Corp", 2024, "bad", [1.0, 0.0, 0.0, 0.0]);
        bad.insert("embedding".into(), json!([1.0, 2.0]));

        let err = adapter.insert(vec![good, bad]).await.unwrap_err();
        assert!(matches!(err, QueryError::SchemaViolation { .. }));

        let stats = adapter.stats().await.unwrap();
        assert_eq!(stats.record_count, 0);
    }

    #[tokio::test]
    async fn test_missing_required_field_rejected() {
        let adapter = adapter();
        let mut record = report("Acme Corp", 2023, "x", [1.0, 0.0, 0.0, 0.0]);
        record.remove("content");
        assert!(adapter.insert(vec![record]).await.is_err());
    }

    #[tokio::test]
    async fn test_query_vector_dimension_checked() {
        let adapter = adapter();
        let err = adapter
            .filtered_search(&FilterSet::new(), &[1.0, 0.0], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_similarity_ordering_and_stable_ties() {
        let adapter = adapter();
        adapter
            .insert(vec![
                report("A", 2020, "far", [0.0, 1.0, 0.0, 0.0]),
                report("B", 2021, "tie-first", [1.0, 0.0, 0.0, 0.0]),
                report("C", 2022, "tie-second", [1.0, 0.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let result = adapter
            .filtered_search(&FilterSet::new(), &[1.0, 0.0, 0.0, 0.0], 10)
            .await
            .unwrap();

        let companies: Vec<&str> = result
            .records()
            .map(|r| r.get("company").unwrap().as_str().unwrap())
            .collect();
        // Equal scores keep insertion order; the orthogonal vector ranks last
        assert_eq!(companies, vec!["B", "C", "A"]);
    }

    #[tokio::test]
    async fn test_filtered_search_restricts_candidates() {
        let adapter = adapter();
        adapter
            .insert(vec![
                report("Acme Corp", 2022, "older", [1.0, 0.0, 0.0, 0.0]),
                report("Acme Corp", 2023, "newer", [1.0, 0.0, 0.0, 0.0]),
                report("Globex", 2023, "other", [1.0, 0.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let filters = FilterSet::from_clauses(vec![
            FilterClause::eq("company", "Acme Corp"),
            FilterClause::eq("year", 2023i64),
        ]);
        let result = adapter
            .filtered_search(&filters, &[1.0, 0.0, 0.0, 0.0], 10)
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(
            result.hits[0].record.get("content"),
            Some(&Value::String("newer".into()))
        );
    }

    #[tokio::test]
    async fn test_search_with_non_filterable_field_fails() {
        let adapter = adapter();
        let filters = FilterSet::from_clauses(vec![FilterClause::eq("content", "x")]);
        let err = adapter
            .filtered_search(&filters, &[0.0; 4], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidFilterField { .. }));
    }

    #[tokio::test]
    async fn test_exact_lookup_orders_by_primary_key() {
        let adapter = adapter();
        let mut first = report("B", 2021, "second", [0.0; 4]);
        first.insert("chunk_id".into(), json!(20));
        let mut second = report("A", 2020, "first", [0.0; 4]);
        second.insert("chunk_id".into(), json!(10));
        adapter.insert(vec![first, second]).await.unwrap();

        let result = adapter.exact_lookup(&FilterSet::new(), None).await.unwrap();
        let ids: Vec<i64> = result
            .records()
            .map(|r| r.get("chunk_id").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 20]);
        assert!(result.hits.iter().all(|hit| hit.score == 1.0));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_primary_key() {
        let adapter = adapter();
        let mut original = report("Acme Corp", 2023, "v1", [1.0, 0.0, 0.0, 0.0]);
        original.insert("chunk_id".into(), json!(7));
        adapter.insert(vec![original]).await.unwrap();

        let mut replacement = report("Acme Corp", 2023, "v2", [1.0, 0.0, 0.0, 0.0]);
        replacement.insert("chunk_id".into(), json!(7));
        adapter.upsert(vec![replacement]).await.unwrap();

        let result = adapter.exact_lookup(&FilterSet::new(), None).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            result.hits[0].record.get("content"),
            Some(&Value::String("v2".into()))
        );
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_primary_key() {
        let adapter = adapter();
        let mut a = report("A", 2020, "a", [0.0; 4]);
        a.insert("chunk_id".into(), json!(1));
        adapter.insert(vec![a.clone()]).await.unwrap();
        assert!(adapter.insert(vec![a]).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_by_filter() {
        let adapter = adapter();
        adapter
            .insert(vec![
                report("Acme Corp", 2022, "a", [0.0; 4]),
                report("Globex", 2023, "b", [0.0; 4]),
            ])
            .await
            .unwrap();

        let removed = adapter
            .delete(&FilterSet::from_clauses(vec![FilterClause::eq("company", "Globex")]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(adapter.stats().await.unwrap().record_count, 1);
    }

    #[tokio::test]
    async fn test_unique_values() {
        let adapter = adapter();
        adapter
            .insert(vec![
                report("Acme Corp", 2022, "a", [0.0; 4]),
                report("Acme Corp", 2023, "b", [0.0; 4]),
                report("Globex", 2023, "c", [0.0; 4]),
            ])
            .await
            .unwrap();

        let values = adapter.unique_values("company").await.unwrap();
        assert_eq!(values, vec![json!("Acme Corp"), json!("Globex")]);

        assert!(adapter.unique_values("bogus").await.is_err());
    }

    #[test]
    fn test_adapter_requires_vector_field() {
        let schema = crate::schema::SchemaDescriptor::builder("flat")
            .field(crate::schema::FieldDescriptor::integer("id"))
            .primary_key("id")
            .build()
            .unwrap();
        assert!(VectorStoreAdapter::new(Arc::new(schema), "flat").is_err());
    }

    #[test]
    fn test_similarity_metrics() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];

        assert!((similarity(SimilarityMetric::Cosine, &a, &b) - 1.0).abs() < 1e-6);
        assert!(similarity(SimilarityMetric::Cosine, &a, &c).abs() < 1e-6);
        assert!((similarity(SimilarityMetric::Dot, &a, &b) - 1.0).abs() < 1e-6);
        assert!(similarity(SimilarityMetric::Euclidean, &a, &b) > 0.99);
        assert!(similarity(SimilarityMetric::Euclidean, &a, &c) < 0.5);
    }
}
