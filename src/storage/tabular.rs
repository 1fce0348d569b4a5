//! Tabular store adapter
//!
//! Exact/range matching over a relational table via sqlx. The table is
//! bootstrapped from the schema descriptor at connect time; filters compile
//! to parameterized SQL, writes run inside a transaction, and lookups fetch
//! in pages ordered by primary key.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::config::ConnectionParams;
use crate::error::{EngineResult, QueryError};
use crate::filter::{Combine, FilterClause, FilterOp, FilterSet, FilterValue};
use crate::schema::{is_identifier, FieldType, SchemaDescriptor};
use crate::storage::{BackendStats, QueryResult, Record, ScoredRecord, StorageBackend};

/// Rows fetched per page during lookups
const PAGE_SIZE: usize = 256;

/// Owned SQL bind value
enum BindValue {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

/// Adapter over one relational table bound to one schema
pub struct TabularStoreAdapter {
    schema: Arc<SchemaDescriptor>,
    table: String,
    pool: SqlitePool,
    page_size: usize,
}

impl std::fmt::Debug for TabularStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularStoreAdapter")
            .field("schema", &self.schema.name())
            .field("table", &self.table)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl TabularStoreAdapter {
    /// Open (or create) the backing database and bootstrap the table from
    /// the schema descriptor. `params.database` is the database file path,
    /// with `:memory:` for an in-memory database.
    pub async fn connect(
        schema: Arc<SchemaDescriptor>,
        params: &ConnectionParams,
    ) -> EngineResult<Self> {
        let table = params.collection.clone();
        if !is_identifier(&table) {
            return Err(QueryError::schema_violation(format!(
                "table name `{}` is not a valid identifier",
                table
            )));
        }

        let in_memory = params.database == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&params.database)
                .create_if_missing(true)
        };

        // An in-memory database lives and dies with its connection, so the
        // pool must hold exactly one and never let it idle out
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(5);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| QueryError::backend_unavailable(format!("sqlite connect: {}", e)))?;

        let adapter = Self {
            schema,
            table,
            pool,
            page_size: PAGE_SIZE,
        };
        adapter.ensure_table().await?;
        info!(table = %adapter.table, schema = adapter.schema.name(), "tabular adapter ready");
        Ok(adapter)
    }

    async fn ensure_table(&self) -> EngineResult<()> {
        let mut columns = Vec::new();
        for field in self.schema.fields() {
            let sql_type = match field.field_type {
                FieldType::Integer | FieldType::Boolean => "INTEGER",
                FieldType::Float => "REAL",
                // Timestamps travel as RFC 3339 text; vectors as JSON text
                FieldType::Text | FieldType::Timestamp | FieldType::Vector { .. } => "TEXT",
            };
            let primary = if field.name == self.schema.primary_key() {
                " PRIMARY KEY"
            } else {
                ""
            };
            columns.push(format!("\"{}\" {}{}", field.name, sql_type, primary));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.table,
            columns.join(", ")
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| QueryError::backend_unavailable(format!("create table: {}", e)))?;
        Ok(())
    }

    /// Validate a batch and write it inside one transaction
    async fn write_all(&self, records: Vec<Record>, replace: bool) -> EngineResult<usize> {
        for record in &records {
            self.schema.validate_record(record)?;
        }

        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueryError::backend_unavailable(format!("begin: {}", e)))?;

        let count = records.len();
        for record in records {
            let mut columns = Vec::new();
            let mut binds = Vec::new();
            for field in self.schema.fields() {
                let Some(value) = record.get(&field.name) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                columns.push(format!("\"{}\"", field.name));
                binds.push(to_bind_value(&field.field_type, value)?);
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "{} INTO \"{}\" ({}) VALUES ({})",
                verb,
                self.table,
                columns.join(", "),
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for bind in binds {
                query = apply_bind(query, bind);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| QueryError::backend_unavailable(format!("write: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| QueryError::backend_unavailable(format!("commit: {}", e)))?;
        info!(table = %self.table, count, replace, "wrote records");
        Ok(count)
    }

    fn where_fragment(&self, filters: &FilterSet) -> (Option<String>, Vec<BindValue>) {
        if filters.is_empty() {
            return (None, Vec::new());
        }
        let mut parts = Vec::new();
        let mut binds = Vec::new();
        for clause in filters.clauses() {
            parts.push(clause_sql(clause, &mut binds));
        }
        let joiner = match filters.combine() {
            Combine::All => " AND ",
            Combine::Any => " OR ",
        };
        (Some(parts.join(joiner)), binds)
    }

    fn row_to_record(&self, row: &SqliteRow) -> EngineResult<Record> {
        let mut record = Record::new();
        for field in self.schema.scalar_fields() {
            let name = field.name.as_str();
            let value = match field.field_type {
                FieldType::Integer => row
                    .try_get::<Option<i64>, _>(name)
                    .map(|v| v.map(Value::from)),
                FieldType::Float => row
                    .try_get::<Option<f64>, _>(name)
                    .map(|v| v.map(Value::from)),
                FieldType::Boolean => row
                    .try_get::<Option<bool>, _>(name)
                    .map(|v| v.map(Value::from)),
                FieldType::Text | FieldType::Timestamp => row
                    .try_get::<Option<String>, _>(name)
                    .map(|v| v.map(Value::from)),
                FieldType::Vector { .. } => unreachable!("scalar_fields excludes vectors"),
            }
            .map_err(|e| QueryError::backend_unavailable(format!("decode `{}`: {}", name, e)))?;

            if let Some(value) = value {
                record.insert(field.name.clone(), value);
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl StorageBackend for TabularStoreAdapter {
    fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    fn collection(&self) -> &str {
        &self.table
    }

    async fn insert(&self, records: Vec<Record>) -> EngineResult<usize> {
        self.write_all(records, false).await
    }

    async fn upsert(&self, records: Vec<Record>) -> EngineResult<usize> {
        self.write_all(records, true).await
    }

    async fn delete(&self, filters: &FilterSet) -> EngineResult<usize> {
        filters.validate(&self.schema)?;

        let (fragment, binds) = self.where_fragment(filters);
        let sql = match &fragment {
            Some(where_sql) => format!("DELETE FROM \"{}\" WHERE {}", self.table, where_sql),
            None => format!("DELETE FROM \"{}\"", self.table),
        };

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = apply_bind(query, bind);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| QueryError::backend_unavailable(format!("delete: {}", e)))?;

        let removed = result.rows_affected() as usize;
        info!(table = %self.table, removed, "deleted records");
        Ok(removed)
    }

    /// Similarity ranking is not available on the tabular engine: the vector
    /// argument is ignored and every hit scores 1.0. The planner only routes
    /// filter-only requests here.
    async fn filtered_search(
        &self,
        filters: &FilterSet,
        _query_vector: &[f32],
        top_k: usize,
    ) -> EngineResult<QueryResult> {
        self.exact_lookup(filters, Some(top_k)).await
    }

    async fn exact_lookup(
        &self,
        filters: &FilterSet,
        limit: Option<usize>,
    ) -> EngineResult<QueryResult> {
        filters.validate(&self.schema)?;

        let columns: Vec<String> = self
            .schema
            .scalar_fields()
            .map(|f| format!("\"{}\"", f.name))
            .collect();
        let (fragment, binds) = self.where_fragment(filters);
        let where_sql = fragment
            .map(|f| format!("WHERE {} ", f))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM \"{}\" {}ORDER BY \"{}\" ASC LIMIT ? OFFSET ?",
            columns.join(", "),
            self.table,
            where_sql,
            self.schema.primary_key()
        );

        // Paged retrieval: pages concatenate in engine order; any page error
        // propagates and discards everything fetched so far
        let mut hits: Vec<ScoredRecord> = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut query = sqlx::query(&sql);
            for bind in &binds {
                query = apply_bind_ref(query, bind);
            }
            query = query.bind(self.page_size as i64).bind(offset as i64);

            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| QueryError::backend_unavailable(format!("select: {}", e)))?;
            let fetched = rows.len();

            for row in &rows {
                hits.push(ScoredRecord {
                    record: self.row_to_record(row)?,
                    score: 1.0,
                });
            }

            let done = fetched < self.page_size
                || limit.map(|l| hits.len() >= l).unwrap_or(false);
            if done {
                break;
            }
            offset += fetched;
        }

        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        debug!(table = %self.table, hits = hits.len(), "exact lookup completed");
        Ok(QueryResult { hits })
    }

    async fn stats(&self) -> EngineResult<BackendStats> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table);
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueryError::backend_unavailable(format!("count: {}", e)))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| QueryError::backend_unavailable(format!("decode count: {}", e)))?;

        Ok(BackendStats {
            collection: self.table.clone(),
            schema: self.schema.name().to_string(),
            record_count: count as u64,
        })
    }

    async fn close(&self) -> EngineResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn clause_sql(clause: &FilterClause, binds: &mut Vec<BindValue>) -> String {
    let column = format!("\"{}\"", clause.field);
    match &clause.op {
        FilterOp::Eq(value) => {
            binds.push(filter_bind(value));
            format!("{} = ?", column)
        }
        FilterOp::Range { min, max } => {
            let mut parts = Vec::new();
            if let Some(min) = min {
                binds.push(filter_bind(min));
                parts.push(format!("{} >= ?", column));
            }
            if let Some(max) = max {
                binds.push(filter_bind(max));
                parts.push(format!("{} <= ?", column));
            }
            if parts.is_empty() {
                "1 = 1".to_string()
            } else {
                format!("({})", parts.join(" AND "))
            }
        }
        FilterOp::Contains(value) => match value {
            FilterValue::Text(needle) => {
                let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
                binds.push(BindValue::Text(format!("%{}%", escaped)));
                format!("{} LIKE ? ESCAPE '\\'", column)
            }
            other => {
                binds.push(filter_bind(other));
                format!("{} = ?", column)
            }
        },
        FilterOp::In(values) => {
            if values.is_empty() {
                return "1 = 0".to_string();
            }
            for value in values {
                binds.push(filter_bind(value));
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({})", column, placeholders)
        }
    }
}

fn filter_bind(value: &FilterValue) -> BindValue {
    match value {
        FilterValue::Text(s) => BindValue::Text(s.clone()),
        FilterValue::Integer(i) => BindValue::Int(*i),
        FilterValue::Float(f) => BindValue::Real(*f),
        FilterValue::Boolean(b) => BindValue::Bool(*b),
    }
}

fn to_bind_value(field_type: &FieldType, value: &Value) -> EngineResult<BindValue> {
    let bind = match field_type {
        FieldType::Text | FieldType::Timestamp => {
            BindValue::Text(value.as_str().unwrap_or_default().to_string())
        }
        FieldType::Integer => BindValue::Int(value.as_i64().unwrap_or_default()),
        FieldType::Float => BindValue::Real(value.as_f64().unwrap_or_default()),
        FieldType::Boolean => BindValue::Bool(value.as_bool().unwrap_or_default()),
        FieldType::Vector { .. } => BindValue::Text(serde_json::to_string(value)?),
    };
    Ok(bind)
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn apply_bind(query: SqliteQuery<'_>, bind: BindValue) -> SqliteQuery<'_> {
    match bind {
        BindValue::Text(s) => query.bind(s),
        BindValue::Int(i) => query.bind(i),
        BindValue::Real(f) => query.bind(f),
        BindValue::Bool(b) => query.bind(b),
    }
}

fn apply_bind_ref<'q>(query: SqliteQuery<'q>, bind: &BindValue) -> SqliteQuery<'q> {
    match bind {
        BindValue::Text(s) => query.bind(s.clone()),
        BindValue::Int(i) => query.bind(*i),
        BindValue::Real(f) => query.bind(*f),
        BindValue::Bool(b) => query.bind(*b),
    }
}
