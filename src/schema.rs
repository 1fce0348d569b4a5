//! Schema descriptors and the schema registry
//!
//! A [`SchemaDescriptor`] is an immutable definition of one collection or
//! table shape: its fields, their types, indexing roles, and which fields are
//! eligible for extracted-filter matching. Descriptors are produced by the
//! [`SchemaBuilder`], registered in a [`SchemaRegistry`], and handed to
//! storage adapters as shared read-only values.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineResult, QueryError};

/// Distance metric declared for a vector field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityMetric {
    Cosine,
    Dot,
    Euclidean,
}

/// Field value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Vector { dim: usize, metric: SimilarityMetric },
}

impl FieldType {
    pub fn is_vector(&self) -> bool {
        matches!(self, FieldType::Vector { .. })
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Vector { .. } => "vector",
        }
    }
}

/// One field of a collection/table shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub indexed: bool,
    pub required: bool,
    /// Eligible for extracted- or explicit-filter matching
    pub filterable: bool,
    /// Alternate names recognized by the filter extractor
    pub synonyms: Vec<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            indexed: false,
            required: false,
            filterable: false,
            synonyms: Vec::new(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Timestamp)
    }

    pub fn vector(name: impl Into<String>, dim: usize, metric: SimilarityMetric) -> Self {
        Self::new(name, FieldType::Vector { dim, metric })
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn with_synonym(mut self, synonym: impl Into<String>) -> Self {
        self.synonyms.push(synonym.into());
        self
    }

    /// Whether `candidate` names this field, matching the field name or any
    /// declared synonym case-insensitively.
    pub fn answers_to(&self, candidate: &str) -> bool {
        self.name.eq_ignore_ascii_case(candidate)
            || self.synonyms.iter().any(|s| s.eq_ignore_ascii_case(candidate))
    }
}

/// Immutable definition of one collection/table shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
    primary_key: String,
}

impl SchemaDescriptor {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a candidate token to a field, matching names and synonyms
    /// case-insensitively.
    pub fn resolve(&self, candidate: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.answers_to(candidate))
    }

    /// The embedding field, if this shape declares one. Validation guarantees
    /// at most one vector field per descriptor.
    pub fn vector_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.field_type.is_vector())
    }

    pub fn vector_dim(&self) -> Option<usize> {
        self.vector_field().map(|f| match f.field_type {
            FieldType::Vector { dim, .. } => dim,
            _ => unreachable!(),
        })
    }

    /// Fields returned to callers: everything except vector-valued fields.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.field_type.is_vector())
    }

    /// Validate a record against this shape before any write is issued.
    ///
    /// Rejects unknown fields, missing required fields, type mismatches, and
    /// vectors whose length differs from the declared dimensionality. A
    /// failing record causes no partial write at the adapter boundary.
    pub fn validate_record(&self, record: &HashMap<String, Value>) -> EngineResult<()> {
        for key in record.keys() {
            if self.field(key).is_none() {
                return Err(QueryError::schema_violation(format!(
                    "unknown field `{}` for schema `{}`",
                    key, self.name
                )));
            }
        }

        for field in &self.fields {
            match record.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(QueryError::schema_violation(format!(
                            "missing required field `{}`",
                            field.name
                        )));
                    }
                }
                Some(value) => {
                    if let Some(reason) = type_mismatch(&field.field_type, value) {
                        return Err(QueryError::schema_violation(format!(
                            "field `{}` {}",
                            field.name, reason
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Field names double as engine identifiers (payload keys, SQL columns), so
/// they are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reason a value does not satisfy a field type, or `None` when compatible
fn type_mismatch(field_type: &FieldType, value: &Value) -> Option<String> {
    let ok = match field_type {
        FieldType::Text => value.is_string(),
        FieldType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        FieldType::Float => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Timestamp => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        FieldType::Vector { dim, .. } => {
            let parsed = value
                .as_array()
                .map(|arr| arr.iter().all(|v| v.is_number()))
                .unwrap_or(false);
            if !parsed {
                return Some("expects a numeric vector".to_string());
            }
            let len = value.as_array().map(|a| a.len()).unwrap_or(0);
            if len != *dim {
                return Some(format!(
                    "vector length {} does not match declared dimension {}",
                    len, dim
                ));
            }
            true
        }
    };

    if ok {
        None
    } else {
        Some(format!("expects {}", field_type.describe()))
    }
}

/// Builder producing validated, immutable [`SchemaDescriptor`] values
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
    primary_key: Option<String>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: None,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn build(self) -> EngineResult<SchemaDescriptor> {
        if self.name.trim().is_empty() {
            return Err(QueryError::schema_violation("schema name must not be empty"));
        }
        if self.fields.is_empty() {
            return Err(QueryError::schema_violation(format!(
                "schema `{}` declares no fields",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_identifier(&field.name) {
                return Err(QueryError::schema_violation(format!(
                    "field name `{}` is not a valid identifier",
                    field.name
                )));
            }
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(QueryError::schema_violation(format!(
                    "duplicate field name `{}` in schema `{}`",
                    field.name, self.name
                )));
            }
        }

        let vector_count = self
            .fields
            .iter()
            .filter(|f| f.field_type.is_vector())
            .count();
        if vector_count > 1 {
            return Err(QueryError::schema_violation(format!(
                "schema `{}` declares {} vector fields, at most one is allowed",
                self.name, vector_count
            )));
        }
        for field in &self.fields {
            if let FieldType::Vector { dim, .. } = field.field_type {
                if dim == 0 {
                    return Err(QueryError::schema_violation(format!(
                        "vector field `{}` must declare a non-zero dimensionality",
                        field.name
                    )));
                }
            }
        }

        let primary_key = self.primary_key.ok_or_else(|| {
            QueryError::schema_violation(format!("schema `{}` declares no primary key", self.name))
        })?;
        match self.fields.iter().find(|f| f.name == primary_key) {
            None => {
                return Err(QueryError::schema_violation(format!(
                    "primary key `{}` is not a field of schema `{}`",
                    primary_key, self.name
                )))
            }
            Some(f) if f.field_type.is_vector() => {
                return Err(QueryError::schema_violation(format!(
                    "primary key `{}` must not be a vector field",
                    primary_key
                )))
            }
            Some(_) => {}
        }

        Ok(SchemaDescriptor {
            name: self.name,
            fields: self.fields,
            primary_key,
        })
    }
}

/// General-purpose document shape: text content plus metadata and one
/// embedding field, mirroring the default ingestion layout.
pub fn document_schema(embedding_dim: usize) -> EngineResult<SchemaDescriptor> {
    SchemaDescriptor::builder("document")
        .field(FieldDescriptor::integer("doc_id").indexed())
        .field(FieldDescriptor::text("content").required().indexed())
        .field(FieldDescriptor::text("metadata"))
        .field(
            FieldDescriptor::text("source")
                .filterable()
                .with_synonym("origin"),
        )
        .field(FieldDescriptor::timestamp("created_at").filterable())
        .field(FieldDescriptor::vector(
            "embedding",
            embedding_dim,
            SimilarityMetric::Cosine,
        ))
        .primary_key("doc_id")
        .build()
}

/// Annual-report shape: company and year are filterable so the extractor can
/// bind tokens like "Acme Corp" and "2023" directly to clauses.
pub fn annual_report_schema(embedding_dim: usize) -> EngineResult<SchemaDescriptor> {
    SchemaDescriptor::builder("annual_report")
        .field(FieldDescriptor::integer("chunk_id").indexed())
        .field(
            FieldDescriptor::text("company")
                .filterable()
                .indexed()
                .with_synonym("organization")
                .with_synonym("firm"),
        )
        .field(FieldDescriptor::integer("year").filterable())
        .field(FieldDescriptor::text("content").required().indexed())
        .field(FieldDescriptor::integer("chunk_index"))
        .field(FieldDescriptor::text("source").filterable())
        .field(FieldDescriptor::timestamp("created_at"))
        .field(FieldDescriptor::vector(
            "embedding",
            embedding_dim,
            SimilarityMetric::Cosine,
        ))
        .primary_key("chunk_id")
        .build()
}

/// Registry of named schema descriptors
///
/// Read-mostly after construction. Descriptors are stored behind `Arc` and
/// never mutated once defined; there is no dynamic schema migration.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<SchemaDescriptor>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `document` and `annual_report`
    /// builtins, both using the given embedding dimensionality.
    pub fn with_builtins(embedding_dim: usize) -> EngineResult<Self> {
        let registry = Self::new();
        registry.define(document_schema(embedding_dim)?)?;
        registry.define(annual_report_schema(embedding_dim)?)?;
        Ok(registry)
    }

    pub fn define(&self, descriptor: SchemaDescriptor) -> EngineResult<()> {
        let mut schemas = self.schemas.write().expect("schema registry lock poisoned");
        if schemas.contains_key(descriptor.name()) {
            return Err(QueryError::DuplicateSchema {
                name: descriptor.name().to_string(),
            });
        }
        debug!(schema = descriptor.name(), "registered schema");
        schemas.insert(descriptor.name().to_string(), Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<SchemaDescriptor>> {
        let schemas = self.schemas.read().expect("schema registry lock poisoned");
        schemas
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownSchema { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas
            .read()
            .expect("schema registry lock poisoned")
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schemas
            .read()
            .expect("schema registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
