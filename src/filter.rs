//! Structured filters applied to storage queries
//!
//! A [`FilterSet`] is an ordered collection of [`FilterClause`]s, combined
//! with AND semantics unless explicitly marked as an OR group. Every clause
//! must reference a field that exists and is declared `filterable` in the
//! active schema; violations surface as `InvalidFilterField` rather than
//! being silently dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{EngineResult, QueryError};
use crate::schema::{FieldType, SchemaDescriptor};

/// Typed filter value, matching the scalar field types of a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl FilterValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compatibility with a schema field type. Integers are accepted for
    /// float fields; text doubles for timestamps, which travel as RFC 3339
    /// strings.
    fn compatible_with(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (FilterValue::Text(_), FieldType::Text | FieldType::Timestamp) => true,
            (FilterValue::Integer(_), FieldType::Integer | FieldType::Float) => true,
            (FilterValue::Float(_), FieldType::Float) => true,
            (FilterValue::Boolean(_), FieldType::Boolean) => true,
            _ => false,
        }
    }

    /// Equality against a stored JSON value
    pub(crate) fn matches(&self, value: &Value) -> bool {
        match self {
            FilterValue::Text(s) => value.as_str() == Some(s.as_str()),
            FilterValue::Integer(i) => value.as_i64() == Some(*i),
            FilterValue::Float(f) => value.as_f64() == Some(*f),
            FilterValue::Boolean(b) => value.as_bool() == Some(*b),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<i64> for FilterValue {
    fn from(i: i64) -> Self {
        FilterValue::Integer(i)
    }
}

/// Filter operator with its operand(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq(FilterValue),
    Range {
        min: Option<FilterValue>,
        max: Option<FilterValue>,
    },
    Contains(FilterValue),
    In(Vec<FilterValue>),
}

impl FilterOp {
    fn operands(&self) -> Vec<&FilterValue> {
        match self {
            FilterOp::Eq(v) | FilterOp::Contains(v) => vec![v],
            FilterOp::Range { min, max } => min.iter().chain(max.iter()).collect(),
            FilterOp::In(values) => values.iter().collect(),
        }
    }
}

/// A single field/operator/value constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
}

impl FilterClause {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq(value.into()),
        }
    }

    pub fn range(
        field: impl Into<String>,
        min: Option<FilterValue>,
        max: Option<FilterValue>,
    ) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Range { min, max },
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Contains(value.into()),
        }
    }

    pub fn in_set(field: impl Into<String>, values: Vec<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In(values),
        }
    }

    fn matches(&self, record: &HashMap<String, Value>) -> bool {
        let Some(value) = record.get(&self.field) else {
            return false;
        };
        match &self.op {
            FilterOp::Eq(expected) => expected.matches(value),
            FilterOp::Contains(needle) => match (needle, value) {
                (FilterValue::Text(n), Value::String(hay)) => hay.contains(n.as_str()),
                (needle, Value::Array(items)) => items.iter().any(|item| needle.matches(item)),
                _ => false,
            },
            FilterOp::In(options) => options.iter().any(|option| option.matches(value)),
            FilterOp::Range { min, max } => range_matches(min.as_ref(), max.as_ref(), value),
        }
    }
}

fn range_matches(min: Option<&FilterValue>, max: Option<&FilterValue>, value: &Value) -> bool {
    // Numeric bounds compare numerically, text bounds lexicographically
    if let Some(actual) = value.as_f64() {
        let above = min
            .and_then(FilterValue::as_number)
            .map(|m| actual >= m)
            .unwrap_or(true);
        let below = max
            .and_then(FilterValue::as_number)
            .map(|m| actual <= m)
            .unwrap_or(true);
        return above && below;
    }
    if let Some(actual) = value.as_str() {
        let above = match min {
            Some(FilterValue::Text(m)) => actual >= m.as_str(),
            Some(_) => false,
            None => true,
        };
        let below = match max {
            Some(FilterValue::Text(m)) => actual <= m.as_str(),
            Some(_) => false,
            None => true,
        };
        return above && below;
    }
    false
}

/// How the clauses of a set combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Combine {
    #[default]
    All,
    Any,
}

/// Ordered, AND-combined (unless OR-grouped) collection of filter clauses
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterSet {
    clauses: Vec<FilterClause>,
    combine: Combine,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_clauses(clauses: Vec<FilterClause>) -> Self {
        Self {
            clauses,
            combine: Combine::All,
        }
    }

    pub fn any_of(clauses: Vec<FilterClause>) -> Self {
        Self {
            clauses,
            combine: Combine::Any,
        }
    }

    pub fn push(&mut self, clause: FilterClause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn combine(&self) -> Combine {
        self.combine
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn clause_for(&self, field: &str) -> Option<&FilterClause> {
        self.clauses.iter().find(|c| c.field == field)
    }

    /// Check every clause against the active schema: the field must exist,
    /// be declared filterable, and every operand must be type-compatible.
    pub fn validate(&self, schema: &SchemaDescriptor) -> EngineResult<()> {
        for clause in &self.clauses {
            let field = schema.field(&clause.field).ok_or_else(|| {
                QueryError::InvalidFilterField { field: clause.field.clone() }
            })?;
            if !field.filterable || field.field_type.is_vector() {
                return Err(QueryError::InvalidFilterField { field: clause.field.clone() });
            }
            for operand in clause.op.operands() {
                if !operand.compatible_with(&field.field_type) {
                    return Err(QueryError::InvalidFilterField { field: clause.field.clone() });
                }
            }
        }
        Ok(())
    }

    /// Evaluate the set against a record. An empty set matches everything.
    pub fn matches(&self, record: &HashMap<String, Value>) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        match self.combine {
            Combine::All => self.clauses.iter().all(|c| c.matches(record)),
            Combine::Any => self.clauses.iter().any(|c| c.matches(record)),
        }
    }

    /// Apply explicit caller-supplied clauses on top of this (extracted) set.
    /// An explicit clause replaces every extracted clause for the same field;
    /// explicit always wins, the clauses are not merged.
    pub fn overridden_by(mut self, explicit: &FilterSet) -> FilterSet {
        self.clauses
            .retain(|c| explicit.clause_for(&c.field).is_none());
        self.clauses.extend(explicit.clauses.iter().cloned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::annual_report_schema;
    use serde_json::json;

    fn record(value: serde_json::Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_accepts_filterable_fields() {
        let schema = annual_report_schema(4).unwrap();
        let filters = FilterSet::from_clauses(vec![
            FilterClause::eq("company", "Acme Corp"),
            FilterClause::range("year", Some(FilterValue::Integer(2020)), None),
            FilterClause::in_set(
                "source",
                vec![FilterValue::Text("10-K".into()), FilterValue::Text("10-Q".into())],
            ),
        ]);
        filters.validate(&schema).unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let schema = annual_report_schema(4).unwrap();
        let filters = FilterSet::from_clauses(vec![FilterClause::eq("cik", "0000123")]);
        let err = filters.validate(&schema).unwrap_err();
        assert!(matches!(err, QueryError::InvalidFilterField { field } if field == "cik"));
    }

    #[test]
    fn test_validate_rejects_non_filterable_field() {
        let schema = annual_report_schema(4).unwrap();
        let filters = FilterSet::from_clauses(vec![FilterClause::eq("content", "revenue")]);
        assert!(matches!(
            filters.validate(&schema),
            Err(QueryError::InvalidFilterField { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let schema = annual_report_schema(4).unwrap();
        let filters = FilterSet::from_clauses(vec![FilterClause::eq(
            "year",
            FilterValue::Boolean(true),
        )]);
        assert!(filters.validate(&schema).is_err());
    }

    #[test]
    fn test_eq_and_range_matching() {
        let rec = record(json!({ "company": "Acme Corp", "year": 2023 }));

        assert!(FilterSet::from_clauses(vec![
            FilterClause::eq("company", "Acme Corp"),
            FilterClause::eq("year", 2023i64),
        ])
        .matches(&rec));

        assert!(!FilterSet::from_clauses(vec![FilterClause::eq("company", "Other Inc")])
            .matches(&rec));

        assert!(FilterSet::from_clauses(vec![FilterClause::range(
            "year",
            Some(FilterValue::Integer(2020)),
            Some(FilterValue::Integer(2024)),
        )])
        .matches(&rec));

        assert!(!FilterSet::from_clauses(vec![FilterClause::range(
            "year",
            Some(FilterValue::Integer(2024)),
            None,
        )])
        .matches(&rec));
    }

    #[test]
    fn test_contains_and_in_set_matching() {
        let rec = record(json!({ "source": "annual_report_2023.pdf", "year": 2023 }));

        assert!(
            FilterSet::from_clauses(vec![FilterClause::contains("source", "2023")]).matches(&rec)
        );
        assert!(
            !FilterSet::from_clauses(vec![FilterClause::contains("source", "2024")]).matches(&rec)
        );
        assert!(FilterSet::from_clauses(vec![FilterClause::in_set(
            "year",
            vec![FilterValue::Integer(2022), FilterValue::Integer(2023)],
        )])
        .matches(&rec));
    }

    #[test]
    fn test_or_grouped_set() {
        let rec = record(json!({ "year": 2023 }));
        let filters = FilterSet::any_of(vec![
            FilterClause::eq("year", 1999i64),
            FilterClause::eq("year", 2023i64),
        ]);
        assert!(filters.matches(&rec));
    }

    #[test]
    fn test_missing_field_value_never_matches() {
        let rec = record(json!({ "year": 2023 }));
        assert!(!FilterSet::from_clauses(vec![FilterClause::eq("company", "Acme")])
            .matches(&rec));
    }

    #[test]
    fn test_empty_set_matches_everything() {
        let rec = record(json!({ "year": 2023 }));
        assert!(FilterSet::new().matches(&rec));
    }

    #[test]
    fn test_explicit_overrides_extracted_per_field() {
        let extracted = FilterSet::from_clauses(vec![
            FilterClause::eq("company", "Acme Corp"),
            FilterClause::eq("year", 2023i64),
        ]);
        let explicit = FilterSet::from_clauses(vec![FilterClause::range(
            "year",
            Some(FilterValue::Integer(2020)),
            Some(FilterValue::Integer(2022)),
        )]);

        let merged = extracted.overridden_by(&explicit);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.clause_for("company"),
            Some(&FilterClause::eq("company", "Acme Corp"))
        );
        // The explicit range replaced the extracted equals entirely
        assert!(matches!(
            merged.clause_for("year").unwrap().op,
            FilterOp::Range { .. }
        ));
    }
}
