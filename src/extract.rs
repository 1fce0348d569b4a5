//! Rule-based filter extraction from natural-language queries
//!
//! The extractor is deterministic and schema-driven by design: it only binds
//! tokens to fields the active schema declares `filterable`, and everything
//! it cannot bind stays in the semantic query text instead of being dropped.
//!
//! Two passes run over the raw text:
//! 1. explicit `key: value` / `key=value` markers, with keys matched
//!    case-insensitively against field names and declared synonyms;
//! 2. lightweight patterns over the remaining text: a 4-digit year token
//!    bound to a year-like field, and a run of two or more capitalized words
//!    bound to a company/entity-like field.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use crate::filter::{FilterClause, FilterSet, FilterValue};
use crate::schema::{FieldDescriptor, FieldType, SchemaDescriptor};

static KEY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*[:=]\s*").unwrap());

static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());

static ENTITY_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][A-Za-z0-9&.-]*(?:\s+[A-Z][A-Za-z0-9&.-]*)+").unwrap());

/// Connector words trimmed from the tail of extracted text values and
/// swallowed when they immediately precede a pattern-matched span.
const CONNECTORS: &[&str] = &[
    "and", "or", "in", "for", "of", "from", "with", "the", "on", "at", "by", "to",
];

/// Field names the entity pattern may bind to, in priority order
const ENTITY_FIELD_KEYS: &[&str] = &["company", "organization", "entity", "vendor", "author"];

/// Result of running extraction over a raw query
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Clauses bound to filterable schema fields
    pub filters: FilterSet,
    /// Residual text submitted for embedding; empty for filter-only requests
    pub semantic_text: String,
}

/// Schema-driven extractor turning raw text into a validated [`FilterSet`]
#[derive(Debug, Clone)]
pub struct FilterExtractor {
    schema: Arc<SchemaDescriptor>,
}

impl FilterExtractor {
    pub fn new(schema: Arc<SchemaDescriptor>) -> Self {
        Self { schema }
    }

    pub fn extract(&self, raw_text: &str) -> Extraction {
        let mut filters = FilterSet::new();
        let mut consumed: Vec<(usize, usize)> = Vec::new();

        // Pass 1: key/value markers. Regions run from a marker's value start
        // to the next marker (or end of text), so an unrecognized key still
        // bounds the previous value.
        let markers: Vec<(String, usize, usize)> = KEY_MARKER
            .captures_iter(raw_text)
            .map(|cap| {
                let whole = cap.get(0).unwrap();
                let key = cap.get(1).unwrap().as_str().to_string();
                (key, whole.start(), whole.end())
            })
            .collect();

        for (i, (key, marker_start, value_start)) in markers.iter().enumerate() {
            let region_end = markers
                .get(i + 1)
                .map(|next| next.1)
                .unwrap_or(raw_text.len());
            let value_raw = &raw_text[*value_start..region_end];

            let Some(field) = self.filterable_field(key) else {
                // Unknown or non-filterable key: the tokens stay in the
                // semantic text rather than being discarded.
                continue;
            };

            let Some((value, used)) = parse_value(&field.field_type, value_raw) else {
                continue;
            };

            if filters.clause_for(&field.name).is_none() {
                debug!(field = %field.name, "extracted key/value filter");
                filters.push(FilterClause::eq(field.name.clone(), value));
            }
            consumed.push((*marker_start, *value_start + used));
        }

        let residual = remove_spans(raw_text, &consumed);

        // Pass 2: pattern recognition on the residual text
        let mut pattern_spans: Vec<(usize, usize)> = Vec::new();

        if let Some(field) = self.year_field(&filters) {
            if let Some(m) = YEAR_TOKEN.find(&residual) {
                if let Ok(year) = m.as_str().parse::<i64>() {
                    let value = match field.field_type {
                        FieldType::Integer => FilterValue::Integer(year),
                        _ => FilterValue::Text(m.as_str().to_string()),
                    };
                    debug!(field = %field.name, year, "extracted year filter");
                    filters.push(FilterClause::eq(field.name.clone(), value));
                    pattern_spans.push(widen_over_connector(&residual, m.start(), m.end()));
                }
            }
        }

        if let Some(field) = self.entity_field(&filters) {
            let taken: Vec<(usize, usize)> = pattern_spans.clone();
            let candidate = ENTITY_SPAN
                .find_iter(&residual)
                .find(|m| !taken.iter().any(|(s, e)| m.start() < *e && m.end() > *s));
            if let Some(m) = candidate {
                debug!(field = %field.name, span = m.as_str(), "extracted entity filter");
                filters.push(FilterClause::eq(
                    field.name.clone(),
                    FilterValue::Text(m.as_str().to_string()),
                ));
                pattern_spans.push(widen_over_connector(&residual, m.start(), m.end()));
            }
        }

        let semantic_text = remove_spans(&residual, &pattern_spans);

        Extraction { filters, semantic_text }
    }

    fn filterable_field(&self, candidate: &str) -> Option<&FieldDescriptor> {
        self.schema
            .resolve(candidate)
            .filter(|f| f.filterable && !f.field_type.is_vector())
    }

    fn year_field(&self, filters: &FilterSet) -> Option<&FieldDescriptor> {
        self.filterable_field("year")
            .filter(|f| matches!(f.field_type, FieldType::Integer | FieldType::Text))
            .filter(|f| filters.clause_for(&f.name).is_none())
    }

    fn entity_field(&self, filters: &FilterSet) -> Option<&FieldDescriptor> {
        ENTITY_FIELD_KEYS
            .iter()
            .filter_map(|key| self.filterable_field(key))
            .find(|f| {
                matches!(f.field_type, FieldType::Text)
                    && filters.clause_for(&f.name).is_none()
            })
    }
}

/// Parse a marker's value region into a typed filter value, returning the
/// value and how many bytes of the region it consumed.
///
/// Text values span the whole region up to the next marker, with trailing
/// connector words trimmed so "Acme Corp in" binds as "Acme Corp" (the
/// connector is still consumed). Scalar values consume only their first
/// token, leaving the rest of the region in the semantic text. Returns
/// `None` when the region cannot satisfy the field type.
fn parse_value(field_type: &FieldType, value_raw: &str) -> Option<(FilterValue, usize)> {
    let tokens: Vec<&str> = value_raw.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    let first_token_end = {
        let start = value_raw.len() - value_raw.trim_start().len();
        start + tokens[0].len()
    };

    match field_type {
        FieldType::Text | FieldType::Timestamp => {
            let mut end = tokens.len();
            while end > 0 && CONNECTORS.contains(&tokens[end - 1].to_ascii_lowercase().as_str()) {
                end -= 1;
            }
            if end == 0 {
                return None;
            }
            Some((FilterValue::Text(tokens[..end].join(" ")), value_raw.len()))
        }
        FieldType::Integer => {
            let token = tokens[0].trim_matches(|c: char| !c.is_ascii_alphanumeric());
            token
                .parse::<i64>()
                .ok()
                .map(|i| (FilterValue::Integer(i), first_token_end))
        }
        FieldType::Float => {
            let token = tokens[0].trim_matches(|c: char| c == ',' || c == ';');
            token
                .parse::<f64>()
                .ok()
                .map(|f| (FilterValue::Float(f), first_token_end))
        }
        FieldType::Boolean => {
            let value = match tokens[0].to_ascii_lowercase().as_str() {
                "true" | "yes" => FilterValue::Boolean(true),
                "false" | "no" => FilterValue::Boolean(false),
                _ => return None,
            };
            Some((value, first_token_end))
        }
        FieldType::Vector { .. } => None,
    }
}

/// Remove consumed byte spans from `text` and normalize whitespace
fn remove_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut sorted = spans.to_vec();
    sorted.sort_unstable();

    let mut kept = String::new();
    let mut cursor = 0usize;
    for (start, end) in sorted {
        if start > cursor {
            kept.push_str(&text[cursor..start]);
            kept.push(' ');
        }
        cursor = cursor.max(end);
    }
    if cursor < text.len() {
        kept.push_str(&text[cursor..]);
    }

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Widen a matched span to swallow an immediately preceding connector word,
/// so "revenue for Singapore Airlines" leaves "revenue" rather than
/// "revenue for".
fn widen_over_connector(text: &str, start: usize, end: usize) -> (usize, usize) {
    let prefix = text[..start].trim_end();
    let token_start = prefix
        .rfind(char::is_whitespace)
        .map(|i| i + 1)
        .unwrap_or(0);
    let token = &prefix[token_start..];
    if CONNECTORS.contains(&token.to_ascii_lowercase().as_str()) {
        (token_start, end)
    } else {
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::schema::{annual_report_schema, document_schema};

    fn extractor() -> FilterExtractor {
        FilterExtractor::new(Arc::new(annual_report_schema(4).unwrap()))
    }

    #[test]
    fn test_key_value_markers_bind_to_filterable_fields() {
        let result = extractor().extract("revenue for company: Acme Corp in year: 2023");

        assert_eq!(result.filters.len(), 2);
        assert_eq!(
            result.filters.clause_for("company"),
            Some(&FilterClause::eq("company", "Acme Corp"))
        );
        assert_eq!(
            result.filters.clause_for("year"),
            Some(&FilterClause::eq("year", 2023i64))
        );
        assert_eq!(result.semantic_text, "revenue for");
    }

    #[test]
    fn test_equals_sign_markers() {
        let result = extractor().extract("year=2023 quarterly earnings");
        assert_eq!(
            result.filters.clause_for("year"),
            Some(&FilterClause::eq("year", 2023i64))
        );
        assert_eq!(result.semantic_text, "quarterly earnings");
    }

    #[test]
    fn test_synonym_keys_resolve_to_declared_field() {
        let result = extractor().extract("organization: Globex profit margin");
        assert_eq!(
            result.filters.clause_for("company"),
            Some(&FilterClause::eq("company", "Globex profit margin"))
        );
    }

    #[test]
    fn test_no_recognizable_tokens_yields_pure_similarity_request() {
        let result = extractor().extract("how did margins develop over time");
        assert!(result.filters.is_empty());
        assert_eq!(result.semantic_text, "how did margins develop over time");
    }

    #[test]
    fn test_unknown_key_stays_in_semantic_text() {
        let result = extractor().extract("priority: high deadlines this week");
        assert!(result.filters.is_empty());
        assert!(result.semantic_text.contains("priority"));
        assert!(result.semantic_text.contains("high"));
    }

    #[test]
    fn test_non_filterable_field_stays_in_semantic_text() {
        // `content` exists in the schema but is not filterable
        let result = extractor().extract("content: revenue growth");
        assert!(result.filters.is_empty());
        assert!(result.semantic_text.contains("content"));
        assert!(result.semantic_text.contains("revenue growth"));
    }

    #[test]
    fn test_year_pattern_without_marker() {
        let result = extractor().extract("operating costs in 2021");
        assert_eq!(
            result.filters.clause_for("year"),
            Some(&FilterClause::eq("year", 2021i64))
        );
        assert_eq!(result.semantic_text, "operating costs");
    }

    #[test]
    fn test_entity_pattern_binds_capitalized_span() {
        let result = extractor().extract("total revenue for Singapore Airlines in 2024");

        assert_eq!(
            result.filters.clause_for("company"),
            Some(&FilterClause::eq("company", "Singapore Airlines"))
        );
        assert_eq!(
            result.filters.clause_for("year"),
            Some(&FilterClause::eq("year", 2024i64))
        );
        assert_eq!(result.semantic_text, "total revenue");
    }

    #[test]
    fn test_year_pattern_skipped_without_matching_field() {
        // The document schema has no year-like filterable field
        let extractor = FilterExtractor::new(Arc::new(document_schema(4).unwrap()));
        let result = extractor.extract("reports from 2023");
        assert!(result.filters.clause_for("year").is_none());
        assert!(result.semantic_text.contains("2023"));
    }

    #[test]
    fn test_marker_takes_precedence_over_pattern_for_same_field() {
        let result = extractor().extract("year: 2020 results compared to 2023");
        // The marker claimed `year`; the later 4-digit token stays as text
        assert_eq!(
            result.filters.clause_for("year"),
            Some(&FilterClause::eq("year", 2020i64))
        );
        assert!(result.semantic_text.contains("2023"));
    }

    #[test]
    fn test_unparseable_integer_value_stays_in_text() {
        let result = extractor().extract("year: unknown revenue outlook");
        assert!(result.filters.clause_for("year").is_none());
        assert!(result.semantic_text.contains("unknown"));
    }

    #[test]
    fn test_extracted_filters_validate_against_schema() {
        let schema = Arc::new(annual_report_schema(4).unwrap());
        let result = FilterExtractor::new(schema.clone())
            .extract("source: 10-K company: Acme Corp year: 2023 revenue");
        result.filters.validate(&schema).unwrap();
        for clause in result.filters.clauses() {
            assert!(matches!(clause.op, FilterOp::Eq(_)));
        }
    }
}
