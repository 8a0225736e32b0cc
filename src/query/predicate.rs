//! Predicate and sort key model.
//!
//! A predicate is `{key, operator, value}`. The key's first dotted segment
//! picks the category (commit column, labels, one of the key/value tables,
//! artifact linkage); the rest names the key inside a key/value table.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::query::error::{QueryError, QueryResult};

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contain,
    NotContain,
    In,
}

impl Operator {
    /// Operators that match by absence of a child row.
    pub fn is_negative(self) -> bool {
        matches!(self, Operator::Ne | Operator::NotContain)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "EQ",
            Operator::Ne => "NE",
            Operator::Gt => "GT",
            Operator::Gte => "GTE",
            Operator::Lt => "LT",
            Operator::Lte => "LTE",
            Operator::Contain => "CONTAIN",
            Operator::NotContain => "NOT_CONTAIN",
            Operator::In => "IN",
        };
        f.write_str(s)
    }
}

/// Dynamically typed predicate value, mirroring JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum PredicateValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<PredicateValue>),
    Struct(serde_json::Map<String, JsonValue>),
    Null,
}

impl PredicateValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PredicateValue::String(_) => "string",
            PredicateValue::Number(_) => "number",
            PredicateValue::Bool(_) => "bool",
            PredicateValue::List(_) => "list",
            PredicateValue::Struct(_) => "struct",
            PredicateValue::Null => "null",
        }
    }
}

impl From<JsonValue> for PredicateValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => PredicateValue::Null,
            JsonValue::Bool(b) => PredicateValue::Bool(b),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) => PredicateValue::Number(f),
                None => PredicateValue::String(n.to_string()),
            },
            JsonValue::String(s) => PredicateValue::String(s),
            JsonValue::Array(items) => {
                PredicateValue::List(items.into_iter().map(PredicateValue::from).collect())
            }
            JsonValue::Object(map) => PredicateValue::Struct(map),
        }
    }
}

impl From<PredicateValue> for JsonValue {
    fn from(value: PredicateValue) -> Self {
        match value {
            PredicateValue::Null => JsonValue::Null,
            PredicateValue::Bool(b) => JsonValue::Bool(b),
            PredicateValue::Number(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            PredicateValue::String(s) => JsonValue::String(s),
            PredicateValue::List(items) => {
                JsonValue::Array(items.into_iter().map(JsonValue::from).collect())
            }
            PredicateValue::Struct(map) => JsonValue::Object(map),
        }
    }
}

impl From<&str> for PredicateValue {
    fn from(s: &str) -> Self {
        PredicateValue::String(s.to_string())
    }
}

impl From<String> for PredicateValue {
    fn from(s: String) -> Self {
        PredicateValue::String(s)
    }
}

impl From<f64> for PredicateValue {
    fn from(f: f64) -> Self {
        PredicateValue::Number(f)
    }
}

impl From<i64> for PredicateValue {
    fn from(n: i64) -> Self {
        PredicateValue::Number(n as f64)
    }
}

impl From<bool> for PredicateValue {
    fn from(b: bool) -> Self {
        PredicateValue::Bool(b)
    }
}

/// One filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueQuery {
    pub key: String,
    pub operator: Operator,
    pub value: PredicateValue,
}

impl KeyValueQuery {
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<PredicateValue>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Commit table columns addressable by predicates and sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitColumn {
    Author,
    Message,
    Sha,
    RootSha,
    DateCreated,
    DateUpdated,
    VersionNumber,
}

impl CommitColumn {
    pub fn column(self) -> &'static str {
        match self {
            CommitColumn::Author => "author",
            CommitColumn::Message => "message",
            CommitColumn::Sha => "sha",
            CommitColumn::RootSha => "root_sha",
            CommitColumn::DateCreated => "date_created",
            CommitColumn::DateUpdated => "date_updated",
            CommitColumn::VersionNumber => "version_number",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            CommitColumn::DateCreated | CommitColumn::DateUpdated | CommitColumn::VersionNumber
        )
    }
}

/// Key/value child table category, stored in `key_values.field_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyValueKind {
    Attributes,
    Metrics,
    Hyperparameters,
    Observations,
}

impl KeyValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyValueKind::Attributes => "attributes",
            KeyValueKind::Metrics => "metrics",
            KeyValueKind::Hyperparameters => "hyperparameters",
            KeyValueKind::Observations => "observations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attributes" => Some(KeyValueKind::Attributes),
            "metrics" => Some(KeyValueKind::Metrics),
            "hyperparameters" => Some(KeyValueKind::Hyperparameters),
            "observations" => Some(KeyValueKind::Observations),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a predicate or sort key addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Commit(CommitColumn),
    Label,
    KeyValue { kind: KeyValueKind, key: String },
    LinkedArtifact,
}

impl Field {
    /// Classify a dotted key.
    pub fn parse(key: &str) -> QueryResult<Field> {
        if key.trim().is_empty() {
            return Err(QueryError::invalid("predicate key is empty"));
        }

        let mut segments: Vec<&str> = key.split('.').collect();
        if segments.len() > 1 && segments[0] == "commit" {
            segments.remove(0);
        }
        let (category, rest) = match segments.split_first() {
            Some((first, rest)) => (*first, rest),
            None => return Err(QueryError::invalid(format!("invalid key '{}'", key))),
        };

        let column = match category {
            "author" | "owner" => Some(CommitColumn::Author),
            "message" | "description" => Some(CommitColumn::Message),
            "sha" | "id" | "commit_hash" => Some(CommitColumn::Sha),
            "root_sha" => Some(CommitColumn::RootSha),
            "date_created" | "time_logged" => Some(CommitColumn::DateCreated),
            "date_updated" | "time_updated" => Some(CommitColumn::DateUpdated),
            "version" | "version_number" => Some(CommitColumn::VersionNumber),
            _ => None,
        };
        if let Some(column) = column {
            if !rest.is_empty() {
                return Err(QueryError::invalid(format!(
                    "field '{}' has no nested keys: '{}'",
                    category, key
                )));
            }
            return Ok(Field::Commit(column));
        }

        match category {
            "tags" | "labels" => {
                if !rest.is_empty() {
                    return Err(QueryError::invalid(format!("labels have no nested keys: '{}'", key)));
                }
                Ok(Field::Label)
            }
            "linked_artifact_id" => {
                if !rest.is_empty() {
                    return Err(QueryError::invalid(format!("invalid key '{}'", key)));
                }
                Ok(Field::LinkedArtifact)
            }
            other => {
                let kind = KeyValueKind::parse(other).ok_or_else(|| {
                    QueryError::invalid(format!("unknown predicate category '{}' in key '{}'", other, key))
                })?;
                if rest.is_empty() || rest.iter().any(|s| s.is_empty()) {
                    return Err(QueryError::invalid(format!("missing {} key in '{}'", kind, key)));
                }
                if kind == KeyValueKind::Observations && rest.len() > 1 {
                    return Err(QueryError::invalid(format!(
                        "observations allow exactly two key levels: '{}'",
                        key
                    )));
                }
                Ok(Field::KeyValue {
                    kind,
                    key: rest.join("."),
                })
            }
        }
    }
}

/// Requested ordering of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub key: String,
    #[serde(default)]
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

impl Default for SortKey {
    fn default() -> Self {
        Self::desc("date_updated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_categories() {
        assert_eq!(Field::parse("owner").unwrap(), Field::Commit(CommitColumn::Author));
        assert_eq!(
            Field::parse("commit.description").unwrap(),
            Field::Commit(CommitColumn::Message)
        );
        assert_eq!(
            Field::parse("time_logged").unwrap(),
            Field::Commit(CommitColumn::DateCreated)
        );
        assert_eq!(Field::parse("tags").unwrap(), Field::Label);
        assert_eq!(Field::parse("linked_artifact_id").unwrap(), Field::LinkedArtifact);
        assert_eq!(
            Field::parse("metrics.accuracy").unwrap(),
            Field::KeyValue {
                kind: KeyValueKind::Metrics,
                key: "accuracy".into()
            }
        );
        assert_eq!(
            Field::parse("attributes.a.b").unwrap(),
            Field::KeyValue {
                kind: KeyValueKind::Attributes,
                key: "a.b".into()
            }
        );
    }

    #[test]
    fn test_field_rejections() {
        for key in ["", "   ", "nope.x", "metrics", "metrics.", "observations.a.b", "author.x"] {
            assert!(
                matches!(Field::parse(key), Err(QueryError::InvalidArgument(_))),
                "key {:?} should be rejected",
                key
            );
        }
        assert!(Field::parse("observations.loss").is_ok());
    }

    #[test]
    fn test_predicate_json_shape() {
        let q: KeyValueQuery = serde_json::from_str(
            r#"{"key": "metrics.acc", "operator": "GTE", "value": 0.5}"#,
        )
        .unwrap();
        assert_eq!(q, KeyValueQuery::new("metrics.acc", Operator::Gte, 0.5));

        let q: KeyValueQuery =
            serde_json::from_str(r#"{"key": "tags", "operator": "NOT_CONTAIN", "value": "x"}"#).unwrap();
        assert_eq!(q.operator, Operator::NotContain);

        let q: KeyValueQuery =
            serde_json::from_str(r#"{"key": "a", "operator": "EQ", "value": {"k": 1}}"#).unwrap();
        assert_eq!(q.value.kind(), "struct");

        let q: KeyValueQuery =
            serde_json::from_str(r#"{"key": "a", "operator": "IN", "value": ["x", null]}"#).unwrap();
        assert_eq!(
            q.value,
            PredicateValue::List(vec!["x".into(), PredicateValue::Null])
        );
    }
}
