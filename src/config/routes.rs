// Route table: logical model name -> ordered remote model candidates

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Key matching any model without an explicit entry
pub const WILDCARD: &str = "*";

const DEFAULT_ROUTE: (&str, &str) = ("gpt-oss:120b", "gpt-oss:120b");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("route table is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("route table must be a JSON object")]
    NotAnObject,
    #[error("route table has no entries")]
    Empty,
    #[error("route table key must not be blank")]
    BlankKey,
    #[error("entry {0:?} must be a list of model names or a '|'-separated string")]
    InvalidEntry(String),
    #[error("entry {0:?} lists no model names")]
    EmptyEntry(String),
    #[error("key {0:?} appears more than once")]
    DuplicateKey(String),
}

/// Immutable mapping from logical model (or `*`) to remote candidates.
///
/// Every entry is non-empty, trimmed and deduplicated in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RouteTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(DEFAULT_ROUTE.0.to_string(), vec![DEFAULT_ROUTE.1.to_string()]);
        Self { entries }
    }
}

impl RouteTable {
    /// Parse a JSON route table; either the whole table is valid or an error is returned
    pub fn parse(raw: &str) -> Result<Self, RouteTableError> {
        let parsed: Value =
            serde_json::from_str(raw).map_err(|e| RouteTableError::InvalidJson(e.to_string()))?;
        let object = parsed.as_object().ok_or(RouteTableError::NotAnObject)?;

        let mut entries = BTreeMap::new();
        for (key, value) in object {
            let key = key.trim();
            if key.is_empty() {
                return Err(RouteTableError::BlankKey);
            }
            let models: Vec<String> = match value {
                Value::String(joined) => joined.split('|').map(str::to_string).collect(),
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s.clone()),
                        _ => Err(RouteTableError::InvalidEntry(key.to_string())),
                    })
                    .collect::<Result<_, _>>()?,
                _ => return Err(RouteTableError::InvalidEntry(key.to_string())),
            };
            let models = dedup_models(models.iter().map(String::as_str));
            if models.is_empty() {
                return Err(RouteTableError::EmptyEntry(key.to_string()));
            }
            if entries.insert(key.to_string(), models).is_some() {
                return Err(RouteTableError::DuplicateKey(key.to_string()));
            }
        }

        if entries.is_empty() {
            return Err(RouteTableError::Empty);
        }
        Ok(Self { entries })
    }

    /// Load from optional JSON text. Absent or malformed input yields the default table.
    pub fn load(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::default();
        };
        match Self::parse(raw) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Invalid OLLAMA_MODEL_MAP_JSON, using default route table: {}", e);
                Self::default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn wildcard(&self) -> Option<&[String]> {
        self.get(WILDCARD)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trim, drop blanks and dedup preserving first-seen order
pub(crate) fn dedup_models<'a>(models: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    models
        .into_iter()
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .filter(|model| seen.insert(*model))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_dedups_preserving_order() {
        let table = RouteTable::parse(r#"{"m": ["a", "a", "b"]}"#).unwrap();
        assert_eq!(table.get("m").unwrap(), strings(&["a", "b"]).as_slice());
    }

    #[test]
    fn test_parse_pipe_separated_and_wildcard() {
        let table = RouteTable::parse(r#"{"m": " a | b ||a", "*": ["qwen3:32b"]}"#).unwrap();
        assert_eq!(table.get("m").unwrap(), strings(&["a", "b"]).as_slice());
        assert_eq!(table.wildcard().unwrap(), strings(&["qwen3:32b"]).as_slice());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_parse_drops_blank_models() {
        let table = RouteTable::parse(r#"{"m": ["", " x ", "  "]}"#).unwrap();
        assert_eq!(table.get("m").unwrap(), strings(&["x"]).as_slice());
    }

    #[test]
    fn test_parse_rejects_malformed_tables() {
        assert!(matches!(
            RouteTable::parse("{not json"),
            Err(RouteTableError::InvalidJson(_))
        ));
        assert_eq!(RouteTable::parse("[1, 2]"), Err(RouteTableError::NotAnObject));
        assert_eq!(RouteTable::parse("{}"), Err(RouteTableError::Empty));
        assert_eq!(
            RouteTable::parse(r#"{"m": 3}"#),
            Err(RouteTableError::InvalidEntry("m".to_string()))
        );
        assert_eq!(
            RouteTable::parse(r#"{"m": ["  "]}"#),
            Err(RouteTableError::EmptyEntry("m".to_string()))
        );
        assert_eq!(
            RouteTable::parse(r#"{" ": ["a"]}"#),
            Err(RouteTableError::BlankKey)
        );
    }

    #[test]
    fn test_keys_colliding_after_trim_are_rejected() {
        assert_eq!(
            RouteTable::parse(r#"{"m": ["a"], " m ": ["b"]}"#),
            Err(RouteTableError::DuplicateKey("m".to_string()))
        );
        let table = RouteTable::load(Some(r#"{"m": ["a"], "m ": ["b"]}"#));
        assert_eq!(table, RouteTable::default());
    }

    #[test]
    fn test_partially_valid_table_is_rejected_whole() {
        let table = RouteTable::load(Some(r#"{"good": ["a"], "bad": [1]}"#));
        assert_eq!(table, RouteTable::default());
        assert!(table.get("good").is_none());
    }

    #[test]
    fn test_load_defaults() {
        assert_eq!(RouteTable::load(None), RouteTable::default());
        assert_eq!(RouteTable::load(Some("   ")), RouteTable::default());
        assert_eq!(RouteTable::load(Some("nope")), RouteTable::default());
        assert_eq!(
            RouteTable::default().get("gpt-oss:120b").unwrap(),
            strings(&["gpt-oss:120b"]).as_slice()
        );
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let table = RouteTable::parse(r#"{"m": ["a", "b"]}"#).unwrap();
        assert_eq!(
            serde_json::to_value(&table).unwrap(),
            serde_json::json!({"m": ["a", "b"]})
        );
    }
}
