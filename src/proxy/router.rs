// Model route resolver - decides whether a request goes remote, and to which models

use crate::config::routes::dedup_models;
use crate::config::RouteTable;

/// Resolve the requested model into ordered remote candidates.
///
/// Lookup order is exact name, then the wildcard entry. An empty result means the
/// request stays on the local backend.
pub fn resolve_remote_candidates(requested_model: &str, routes: &RouteTable) -> Vec<String> {
    let requested_model = requested_model.trim();
    if requested_model.is_empty() {
        return Vec::new();
    }

    let mapped = routes
        .get(requested_model)
        .or_else(|| routes.wildcard())
        .unwrap_or_default();

    dedup_models(mapped.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_wins_over_wildcard() {
        let routes = RouteTable::parse(r#"{"m": ["a", "b"], "*": ["z"]}"#).unwrap();
        assert_eq!(resolve_remote_candidates("m", &routes), vec!["a", "b"]);
        assert_eq!(resolve_remote_candidates(" m ", &routes), vec!["a", "b"]);
        assert_eq!(resolve_remote_candidates("other", &routes), vec!["z"]);
    }

    #[test]
    fn test_duplicates_collapse_in_order() {
        let routes = RouteTable::parse(r#"{"m": ["a", "a", "b"]}"#).unwrap();
        assert_eq!(resolve_remote_candidates("m", &routes), vec!["a", "b"]);
    }

    #[test]
    fn test_unmapped_model_stays_local() {
        let routes = RouteTable::parse(r#"{"m": ["a"]}"#).unwrap();
        assert!(resolve_remote_candidates("llama3:8b", &routes).is_empty());
    }

    #[test]
    fn test_empty_model_is_unmapped_even_with_wildcard() {
        let routes = RouteTable::parse(r#"{"*": ["z"]}"#).unwrap();
        assert!(resolve_remote_candidates("", &routes).is_empty());
        assert!(resolve_remote_candidates("   ", &routes).is_empty());
    }
}
