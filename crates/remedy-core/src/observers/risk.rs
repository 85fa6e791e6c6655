//! Risk flagging: case-insensitive policy keyword matching.
//!
//! A keyword matches when it appears verbatim in the patch, or when all
//! of its `_`-separated parts appear (so `auth_bypass` catches an
//! `authentication_bypass` helper). Keywords already present in the
//! original code are not re-flagged; only risk introduced by the patch
//! counts.

use serde::{Deserialize, Serialize};

/// Max snippet length carried on a flag.
const SNIPPET_LEN: usize = 50;

/// One matched risk keyword with surrounding context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub keyword: String,
    pub snippet: String,
}

/// Evaluate the candidate patch against the policy keyword set.
pub fn evaluate_risk(patch_code: &str, original_code: &str, keywords: &[String]) -> Vec<RiskFlag> {
    let patch_lower = patch_code.to_lowercase();
    let original_lower = original_code.to_lowercase();

    keywords
        .iter()
        .filter_map(|keyword| {
            let kw = keyword.to_lowercase();
            match match_position(&patch_lower, &kw) {
                Some(pos) if match_position(&original_lower, &kw).is_none() => Some(RiskFlag {
                    keyword: keyword.clone(),
                    snippet: snippet_at(&patch_lower, pos),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Position of the first match: the exact keyword, or the first part when
/// every `_`-separated part of the keyword occurs somewhere in the text.
fn match_position(text: &str, keyword: &str) -> Option<usize> {
    if let Some(pos) = text.find(keyword) {
        return Some(pos);
    }
    let parts: Vec<&str> = keyword.split('_').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        return None;
    }
    if parts.iter().all(|part| text.contains(part)) {
        return text.find(parts[0]);
    }
    None
}

fn snippet_at(text: &str, pos: usize) -> String {
    let start = text[..pos]
        .char_indices()
        .rev()
        .take(10)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(pos);
    text[start..]
        .chars()
        .take(SNIPPET_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        vec![
            "schema_change".to_string(),
            "auth_bypass".to_string(),
            "production_data_modification".to_string(),
        ]
    }

    #[test]
    fn test_clean_patch_has_no_flags() {
        let flags = evaluate_risk("let x = 1;", "let x = 2;", &keywords());
        assert!(flags.is_empty());
    }

    #[test]
    fn test_exact_keyword_matches() {
        let flags = evaluate_risk("apply_schema_change(db);", "", &keywords());
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].keyword, "schema_change");
        assert!(!flags[0].snippet.is_empty());
    }

    #[test]
    fn test_case_insensitive() {
        let flags = evaluate_risk("SCHEMA_CHANGE()", "", &keywords());
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn test_split_parts_match() {
        // `auth_bypass` catches `authentication_bypass`.
        let flags = evaluate_risk("enable authentication_bypass here", "", &keywords());
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].keyword, "auth_bypass");
    }

    #[test]
    fn test_keyword_already_in_original_not_flagged() {
        let code = "check_schema_change_guard();";
        let flags = evaluate_risk(code, code, &keywords());
        assert!(flags.is_empty());
    }

    #[test]
    fn test_snippet_bounded() {
        let patch = format!("{}auth_bypass{}", "x".repeat(100), "y".repeat(100));
        let flags = evaluate_risk(&patch, "", &keywords());
        assert_eq!(flags.len(), 1);
        assert!(flags[0].snippet.chars().count() <= 50);
    }
}
