//! Sanitizer port: validation of advisor-proposed patches before they
//! replace the current candidate.

use serde::{Deserialize, Serialize};

/// Constraints a proposal must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizeConstraints {
    /// Maximum number of lines the proposal may differ from the baseline.
    pub max_lines_changed: usize,
    /// Case-insensitive substrings that must not appear in the proposal.
    pub disallow_keywords: Vec<String>,
}

/// Result of sanitation: either the accepted code or a rejection reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizeOutcome {
    pub ok: bool,
    pub code: Option<String>,
    pub reason: Option<String>,
}

impl SanitizeOutcome {
    pub fn accept(code: String) -> Self {
        Self {
            ok: true,
            code: Some(code),
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: None,
            reason: Some(reason.into()),
        }
    }
}

/// Validates an advisor proposal against a baseline and constraints.
pub trait Sanitizer: Send + Sync {
    fn sanitize(
        &self,
        proposed: &str,
        baseline: &str,
        constraints: &SanitizeConstraints,
    ) -> SanitizeOutcome;
}

/// Default sanitizer: rejects empty proposals, disallowed keywords, and
/// proposals whose line delta against the baseline exceeds the budget.
#[derive(Debug, Default)]
pub struct BasicSanitizer;

impl Sanitizer for BasicSanitizer {
    fn sanitize(
        &self,
        proposed: &str,
        baseline: &str,
        constraints: &SanitizeConstraints,
    ) -> SanitizeOutcome {
        if proposed.trim().is_empty() {
            return SanitizeOutcome::reject("empty proposal");
        }

        let lower = proposed.to_lowercase();
        for keyword in &constraints.disallow_keywords {
            if lower.contains(&keyword.to_lowercase()) {
                return SanitizeOutcome::reject(format!("disallowed keyword `{keyword}`"));
            }
        }

        let changed = changed_line_count(proposed, baseline);
        if changed > constraints.max_lines_changed {
            return SanitizeOutcome::reject(format!(
                "{changed} lines changed, budget is {}",
                constraints.max_lines_changed
            ));
        }

        SanitizeOutcome::accept(proposed.to_string())
    }
}

/// Lines differing between proposal and baseline, counted positionally
/// plus the length difference. Cheap on purpose; the sandbox is the real
/// gate.
fn changed_line_count(proposed: &str, baseline: &str) -> usize {
    let new_lines: Vec<&str> = proposed.lines().collect();
    let old_lines: Vec<&str> = baseline.lines().collect();
    let shared = new_lines.len().min(old_lines.len());
    let mut changed = new_lines.len().abs_diff(old_lines.len());
    for i in 0..shared {
        if new_lines[i].trim() != old_lines[i].trim() {
            changed += 1;
        }
    }
    changed
}
