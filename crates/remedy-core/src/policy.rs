//! Engine policy: every tunable with its documented default, plus the
//! three advisor-tier presets.

use serde::{Deserialize, Serialize};

/// Policy governing a Remedy engine instance.
///
/// All fields have documented defaults; presets bias attempt budgets and
/// floors toward the reliability of the advisor tier in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    /// Minimum syntax confidence to attempt.
    pub syntax_conf_floor: f64,
    /// Minimum logic confidence to attempt.
    pub logic_conf_floor: f64,
    /// Attempt budget for the syntax lane.
    pub max_syntax_attempts: u32,
    /// Attempt budget for the logic lane (logic/runtime and friends).
    pub max_logic_attempts: u32,
    /// Maximum tolerated syntax failure rate before the lane trips.
    pub syntax_error_budget: f64,
    /// Maximum tolerated logic failure rate before the lane trips.
    pub logic_error_budget: f64,
    /// Max `process_attempt` calls per sliding 60-second window.
    pub rate_limit_per_min: u32,
    /// Passed verbatim to the sandbox port.
    pub sandbox_isolation: String,
    /// Escalate to human review when a risk keyword matches.
    pub require_human_on_risky: bool,
    /// Case-insensitive risky substrings.
    pub risky_keywords: Vec<String>,
    /// Cascade stop threshold.
    pub max_cascade_depth: u32,
    /// Memory ring capacity.
    pub memory_max: usize,
    /// Memory record lifetime in milliseconds.
    pub memory_ttl_ms: u64,
    /// Watchdog wall-clock trigger in milliseconds.
    pub wall_threshold_ms: u64,
    /// Watchdog CPU trigger in percent.
    pub cpu_threshold_percent: f64,
    /// Consecutive triggered attempts before severity becomes likely_hang.
    pub watchdog_likely_hang_after: u32,
    /// Consecutive triggered attempts before severity becomes high.
    pub watchdog_high_after: u32,
    /// Advisor consult timeout; expiry is treated as "no proposal".
    pub advisor_timeout_ms: u64,
    /// Lower backoff bound in milliseconds.
    pub backoff_min_ms: u64,
    /// Upper backoff bound in milliseconds.
    pub backoff_max_ms: u64,
    /// Sliding window length for breaker trend analysis.
    pub trend_window: usize,
    /// Sanitizer: max lines an advisor proposal may change.
    pub sanitizer_max_lines_changed: usize,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            syntax_conf_floor: 0.30,
            logic_conf_floor: 0.25,
            max_syntax_attempts: 5,
            max_logic_attempts: 7,
            syntax_error_budget: 0.10,
            logic_error_budget: 0.20,
            rate_limit_per_min: 15,
            sandbox_isolation: "full".to_string(),
            require_human_on_risky: true,
            risky_keywords: vec![
                "schema_change".to_string(),
                "auth_bypass".to_string(),
                "production_data_modification".to_string(),
            ],
            max_cascade_depth: 5,
            memory_max: 500,
            memory_ttl_ms: 7 * 24 * 3600 * 1000,
            wall_threshold_ms: 5000,
            cpu_threshold_percent: 90.0,
            watchdog_likely_hang_after: 2,
            watchdog_high_after: 3,
            advisor_timeout_ms: 10_000,
            backoff_min_ms: 500,
            backoff_max_ms: 1500,
            trend_window: 3,
            sanitizer_max_lines_changed: 25,
        }
    }
}

impl EnginePolicy {
    /// Frontier-tier advisor: suggestions are usually right, so budgets
    /// are tight and floors high to fail fast on the rare bad run.
    pub fn sota() -> Self {
        Self {
            syntax_conf_floor: 0.35,
            logic_conf_floor: 0.30,
            max_syntax_attempts: 3,
            max_logic_attempts: 5,
            syntax_error_budget: 0.10,
            logic_error_budget: 0.15,
            ..Self::default()
        }
    }

    /// Mid-tier advisor: the documented defaults.
    pub fn mid_tier() -> Self {
        Self::default()
    }

    /// Small local advisor: noisier suggestions, so more attempts, lower
    /// floors, and a longer backoff ceiling.
    pub fn local_small() -> Self {
        Self {
            syntax_conf_floor: 0.22,
            logic_conf_floor: 0.18,
            max_syntax_attempts: 7,
            max_logic_attempts: 10,
            syntax_error_budget: 0.25,
            logic_error_budget: 0.35,
            backoff_max_ms: 4000,
            ..Self::default()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "sota" => Some(Self::sota()),
            "mid_tier" => Some(Self::mid_tier()),
            "local_small" => Some(Self::local_small()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let p = EnginePolicy::default();
        assert_eq!(p.syntax_conf_floor, 0.30);
        assert_eq!(p.logic_conf_floor, 0.25);
        assert_eq!(p.max_syntax_attempts, 5);
        assert_eq!(p.max_logic_attempts, 7);
        assert_eq!(p.syntax_error_budget, 0.10);
        assert_eq!(p.logic_error_budget, 0.20);
        assert_eq!(p.rate_limit_per_min, 15);
        assert_eq!(p.sandbox_isolation, "full");
        assert!(p.require_human_on_risky);
        assert_eq!(p.risky_keywords.len(), 3);
        assert_eq!(p.max_cascade_depth, 5);
        assert_eq!(p.memory_max, 500);
        assert_eq!(p.memory_ttl_ms, 604_800_000);
        assert_eq!(p.wall_threshold_ms, 5000);
        assert_eq!(p.cpu_threshold_percent, 90.0);
    }

    #[test]
    fn test_presets_differ_in_budgets() {
        let sota = EnginePolicy::sota();
        let local = EnginePolicy::local_small();
        assert!(sota.max_syntax_attempts < local.max_syntax_attempts);
        assert!(sota.syntax_conf_floor > local.syntax_conf_floor);
        assert_eq!(EnginePolicy::mid_tier(), EnginePolicy::default());
    }

    #[test]
    fn test_preset_lookup() {
        assert!(EnginePolicy::preset("sota").is_some());
        assert!(EnginePolicy::preset("mid_tier").is_some());
        assert!(EnginePolicy::preset("local_small").is_some());
        assert!(EnginePolicy::preset("galactic").is_none());
    }

    #[test]
    fn test_partial_policy_json_fills_defaults() {
        let p: EnginePolicy = serde_json::from_str(r#"{"rate_limit_per_min": 3}"#).unwrap();
        assert_eq!(p.rate_limit_per_min, 3);
        assert_eq!(p.max_syntax_attempts, 5);
    }

    #[test]
    fn test_serde_roundtrip() {
        let p = EnginePolicy::local_small();
        let json = serde_json::to_string(&p).unwrap();
        let back: EnginePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
