//! Adaptive backoff: short debounce while improving, exponential with
//! jitter otherwise.

use serde::{Deserialize, Serialize};

use crate::breaker::TrendSummary;
use crate::domain::clamp_unit;
use crate::ports::JitterRng;

/// Wait bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitBounds {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for WaitBounds {
    fn default() -> Self {
        Self {
            min_ms: 500,
            max_ms: 1500,
        }
    }
}

impl WaitBounds {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms,
            max_ms: max_ms.max(min_ms),
        }
    }
}

/// A recommended wait with its rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffDecision {
    pub wait_ms: u64,
    pub rationale: String,
}

/// Compute the next wait.
///
/// Improving trend: a short debounce near the lower bound, shrinking as
/// velocity rises. Otherwise: exponential in the consecutive failure
/// count with uniform jitter in `[0.5, 1.5)`, clamped to bounds.
pub fn recommend(
    trend: &TrendSummary,
    consecutive_failures: u32,
    bounds: &WaitBounds,
    rng: &dyn JitterRng,
) -> BackoffDecision {
    let span = bounds.max_ms.saturating_sub(bounds.min_ms) as f64;

    if trend.improving {
        let velocity = clamp_unit(trend.improvement_velocity);
        let wait = bounds.min_ms as f64 + 0.1 * span * (1.0 - velocity);
        return BackoffDecision {
            wait_ms: wait.round() as u64,
            rationale: "adaptive_improving_short_debounce".to_string(),
        };
    }

    let exponent = consecutive_failures.min(32);
    let base = (bounds.min_ms.saturating_mul(1u64 << exponent)).min(bounds.max_ms);
    let jittered = base as f64 * rng.uniform(0.5, 1.5);
    let wait = (jittered.round() as u64).clamp(bounds.min_ms, bounds.max_ms);
    BackoffDecision {
        wait_ms: wait,
        rationale: "exponential_backoff_with_jitter".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorTrend;
    use crate::ports::fakes::SeededJitterRng;

    fn improving_trend(velocity: f64) -> TrendSummary {
        TrendSummary {
            error_trend: ErrorTrend::Improving,
            improvement_velocity: velocity,
            improving: true,
            density_improving: true,
            confidence_improving: true,
            stagnation_risk: 0.1,
            last_confidence: 0.8,
            samples: 3,
        }
    }

    fn flat_trend() -> TrendSummary {
        TrendSummary {
            error_trend: ErrorTrend::Plateauing,
            improvement_velocity: 0.0,
            improving: false,
            density_improving: false,
            confidence_improving: false,
            stagnation_risk: 1.0,
            last_confidence: 0.4,
            samples: 3,
        }
    }

    #[test]
    fn test_improving_uses_short_debounce() {
        let rng = SeededJitterRng::new(1);
        let bounds = WaitBounds::default();
        let decision = recommend(&improving_trend(0.0), 0, &bounds, &rng);
        assert_eq!(decision.rationale, "adaptive_improving_short_debounce");
        // min + 0.1 * span = 500 + 100.
        assert_eq!(decision.wait_ms, 600);

        let fast = recommend(&improving_trend(1.0), 0, &bounds, &rng);
        assert_eq!(fast.wait_ms, 500, "full velocity collapses to the floor");
    }

    #[test]
    fn test_exponential_growth_with_failures() {
        let rng = SeededJitterRng::new(42);
        let bounds = WaitBounds::new(100, 100_000);
        let w0 = recommend(&flat_trend(), 0, &bounds, &rng).wait_ms;
        let w4 = recommend(&flat_trend(), 4, &bounds, &rng).wait_ms;
        // 100 * 2^4 = 1600 before jitter; even worst-case jitter keeps
        // the ordering.
        assert!(w4 > w0);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let rng = SeededJitterRng::new(3);
        let bounds = WaitBounds::default();
        for failures in 0..10 {
            let decision = recommend(&flat_trend(), failures, &bounds, &rng);
            assert!(decision.wait_ms >= bounds.min_ms);
            assert!(decision.wait_ms <= bounds.max_ms);
            assert_eq!(decision.rationale, "exponential_backoff_with_jitter");
        }
    }

    #[test]
    fn test_huge_failure_count_does_not_overflow() {
        let rng = SeededJitterRng::new(3);
        let bounds = WaitBounds::new(500, 4000);
        let decision = recommend(&flat_trend(), 1000, &bounds, &rng);
        assert!(decision.wait_ms <= 4000);
    }
}
