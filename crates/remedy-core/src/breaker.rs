//! Dual circuit breaker: per-lane attempt/error budgets, a sliding trend
//! window, and a next-action recommendation.
//!
//! Syntax errors burn the syntax lane; every other class burns the logic
//! lane. A lane trips open when its attempt budget or error budget is
//! exhausted; both lanes open means the breaker is permanently open.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::{BreakerLane, BreakerState, ErrorClass, ErrorTrend};
use crate::policy::EnginePolicy;

/// Velocities below this magnitude count as a plateau.
const PLATEAU_EPSILON: f64 = 1e-3;

/// Blocked reasons, reported verbatim.
pub const REASON_PERMANENTLY_OPEN: &str = "permanently open";
pub const REASON_CLASS_OPEN: &str = "class open";
pub const REASON_ATTEMPTS_EXCEEDED: &str = "attempts exceeded";
pub const REASON_ERROR_BUDGET: &str = "error rate exceeded budget";

/// Next action recommended by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerRecommendation {
    Promote,
    Rollback,
    TryDifferentStrategy,
    PauseAndBackoff,
    Continue,
}

/// One budget lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSummary {
    pub attempts: u32,
    pub failures: u32,
    pub state: BreakerState,
}

/// Snapshot of the trend window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub error_trend: ErrorTrend,
    /// `(first − last) / window_len` over detected error counts.
    /// Positive means errors are falling.
    pub improvement_velocity: f64,
    pub improving: bool,
    pub density_improving: bool,
    pub confidence_improving: bool,
    pub stagnation_risk: f64,
    pub last_confidence: f64,
    pub samples: usize,
}

/// Serializable breaker summary for dashboards and the attempt extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSummary {
    pub syntax: LaneSummary,
    pub logic: LaneSummary,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub cumulative_errors_resolved: u32,
    pub trend: TrendSummary,
}

#[derive(Debug, Clone)]
struct Lane {
    attempts: u32,
    failures: u32,
    state: BreakerState,
    max_attempts: u32,
    error_budget: f64,
}

impl Lane {
    fn new(max_attempts: u32, error_budget: f64) -> Self {
        Self {
            attempts: 0,
            failures: 0,
            state: BreakerState::Closed,
            max_attempts,
            error_budget,
        }
    }

    /// The budget check that would deny the next attempt, if any.
    /// Does not mutate state.
    fn exhaustion(&self) -> Option<&'static str> {
        if self.attempts >= self.max_attempts {
            return Some(REASON_ATTEMPTS_EXCEEDED);
        }
        if self.attempts > 0 {
            let rate = self.failures as f64 / self.attempts as f64;
            if rate > self.error_budget {
                return Some(REASON_ERROR_BUDGET);
            }
        }
        None
    }

    fn record(&mut self, success: bool) {
        self.attempts += 1;
        if !success {
            self.failures += 1;
        }
        match (self.state, success) {
            (BreakerState::HalfOpen, true) => self.state = BreakerState::Closed,
            (BreakerState::HalfOpen, false) => self.state = BreakerState::Open,
            _ => {}
        }
    }

    fn summary(&self) -> LaneSummary {
        LaneSummary {
            attempts: self.attempts,
            failures: self.failures,
            state: self.state,
        }
    }
}

/// The dual circuit breaker.
#[derive(Debug)]
pub struct DualCircuitBreaker {
    syntax: Lane,
    logic: Lane,
    syntax_conf_floor: f64,
    logic_conf_floor: f64,
    window_len: usize,
    detected: VecDeque<u32>,
    resolved: VecDeque<u32>,
    confidence: VecDeque<f64>,
    density: VecDeque<f64>,
    velocities: VecDeque<f64>,
    cumulative_resolved: u32,
    consecutive_failures: u32,
    last_success: bool,
    last_confidence: f64,
}

impl DualCircuitBreaker {
    pub fn new(policy: &EnginePolicy) -> Self {
        Self {
            syntax: Lane::new(policy.max_syntax_attempts, policy.syntax_error_budget),
            logic: Lane::new(policy.max_logic_attempts, policy.logic_error_budget),
            syntax_conf_floor: policy.syntax_conf_floor,
            logic_conf_floor: policy.logic_conf_floor,
            window_len: policy.trend_window.max(2),
            detected: VecDeque::new(),
            resolved: VecDeque::new(),
            confidence: VecDeque::new(),
            density: VecDeque::new(),
            velocities: VecDeque::new(),
            cumulative_resolved: 0,
            consecutive_failures: 0,
            last_success: false,
            last_confidence: 0.0,
        }
    }

    fn lane(&self, class: ErrorClass) -> &Lane {
        match class.breaker_lane() {
            BreakerLane::Syntax => &self.syntax,
            BreakerLane::Logic => &self.logic,
        }
    }

    fn lane_mut(&mut self, class: ErrorClass) -> &mut Lane {
        match class.breaker_lane() {
            BreakerLane::Syntax => &mut self.syntax,
            BreakerLane::Logic => &mut self.logic,
        }
    }

    /// The reason the next attempt in `class` would be denied, if any.
    /// Pure; does not trip lanes.
    pub fn blocked_reason(&self, class: ErrorClass) -> Option<&'static str> {
        let lane = self.lane(class);
        // A half-open lane is granted its probe attempt regardless of
        // budgets.
        if lane.state == BreakerState::HalfOpen {
            return None;
        }
        let both_exhausted = (self.syntax.state == BreakerState::Open
            || self.syntax.exhaustion().is_some())
            && (self.logic.state == BreakerState::Open || self.logic.exhaustion().is_some());
        if both_exhausted {
            return Some(REASON_PERMANENTLY_OPEN);
        }
        if lane.state == BreakerState::Open {
            return Some(REASON_CLASS_OPEN);
        }
        lane.exhaustion()
    }

    /// Re-arm a tripped lane for a single probe attempt. A success while
    /// half-open closes the lane; a failure re-opens it.
    pub fn allow_probe(&mut self, class: ErrorClass) {
        let lane = self.lane_mut(class);
        if lane.state == BreakerState::Open {
            lane.state = BreakerState::HalfOpen;
        }
    }

    /// Gate check for the next attempt. A denial trips the lane open, so
    /// later calls report the lane as open rather than its original cause.
    pub fn can_attempt(&mut self, class: ErrorClass) -> (bool, &'static str) {
        match self.blocked_reason(class) {
            Some(reason) => {
                self.lane_mut(class).state = BreakerState::Open;
                (false, reason)
            }
            None => (true, "ok"),
        }
    }

    /// Record a completed attempt.
    pub fn record(
        &mut self,
        class: ErrorClass,
        success: bool,
        errors_detected: u32,
        errors_resolved: u32,
        confidence: f64,
        loc: u32,
    ) {
        self.lane_mut(class).record(success);

        self.cumulative_resolved += errors_resolved;
        self.consecutive_failures = if success {
            0
        } else {
            self.consecutive_failures + 1
        };
        self.last_success = success;
        self.last_confidence = confidence;

        let density = errors_detected as f64 / loc.max(1) as f64;
        push_bounded(&mut self.detected, errors_detected, self.window_len);
        push_bounded(&mut self.resolved, errors_resolved, self.window_len);
        push_bounded(&mut self.confidence, confidence, self.window_len);
        push_bounded(&mut self.density, density, self.window_len);

        if self.detected.len() >= 2 {
            let first = *self.detected.front().unwrap_or(&0) as f64;
            let last = *self.detected.back().unwrap_or(&0) as f64;
            let velocity = (first - last) / self.detected.len() as f64;
            push_bounded(&mut self.velocities, velocity, self.window_len);
        }
    }

    /// Trend over the sliding window.
    pub fn trend(&self) -> TrendSummary {
        if self.detected.len() < 2 {
            return TrendSummary {
                error_trend: ErrorTrend::Unknown,
                improvement_velocity: 0.0,
                improving: false,
                density_improving: false,
                confidence_improving: false,
                stagnation_risk: 0.0,
                last_confidence: self.last_confidence,
                samples: self.detected.len(),
            };
        }

        let first_err = *self.detected.front().unwrap_or(&0) as f64;
        let last_err = *self.detected.back().unwrap_or(&0) as f64;
        let errors_improving = last_err < first_err;

        let density_improving = match (self.density.front(), self.density.back()) {
            (Some(first), Some(last)) => last < first,
            _ => false,
        };
        let confidence_improving = match (self.confidence.front(), self.confidence.back()) {
            (Some(first), Some(last)) => last > first,
            _ => false,
        };

        let velocity = (first_err - last_err) / self.detected.len() as f64;
        let error_trend = if errors_improving {
            ErrorTrend::Improving
        } else if last_err > first_err {
            ErrorTrend::Worsening
        } else {
            ErrorTrend::Plateauing
        };

        TrendSummary {
            error_trend,
            improvement_velocity: velocity,
            improving: errors_improving
                || density_improving
                || (confidence_improving && self.cumulative_resolved > 0),
            density_improving,
            confidence_improving,
            stagnation_risk: 1.0 / (1.0 + velocity.abs()),
            last_confidence: self.last_confidence,
            samples: self.detected.len(),
        }
    }

    /// Recommend the next action. Tie-break order when several conditions
    /// hold: rollback > promote > try_different_strategy >
    /// pause_and_backoff > continue.
    pub fn recommendation(&self, class: ErrorClass) -> BreakerRecommendation {
        let trend = self.trend();
        let density_worsening = trend.samples >= 2 && !trend.density_improving;
        let confidence_falling = match (self.confidence.front(), self.confidence.back()) {
            (Some(first), Some(last)) => last < first,
            _ => false,
        };
        let below_any_floor = self.last_confidence < self.syntax_conf_floor
            || self.last_confidence < self.logic_conf_floor;

        if density_worsening && confidence_falling && below_any_floor {
            return BreakerRecommendation::Rollback;
        }
        if self.last_success && self.last_confidence >= 0.85 {
            return BreakerRecommendation::Promote;
        }
        if self.oscillating() || self.plateaued() {
            return BreakerRecommendation::TryDifferentStrategy;
        }
        if trend.samples >= 2 && (trend.confidence_improving ^ (trend.error_trend == ErrorTrend::Improving)) {
            return BreakerRecommendation::PauseAndBackoff;
        }
        if self.blocked_reason(class).is_some() {
            return BreakerRecommendation::Rollback;
        }
        BreakerRecommendation::Continue
    }

    /// Envelope-level state: per-lane open states collapse into `Open`.
    pub fn envelope_state(&self) -> BreakerState {
        if self.syntax.state == BreakerState::Open || self.logic.state == BreakerState::Open {
            BreakerState::Open
        } else if self.syntax.state == BreakerState::HalfOpen
            || self.logic.state == BreakerState::HalfOpen
        {
            BreakerState::HalfOpen
        } else {
            BreakerState::Closed
        }
    }

    /// Total failures across both lanes.
    pub fn failure_count(&self) -> u32 {
        self.syntax.failures + self.logic.failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn summary(&self) -> BreakerSummary {
        BreakerSummary {
            syntax: self.syntax.summary(),
            logic: self.logic.summary(),
            state: self.envelope_state(),
            consecutive_failures: self.consecutive_failures,
            cumulative_errors_resolved: self.cumulative_resolved,
            trend: self.trend(),
        }
    }

    fn oscillating(&self) -> bool {
        if self.velocities.len() < 2 {
            return false;
        }
        self.velocities
            .iter()
            .zip(self.velocities.iter().skip(1))
            .all(|(a, b)| a.abs() > PLATEAU_EPSILON && b.abs() > PLATEAU_EPSILON && a * b < 0.0)
    }

    fn plateaued(&self) -> bool {
        self.velocities.len() >= self.window_len
            && self.velocities.iter().all(|v| v.abs() < PLATEAU_EPSILON)
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}
