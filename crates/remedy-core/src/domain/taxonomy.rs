//! Closed sets used throughout the engine: error classes, verdicts,
//! breaker states, and trend directions.

use serde::{Deserialize, Serialize};

/// Error class assigned to every attempt. Exactly one per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Syntax,
    Logic,
    Runtime,
    Performance,
    Security,
}

impl ErrorClass {
    /// Severity rank used by cascade escalation detection.
    ///
    /// Order: `Security > Runtime > Logic > Syntax > Performance`.
    pub fn severity_rank(self) -> u8 {
        match self {
            Self::Performance => 0,
            Self::Syntax => 1,
            Self::Logic => 2,
            Self::Runtime => 3,
            Self::Security => 4,
        }
    }

    /// Which breaker lane this class is budgeted under.
    ///
    /// Syntax errors have their own lane; everything else shares the
    /// logic lane (runtime, performance, and security failures consume
    /// the logic budget).
    pub fn breaker_lane(self) -> BreakerLane {
        match self {
            Self::Syntax => BreakerLane::Syntax,
            _ => BreakerLane::Logic,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::Logic => write!(f, "logic"),
            Self::Runtime => write!(f, "runtime"),
            Self::Performance => write!(f, "performance"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// The two budget lanes of the dual circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerLane {
    Syntax,
    Logic,
}

/// Per-attempt decision produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Promote,
    Retry,
    Rollback,
    Stop,
    HumanReview,
    PauseAndBackoff,
    StrategyChange,
}

impl Verdict {
    /// Terminal verdicts finalize the envelope and end the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Promote | Self::Rollback | Self::HumanReview)
    }

    /// Whether the session loop exits on this verdict.
    ///
    /// `Stop` is not terminal in the envelope sense but still ends the loop.
    pub fn ends_session(self) -> bool {
        self.is_terminal() || matches!(self, Self::Stop)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Promote => write!(f, "promote"),
            Self::Retry => write!(f, "retry"),
            Self::Rollback => write!(f, "rollback"),
            Self::Stop => write!(f, "stop"),
            Self::HumanReview => write!(f, "human_review"),
            Self::PauseAndBackoff => write!(f, "pause_and_backoff"),
            Self::StrategyChange => write!(f, "strategy_change"),
        }
    }
}

/// Envelope-level breaker state. Per-lane open states collapse into `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Direction of the error trend over the breaker's sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTrend {
    Improving,
    Worsening,
    Plateauing,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(ErrorClass::Security.severity_rank() > ErrorClass::Runtime.severity_rank());
        assert!(ErrorClass::Runtime.severity_rank() > ErrorClass::Logic.severity_rank());
        assert!(ErrorClass::Logic.severity_rank() > ErrorClass::Syntax.severity_rank());
        assert!(ErrorClass::Syntax.severity_rank() > ErrorClass::Performance.severity_rank());
    }

    #[test]
    fn test_breaker_lane_mapping() {
        assert_eq!(ErrorClass::Syntax.breaker_lane(), BreakerLane::Syntax);
        assert_eq!(ErrorClass::Logic.breaker_lane(), BreakerLane::Logic);
        assert_eq!(ErrorClass::Runtime.breaker_lane(), BreakerLane::Logic);
        assert_eq!(ErrorClass::Security.breaker_lane(), BreakerLane::Logic);
    }

    #[test]
    fn test_terminal_verdicts() {
        assert!(Verdict::Promote.is_terminal());
        assert!(Verdict::Rollback.is_terminal());
        assert!(Verdict::HumanReview.is_terminal());
        assert!(!Verdict::Retry.is_terminal());
        assert!(!Verdict::Stop.is_terminal());
        assert!(Verdict::Stop.ends_session());
        assert!(!Verdict::PauseAndBackoff.ends_session());
    }

    #[test]
    fn test_serde_spellings() {
        assert_eq!(
            serde_json::to_string(&Verdict::PauseAndBackoff).unwrap(),
            "\"pause_and_backoff\""
        );
        assert_eq!(
            serde_json::to_string(&BreakerState::HalfOpen).unwrap(),
            "\"half_open\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorTrend::Plateauing).unwrap(),
            "\"plateauing\""
        );
        let back: ErrorClass = serde_json::from_str("\"security\"").unwrap();
        assert_eq!(back, ErrorClass::Security);
    }
}
