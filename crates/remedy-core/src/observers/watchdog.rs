//! Hang watchdog: flags attempts whose resource profile looks stuck and
//! escalates severity over consecutive triggers.
//!
//! Severity starts at `suspicious`. An egregious signal (a limit was hit,
//! or wall-clock at least doubled the threshold) is `high` immediately;
//! otherwise consecutive triggered attempts walk the ladder
//! `suspicious -> likely_hang -> high` at policy-configured counts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::ResourceUsage;
use crate::policy::EnginePolicy;

/// Watchdog severity ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogSeverity {
    Suspicious,
    LikelyHang,
    High,
}

impl std::fmt::Display for WatchdogSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspicious => write!(f, "suspicious"),
            Self::LikelyHang => write!(f, "likely_hang"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A triggered watchdog observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogEvent {
    pub attempt_key: String,
    pub severity: WatchdogSeverity,
    pub triggers: Vec<String>,
    pub consecutive: u32,
}

/// Per-session hang watchdog.
#[derive(Debug)]
pub struct HangWatchdog {
    wall_threshold_ms: u64,
    cpu_threshold: f64,
    likely_hang_after: u32,
    high_after: u32,
    consecutive: u32,
    open: HashSet<String>,
    history: Vec<WatchdogEvent>,
}

impl HangWatchdog {
    pub fn new(policy: &EnginePolicy) -> Self {
        Self {
            wall_threshold_ms: policy.wall_threshold_ms,
            cpu_threshold: policy.cpu_threshold_percent,
            likely_hang_after: policy.watchdog_likely_hang_after.max(2),
            high_after: policy.watchdog_high_after.max(3),
            consecutive: 0,
            open: HashSet::new(),
            history: Vec::new(),
        }
    }

    /// Mark an attempt as under observation.
    pub fn begin(&mut self, attempt_key: impl Into<String>) {
        self.open.insert(attempt_key.into());
    }

    /// Close out an attempt with its observed resource usage. Returns an
    /// event when any trigger fired.
    pub fn end(&mut self, attempt_key: &str, usage: &ResourceUsage) -> Option<WatchdogEvent> {
        self.open.remove(attempt_key);

        let mut triggers = Vec::new();
        let observed = &usage.observed;
        if observed.wall_ms > self.wall_threshold_ms {
            triggers.push(format!(
                "wall clock {}ms over threshold {}ms",
                observed.wall_ms, self.wall_threshold_ms
            ));
        }
        if observed.cpu_percent >= self.cpu_threshold {
            triggers.push(format!("cpu {}% at threshold", observed.cpu_percent));
        }
        if observed.limits_hit.time {
            triggers.push("time limit hit".to_string());
        }
        if observed.limits_hit.memory {
            triggers.push("memory limit hit".to_string());
        }
        if observed.limits_hit.cpu {
            triggers.push("cpu limit hit".to_string());
        }

        if triggers.is_empty() {
            self.consecutive = 0;
            return None;
        }

        self.consecutive += 1;

        let any_limit_hit =
            observed.limits_hit.time || observed.limits_hit.memory || observed.limits_hit.cpu;
        let egregious = any_limit_hit || observed.wall_ms >= self.wall_threshold_ms * 2;
        let signal = if egregious {
            WatchdogSeverity::High
        } else {
            WatchdogSeverity::Suspicious
        };
        let laddered = if self.consecutive >= self.high_after {
            WatchdogSeverity::High
        } else if self.consecutive >= self.likely_hang_after {
            WatchdogSeverity::LikelyHang
        } else {
            WatchdogSeverity::Suspicious
        };

        let event = WatchdogEvent {
            attempt_key: attempt_key.to_string(),
            severity: signal.max(laddered),
            triggers,
            consecutive: self.consecutive,
        };
        self.history.push(event.clone());
        Some(event)
    }

    /// Consecutive triggered attempts so far.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// All triggered events this session.
    pub fn history(&self) -> &[WatchdogEvent] {
        &self.history
    }

    /// Highest severity observed this session.
    pub fn highest_severity(&self) -> Option<WatchdogSeverity> {
        self.history.iter().map(|e| e.severity).max()
    }
}
