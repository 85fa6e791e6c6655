//! Repair strategies: tagged variants selected from observer output.
//!
//! Selection is a pure function of the breaker recommendation and the
//! risk flags; a strategy plans the next move without executing anything.

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerRecommendation;
use crate::domain::ErrorClass;
use crate::observers::RiskFlag;

/// Available repair strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LogAndFix,
    Rollback,
    SecurityAudit,
}

/// Inputs a strategy plans against.
#[derive(Debug, Clone)]
pub struct PlanContext<'a> {
    pub class: ErrorClass,
    pub message: &'a str,
    pub flags: &'a [RiskFlag],
    pub recommendation: BreakerRecommendation,
}

/// Ordered, non-executing plan for the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub strategy: Strategy,
    pub actions: Vec<String>,
}

impl Strategy {
    /// Produce the ordered action plan for this strategy.
    pub fn plan(self, ctx: &PlanContext<'_>) -> PlanResult {
        let actions = match self {
            Strategy::LogAndFix => vec![
                format!("log {} error: {}", ctx.class, ctx.message),
                "apply candidate patch in sandbox".to_string(),
                "verify tests and resource usage".to_string(),
            ],
            Strategy::Rollback => vec![
                "restore original code".to_string(),
                format!("archive failed patch for {} review", ctx.class),
            ],
            Strategy::SecurityAudit => {
                let mut actions = vec!["halt automated patching".to_string()];
                for flag in ctx.flags {
                    actions.push(format!("audit keyword match `{}`", flag.keyword));
                }
                actions.push("route to human reviewer".to_string());
                actions
            }
        };
        PlanResult {
            strategy: self,
            actions,
        }
    }
}

/// Pure strategy selection from the observer suggestion.
pub fn select_strategy(recommendation: BreakerRecommendation, flags: &[RiskFlag]) -> Strategy {
    if !flags.is_empty() {
        return Strategy::SecurityAudit;
    }
    match recommendation {
        BreakerRecommendation::Rollback => Strategy::Rollback,
        _ => Strategy::LogAndFix,
    }
}
