//! Confidence scoring: temperature-scaled softmax over advisor logits,
//! class-specific projections, historical component factors, and a
//! bounded beta-calibration ring.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::{
    clamp_unit, CalibrationMethod, ConfidenceComponents, EngineError, ErrorClass, Result,
};
use crate::policy::EnginePolicy;

/// Calibration ring capacity.
const CALIBRATION_CAP: usize = 1000;
/// Minimum samples before the empirical blend kicks in.
const CALIBRATION_MIN_SAMPLES: usize = 10;

/// Historical signals blended into the raw softmax confidence.
///
/// All fields live in `[0, 1]` except `complexity`, which counts
/// structural units (1.0 = trivial patch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryHint {
    pub historical_success_rate: f64,
    pub pattern_similarity: f64,
    pub complexity: f64,
    pub test_coverage: f64,
}

impl Default for HistoryHint {
    fn default() -> Self {
        Self {
            historical_success_rate: 1.0,
            pattern_similarity: 1.0,
            complexity: 1.0,
            test_coverage: 1.0,
        }
    }
}

/// Turns raw advisor logits plus history into calibrated confidence.
#[derive(Debug)]
pub struct ConfidenceScorer {
    temperature: f64,
    calibration: VecDeque<(f64, bool)>,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ConfidenceScorer {
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature: if temperature > 0.0 { temperature } else { 1.0 },
            calibration: VecDeque::with_capacity(CALIBRATION_MIN_SAMPLES),
        }
    }

    /// Score an attempt.
    ///
    /// Non-finite logits are treated as zero; an empty slice is
    /// `InvalidInput`.
    pub fn score(
        &self,
        logits: &[f64],
        class: ErrorClass,
        hint: Option<&HistoryHint>,
    ) -> Result<ConfidenceComponents> {
        if logits.is_empty() {
            return Err(EngineError::InvalidInput("empty logits".to_string()));
        }

        let p_max = self.softmax_peak(logits);

        let syntax_conf = match class {
            ErrorClass::Syntax => (1.2 * p_max).min(1.0),
            _ => p_max,
        };
        let logic_conf = match class {
            ErrorClass::Logic | ErrorClass::Runtime => 0.9 * p_max,
            _ => p_max,
        };

        let default_hint = HistoryHint::default();
        let hint = hint.unwrap_or(&default_hint);
        let complexity_penalty = (1.0 - 0.1 * (hint.complexity - 1.0)).max(0.1);
        let coverage_boost = 0.5 + 0.5 * clamp_unit(hint.test_coverage);
        let factors = clamp_unit(hint.historical_success_rate)
            * clamp_unit(hint.pattern_similarity)
            * complexity_penalty
            * coverage_boost;

        let base = match class {
            ErrorClass::Syntax => syntax_conf,
            ErrorClass::Logic | ErrorClass::Runtime => logic_conf,
            _ => (syntax_conf + logic_conf) / 2.0,
        };

        let raw = clamp_unit(base * factors);
        let (overall, method) = self.calibrate(raw);

        Ok(ConfidenceComponents {
            overall,
            syntax: clamp_unit(syntax_conf * factors),
            logic: clamp_unit(logic_conf * factors),
            risk: clamp_unit(1.0 - overall),
            calibration_method: method,
        })
    }

    /// Record the true outcome of a scored attempt into the ring.
    pub fn record_outcome(&mut self, confidence: f64, correct: bool) {
        if self.calibration.len() == CALIBRATION_CAP {
            self.calibration.pop_front();
        }
        self.calibration.push_back((clamp_unit(confidence), correct));
    }

    /// Samples currently held in the calibration ring.
    pub fn calibration_samples(&self) -> usize {
        self.calibration.len()
    }

    fn softmax_peak(&self, logits: &[f64]) -> f64 {
        let scaled: Vec<f64> = logits
            .iter()
            .map(|l| if l.is_finite() { l / self.temperature } else { 0.0 })
            .collect();
        // Shift by the max for numerical stability.
        let peak = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = scaled.iter().map(|z| (z - peak).exp()).collect();
        let sum: f64 = exp.iter().sum();
        if sum == 0.0 {
            return 0.0;
        }
        exp.iter().cloned().fold(0.0, f64::max) / sum
    }

    fn calibrate(&self, raw: f64) -> (f64, CalibrationMethod) {
        if self.calibration.len() < CALIBRATION_MIN_SAMPLES {
            return (raw, CalibrationMethod::Temperature);
        }
        let correct = self.calibration.iter().filter(|(_, c)| *c).count();
        let empirical = correct as f64 / self.calibration.len() as f64;
        (
            clamp_unit(0.7 * raw + 0.3 * empirical),
            CalibrationMethod::Beta,
        )
    }
}

/// Whether the class-appropriate confidence clears the policy floor.
///
/// At the floor exactly the attempt proceeds; strictly below it stops.
/// Returns the floor that applied alongside the decision.
pub fn should_attempt(
    components: &ConfidenceComponents,
    class: ErrorClass,
    policy: &EnginePolicy,
) -> (bool, f64) {
    let (value, floor) = match class {
        ErrorClass::Syntax => (components.syntax, policy.syntax_conf_floor),
        _ => (components.logic, policy.logic_conf_floor),
    };
    (value >= floor, floor)
}
