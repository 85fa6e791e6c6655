//! The patch envelope: canonical per-session state record.
//!
//! One envelope per patch session. All mutation goes through the helper
//! methods on [`PatchEnvelope`]; the helper layer is the audit boundary
//! and enforces the envelope invariants:
//!
//! - `success` latches: once true it never goes back to false
//! - `attempts` and `timeline` are append-only
//! - every confidence/quality field is clamped to `[0, 1]` on write
//! - the stable hash covers a canonical subset that excludes the
//!   volatile fields (`attempts`, `timestamp`, `timeline`, developer
//!   message/reason, and the hash itself)
//!
//! The serialized form carries the legacy alias pairs
//! `flagged_for_developer`/`flaggedForDeveloper` and
//! `developer_message`/`developerMessage`, written together from one
//! canonical in-memory field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::digest::stable_digest;
use super::error::{EngineError, Result};
use super::taxonomy::{BreakerState, ErrorClass, ErrorTrend, Verdict};

/// Clamp a numeric field into the unit interval; non-finite inputs become 0.
pub fn clamp_unit(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

/// How the overall confidence was calibrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Temperature,
    Beta,
}

/// Calibrated confidence components, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    pub overall: f64,
    pub syntax: f64,
    pub logic: f64,
    pub risk: f64,
    pub calibration_method: CalibrationMethod,
}

impl Default for ConfidenceComponents {
    fn default() -> Self {
        Self {
            overall: 0.0,
            syntax: 0.0,
            logic: 0.0,
            risk: 0.0,
            calibration_method: CalibrationMethod::Temperature,
        }
    }
}

/// Breaker state captured alongside each attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
}

/// One attempt, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub ts: DateTime<Utc>,
    pub success: bool,
    pub note: String,
    pub breaker_snapshot: BreakerSnapshot,
}

/// Trend metadata mirrored from the breaker after each attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMetadata {
    pub errors_detected: u32,
    pub errors_resolved: u32,
    pub error_trend: ErrorTrend,
    pub code_quality_score: Option<f64>,
    pub improvement_velocity: Option<f64>,
    pub stagnation_risk: Option<f64>,
}

impl Default for TrendMetadata {
    fn default() -> Self {
        Self {
            errors_detected: 0,
            errors_resolved: 0,
            error_trend: ErrorTrend::Unknown,
            code_quality_score: None,
            improvement_velocity: None,
            stagnation_risk: None,
        }
    }
}

/// Resource ceilings handed to the sandbox port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_wall_ms: u64,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_wall_ms: 30_000,
            max_memory_mb: 512,
            max_cpu_percent: 100.0,
        }
    }
}

/// Which limits the sandbox reported hitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsHit {
    pub time: bool,
    pub memory: bool,
    pub cpu: bool,
}

/// Observed consumption for the last completed attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObserved {
    pub wall_ms: u64,
    pub memory_mb: u64,
    pub cpu_percent: f64,
    pub limits_hit: LimitsHit,
}

/// Limits plus last observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub limits: ResourceLimits,
    pub observed: ResourceObserved,
}

/// Attempt counters kept in lockstep with the attempts log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: u32,
    pub syntax: u32,
    pub logic: u32,
    pub errors_resolved_total: u32,
}

/// Timeline entry, volatile with respect to the envelope hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub attempt: u32,
    pub verdict: Verdict,
    pub ts: DateTime<Utc>,
    pub breaker_state: BreakerState,
    pub cascade_depth: u32,
}

/// Immutable patch payload captured at session start; `patched_code`
/// tracks the current candidate across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
    pub language: String,
    pub original_code: String,
    pub patched_code: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct DeveloperFlag {
    flagged: bool,
    message: String,
    reason_code: Option<String>,
}

/// The canonical per-session state record.
///
/// Construct with [`PatchEnvelope::new`]; mutate only through helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEnvelope {
    patch_id: Uuid,
    patch_data: PatchData,
    policy_snapshot: Value,
    attempts: Vec<AttemptRecord>,
    confidence: ConfidenceComponents,
    trend: TrendMetadata,
    breaker_state: BreakerState,
    cascade_depth: u32,
    resource_usage: ResourceUsage,
    developer_flag: DeveloperFlag,
    success: bool,
    counters: Counters,
    timeline: Vec<TimelineEntry>,
    metadata: Value,
    timestamp: Option<DateTime<Utc>>,
    envelope_hash: Option<String>,
}

impl PatchEnvelope {
    pub fn new(
        patch_id: Uuid,
        language: impl Into<String>,
        original_code: impl Into<String>,
        patched_code: impl Into<String>,
        policy_snapshot: Value,
    ) -> Self {
        Self {
            patch_id,
            patch_data: PatchData {
                language: language.into(),
                original_code: original_code.into(),
                patched_code: patched_code.into(),
            },
            policy_snapshot,
            attempts: Vec::new(),
            confidence: ConfidenceComponents::default(),
            trend: TrendMetadata::default(),
            breaker_state: BreakerState::Closed,
            cascade_depth: 0,
            resource_usage: ResourceUsage::default(),
            developer_flag: DeveloperFlag::default(),
            success: false,
            counters: Counters::default(),
            timeline: Vec::new(),
            metadata: Value::Null,
            timestamp: None,
            envelope_hash: None,
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn patch_id(&self) -> Uuid {
        self.patch_id
    }

    pub fn patch_data(&self) -> &PatchData {
        &self.patch_data
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn confidence(&self) -> &ConfidenceComponents {
        &self.confidence
    }

    pub fn trend(&self) -> &TrendMetadata {
        &self.trend
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker_state
    }

    pub fn cascade_depth(&self) -> u32 {
        self.cascade_depth
    }

    pub fn resource_usage(&self) -> &ResourceUsage {
        &self.resource_usage
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn flagged_for_developer(&self) -> bool {
        self.developer_flag.flagged
    }

    pub fn developer_message(&self) -> &str {
        &self.developer_flag.message
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn envelope_hash(&self) -> Option<&str> {
        self.envelope_hash.as_deref()
    }

    // ------------------------------------------------------------------
    // Helper-mediated mutation
    // ------------------------------------------------------------------

    /// Append one attempt. Append-only; records are never edited.
    pub fn append_attempt(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    /// Write confidence components, clamped to `[0, 1]`.
    pub fn merge_confidence(&mut self, components: &ConfidenceComponents) {
        self.confidence = ConfidenceComponents {
            overall: clamp_unit(components.overall),
            syntax: clamp_unit(components.syntax),
            logic: clamp_unit(components.logic),
            risk: clamp_unit(components.risk),
            calibration_method: components.calibration_method,
        };
    }

    /// Replace the trend metadata, clamping the optional unit fields.
    pub fn update_trend(&mut self, trend: TrendMetadata) {
        self.trend = TrendMetadata {
            code_quality_score: trend.code_quality_score.map(clamp_unit),
            improvement_velocity: trend.improvement_velocity.map(clamp_unit),
            stagnation_risk: trend.stagnation_risk.map(clamp_unit),
            ..trend
        };
    }

    pub fn set_breaker_state(&mut self, state: BreakerState) {
        self.breaker_state = state;
    }

    pub fn set_cascade_depth(&mut self, depth: u32) {
        self.cascade_depth = depth;
    }

    /// Overwrite the observation with the last completed attempt's usage;
    /// limits are retained unless the incoming usage carries its own.
    pub fn merge_resource_usage(&mut self, usage: ResourceUsage) {
        self.resource_usage = usage;
    }

    /// Set or clear the developer escalation flag.
    pub fn apply_developer_flag(
        &mut self,
        flagged: bool,
        message: impl Into<String>,
        reason_code: Option<String>,
    ) {
        self.developer_flag = DeveloperFlag {
            flagged,
            message: message.into(),
            reason_code,
        };
    }

    /// Latching success: a true write sticks, later false writes are ignored.
    pub fn mark_success(&mut self, success: bool) {
        if success {
            self.success = true;
        }
    }

    pub fn set_timestamp(&mut self, ts: DateTime<Utc>) {
        self.timestamp = Some(ts);
    }

    /// Bump the total counter plus the per-lane counter for `class`, and
    /// accumulate resolved errors.
    pub fn update_counters(&mut self, class: ErrorClass, errors_resolved: u32) {
        self.counters.total += 1;
        match class {
            ErrorClass::Syntax => self.counters.syntax += 1,
            _ => self.counters.logic += 1,
        }
        self.counters.errors_resolved_total += errors_resolved;
    }

    pub fn add_timeline_entry(&mut self, entry: TimelineEntry) {
        self.timeline.push(entry);
    }

    /// Update the current candidate patch for the next attempt.
    pub fn set_patch_code(&mut self, code: impl Into<String>) {
        self.patch_data.patched_code = code.into();
    }

    /// Stamp caller-supplied metadata onto the envelope.
    pub fn stamp_metadata(&mut self, metadata: Value) {
        self.metadata = metadata;
    }

    // ------------------------------------------------------------------
    // Hashing and serialization
    // ------------------------------------------------------------------

    /// Compute and store the stable hash over the canonical subset.
    pub fn set_hash(&mut self) -> Result<()> {
        let digest = stable_digest(&self.hash_basis())?;
        self.envelope_hash = Some(digest);
        Ok(())
    }

    /// Recompute the hash without storing it.
    pub fn compute_hash(&self) -> Result<String> {
        stable_digest(&self.hash_basis())
    }

    /// The hash domain: the serialized envelope minus the volatile fields.
    fn hash_basis(&self) -> Value {
        let mut value = self.to_value();
        if let Value::Object(map) = &mut value {
            for volatile in [
                "attempts",
                "timestamp",
                "timeline",
                "developer_message",
                "developerMessage",
                "developer_flag_reason",
                "envelope_hash",
            ] {
                map.remove(volatile);
            }
        }
        value
    }

    /// Serialize to the canonical wire shape, including alias pairs.
    pub fn to_value(&self) -> Value {
        json!({
            "patch_id": self.patch_id,
            "patch_data": self.patch_data,
            "policy_snapshot": self.policy_snapshot,
            "attempts": self.attempts,
            "confidenceComponents": self.confidence,
            "trendMetadata": self.trend,
            "breakerState": self.breaker_state,
            "cascadeDepth": self.cascade_depth,
            "resourceUsage": self.resource_usage,
            "flagged_for_developer": self.developer_flag.flagged,
            "flaggedForDeveloper": self.developer_flag.flagged,
            "developer_message": self.developer_flag.message,
            "developerMessage": self.developer_flag.message,
            "developer_flag_reason": self.developer_flag.reason_code,
            "success": self.success,
            "counters": self.counters,
            "timeline": self.timeline,
            "metadata": self.metadata,
            "timestamp": self.timestamp.map(|t| t.to_rfc3339()),
            "envelope_hash": self.envelope_hash,
        })
    }

    /// Parse an envelope back from its wire shape. Either alias spelling
    /// is accepted; when both are present the snake_case one wins.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::InvalidInput("envelope must be an object".to_string()))?;

        let field = |name: &str| -> Result<&Value> {
            obj.get(name)
                .ok_or_else(|| EngineError::InvalidInput(format!("envelope missing `{name}`")))
        };

        let flagged = obj
            .get("flagged_for_developer")
            .or_else(|| obj.get("flaggedForDeveloper"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let message = obj
            .get("developer_message")
            .or_else(|| obj.get("developerMessage"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reason_code = obj
            .get("developer_flag_reason")
            .and_then(Value::as_str)
            .map(str::to_string);

        let timestamp = match obj.get("timestamp") {
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| EngineError::InvalidInput(format!("bad timestamp: {e}")))?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        Ok(Self {
            patch_id: serde_json::from_value(field("patch_id")?.clone())?,
            patch_data: serde_json::from_value(field("patch_data")?.clone())?,
            policy_snapshot: obj.get("policy_snapshot").cloned().unwrap_or(Value::Null),
            attempts: serde_json::from_value(field("attempts")?.clone())?,
            confidence: serde_json::from_value(field("confidenceComponents")?.clone())?,
            trend: serde_json::from_value(field("trendMetadata")?.clone())?,
            breaker_state: serde_json::from_value(field("breakerState")?.clone())?,
            cascade_depth: serde_json::from_value(field("cascadeDepth")?.clone())?,
            resource_usage: serde_json::from_value(field("resourceUsage")?.clone())?,
            developer_flag: DeveloperFlag {
                flagged,
                message,
                reason_code,
            },
            success: field("success")?.as_bool().unwrap_or(false),
            counters: obj
                .get("counters")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()?
                .unwrap_or_default(),
            timeline: obj
                .get("timeline")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()?
                .unwrap_or_default(),
            metadata: obj.get("metadata").cloned().unwrap_or(Value::Null),
            timestamp,
            envelope_hash: obj
                .get("envelope_hash")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

impl Serialize for PatchEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PatchEnvelope {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}
