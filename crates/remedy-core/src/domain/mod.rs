//! Domain models for the Remedy engine.
//!
//! Canonical definitions for the core entities:
//! - `PatchEnvelope`: per-session audit record with helper-only mutation
//! - `ErrorClass` / `Verdict` / `BreakerState`: closed decision sets
//! - canonical JSON digests and the draft-07 envelope schema

pub mod digest;
pub mod envelope;
pub mod error;
pub mod schema;
pub mod taxonomy;

pub use digest::{canonicalize, stable_digest};
pub use envelope::{
    clamp_unit, AttemptRecord, BreakerSnapshot, CalibrationMethod, ConfidenceComponents, Counters,
    LimitsHit, PatchData, PatchEnvelope, ResourceLimits, ResourceObserved, ResourceUsage,
    TimelineEntry, TrendMetadata,
};
pub use error::{EngineError, Result};
pub use schema::{envelope_schema, validate_envelope};
pub use taxonomy::{BreakerLane, BreakerState, ErrorClass, ErrorTrend, Verdict};
