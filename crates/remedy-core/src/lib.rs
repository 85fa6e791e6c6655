//! Remedy Core Library
//!
//! A self-healing patch orchestrator: given a reported program error, a
//! candidate patch, and the original code, the decision engine fuses
//! confidence scoring, dual circuit breaking, cascade tracking, risk and
//! hang observers, and a tamper-evident envelope into a per-attempt
//! verdict. The session loop orchestrates repeated attempts with
//! adaptive backoff and advisor consults.

pub mod backoff;
pub mod breaker;
pub mod cascade;
pub mod domain;
pub mod engine;
pub mod memory;
pub mod obs;
pub mod observers;
pub mod policy;
pub mod ports;
pub mod scorer;
pub mod session;
pub mod strategy;
pub mod telemetry;
pub mod tweak;

pub use backoff::{recommend as recommend_backoff, BackoffDecision, WaitBounds};
pub use breaker::{
    BreakerRecommendation, BreakerSummary, DualCircuitBreaker, LaneSummary, TrendSummary,
};
pub use cascade::{CascadeEntry, CascadeTracker};
pub use domain::{
    canonicalize, envelope_schema, stable_digest, validate_envelope, AttemptRecord,
    BreakerSnapshot, BreakerState, CalibrationMethod, ConfidenceComponents, Counters, EngineError,
    ErrorClass, ErrorTrend, LimitsHit, PatchData, PatchEnvelope, ResourceLimits, ResourceObserved,
    ResourceUsage, Result, TimelineEntry, TrendMetadata, Verdict,
};
pub use engine::{AttemptExtras, AttemptOutcome, AttemptRequest, Engine, EnginePorts};
pub use memory::{MemoryMetrics, MemoryRecord, ResilientMemory};
pub use observers::{
    evaluate_risk, HangWatchdog, RiskFlag, WatchdogEvent, WatchdogSeverity,
};
pub use policy::EnginePolicy;
pub use ports::{
    extract_code_block, Advisor, AdvisorReply, BasicSanitizer, ChatMessage, ChatRole, ChatStore,
    Clock, InMemoryChatStore, JitterRng, Sandbox, SandboxOutcome, SandboxRequest,
    SanitizeConstraints, SanitizeOutcome, Sanitizer, SystemClock, TestResult, ThreadJitterRng,
};
pub use scorer::{should_attempt, ConfidenceScorer, HistoryHint};
pub use session::{run_session, SessionOutcome, SessionRequest, WatchdogAggregate};
pub use strategy::{select_strategy, PlanContext, PlanResult, Strategy};
pub use telemetry::init_tracing;
pub use tweak::apply_minimal_tweak;

/// Remedy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
