//! Structured observability hooks for session and attempt lifecycle.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for the decision pipeline's key events
//!
//! Events are emitted at `info!` level; degradations (blocked breaker,
//! watchdog triggers, schema violations) use `warn!`.

use tracing::{info, warn};

/// RAII guard that enters a session-scoped span for the duration of a
/// patch session.
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    /// Create and enter a span tagged with the patch id.
    pub fn enter(patch_id: &str) -> Self {
        let span = tracing::info_span!("remedy.session", patch_id = %patch_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: attempt started.
pub fn emit_attempt_started(patch_id: &str, attempt: u32, class: &str) {
    info!(event = "attempt.started", patch_id = %patch_id, attempt = attempt, class = %class);
}

/// Emit event: attempt finished with its verdict.
pub fn emit_attempt_finished(patch_id: &str, attempt: u32, success: bool, verdict: &str) {
    info!(
        event = "attempt.finished",
        patch_id = %patch_id,
        attempt = attempt,
        success = success,
        verdict = %verdict,
    );
}

/// Emit event: breaker denied the attempt.
pub fn emit_breaker_blocked(patch_id: &str, reason: &str) {
    warn!(event = "breaker.blocked", patch_id = %patch_id, reason = %reason);
}

/// Emit event: cascade tracker called a stop.
pub fn emit_cascade_stop(patch_id: &str, reason: &str, depth: u32) {
    warn!(event = "cascade.stop", patch_id = %patch_id, reason = %reason, depth = depth);
}

/// Emit event: watchdog trigger with its escalated severity.
pub fn emit_watchdog_event(patch_id: &str, severity: &str, consecutive: u32) {
    warn!(
        event = "watchdog.triggered",
        patch_id = %patch_id,
        severity = %severity,
        consecutive = consecutive,
    );
}

/// Emit event: risk keyword matched in the candidate patch.
pub fn emit_risk_flagged(patch_id: &str, keyword: &str) {
    warn!(event = "risk.flagged", patch_id = %patch_id, keyword = %keyword);
}

/// Emit event: advisor consult completed (or degraded to a tweak).
pub fn emit_consult(patch_id: &str, accepted: bool, source: &str) {
    info!(event = "consult.finished", patch_id = %patch_id, accepted = accepted, source = %source);
}

/// Emit event: terminal envelope validation failed (fatal).
pub fn emit_schema_violation(patch_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "envelope.schema_violation", patch_id = %patch_id, error = %error);
}

/// Emit event: session finished with its final verdict.
pub fn emit_session_finished(patch_id: &str, verdict: &str, attempts: u32, success: bool) {
    info!(
        event = "session.finished",
        patch_id = %patch_id,
        verdict = %verdict,
        attempts = attempts,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    // Emission functions must not panic without a subscriber installed.
    #[test]
    fn test_emitters_are_safe_without_subscriber() {
        let _span = SessionSpan::enter("patch-1");
        emit_attempt_started("patch-1", 1, "syntax");
        emit_attempt_finished("patch-1", 1, true, "promote");
        emit_breaker_blocked("patch-1", "attempts exceeded");
        emit_cascade_stop("patch-1", "depth", 6);
        emit_watchdog_event("patch-1", "high", 2);
        emit_risk_flagged("patch-1", "auth_bypass");
        emit_consult("patch-1", false, "minimal_tweak");
        emit_schema_violation("patch-1", &"missing field");
        emit_session_finished("patch-1", "promote", 1, true);
    }
}
