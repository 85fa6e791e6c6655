//! The decision engine: one `process_attempt` call per attempt, fusing
//! scorer, breaker, cascade, observers, sandbox, and envelope into a
//! single verdict.
//!
//! Pipeline order is strict: rate limit, envelope update, risk gate,
//! scoring, breaker gate, cascade gate, confidence floor, sandboxed
//! execution under the watchdog, delta analysis, state updates, verdict
//! mapping, envelope finalization, schema validation.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breaker::{BreakerRecommendation, BreakerSummary, DualCircuitBreaker};
use crate::cascade::CascadeTracker;
use crate::domain::{
    validate_envelope, AttemptRecord, BreakerSnapshot, ConfidenceComponents, EngineError,
    ErrorClass, PatchEnvelope, Result, TimelineEntry, TrendMetadata, Verdict,
};
use crate::memory::{MemoryMetrics, ResilientMemory};
use crate::obs;
use crate::observers::{
    evaluate_risk, HangWatchdog, RiskFlag, WatchdogEvent, WatchdogSeverity,
};
use crate::policy::EnginePolicy;
use crate::ports::{
    ChatRole, ChatStore, Clock, InMemoryChatStore, JitterRng, Sandbox, SandboxOutcome,
    SandboxRequest, Sanitizer,
};
use crate::scorer::{should_attempt, ConfidenceScorer, HistoryHint};
use crate::strategy::{select_strategy, PlanContext, PlanResult};

/// Rate-limit window, fixed at one minute.
const RATE_WINDOW_MS: u64 = 60_000;

/// The ports an engine executes against.
pub struct EnginePorts {
    pub sandbox: Arc<dyn Sandbox>,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<dyn JitterRng>,
    pub sanitizer: Arc<dyn Sanitizer>,
}

/// Inputs for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRequest {
    pub class: ErrorClass,
    pub message: String,
    pub patch_code: String,
    pub original_code: String,
    pub language: String,
    pub logits: Vec<f64>,
    pub history: Option<HistoryHint>,
    /// Caller-observed error count for this attempt; inferred from the
    /// sandbox result when absent.
    pub errors_detected: Option<u32>,
    /// Caller-observed resolved count; inferred from the previous
    /// attempt's detected count when absent.
    pub errors_resolved: Option<u32>,
    pub metadata: Option<Value>,
}

/// Everything beyond the verdict that callers may want to inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptExtras {
    pub confidence: ConfidenceComponents,
    pub breaker: BreakerSummary,
    pub cascade_depth: u32,
    pub risk_flags: Vec<RiskFlag>,
    pub watchdog: Option<WatchdogEvent>,
    pub recommendation: Option<BreakerRecommendation>,
    pub plan: Option<PlanResult>,
    pub blocked_reason: Option<String>,
}

/// Verdict plus envelope snapshot plus extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub verdict: Verdict,
    pub snapshot: Value,
    pub extras: AttemptExtras,
}

/// A single engine instance: all cross-cutting state lives here, no
/// globals. Distinct sessions run on distinct engines.
pub struct Engine {
    policy: EnginePolicy,
    scorer: ConfidenceScorer,
    breaker: DualCircuitBreaker,
    cascade: CascadeTracker,
    watchdog: HangWatchdog,
    memory: ResilientMemory,
    chat: InMemoryChatStore,
    rate_stamps: VecDeque<u64>,
    prev_errors_detected: Option<u32>,
    ports: EnginePorts,
}

impl Engine {
    pub fn new(policy: EnginePolicy, ports: EnginePorts) -> Self {
        Self {
            scorer: ConfidenceScorer::default(),
            breaker: DualCircuitBreaker::new(&policy),
            cascade: CascadeTracker::new(policy.max_cascade_depth),
            watchdog: HangWatchdog::new(&policy),
            memory: ResilientMemory::new(policy.memory_max, policy.memory_ttl_ms),
            chat: InMemoryChatStore::default(),
            rate_stamps: VecDeque::new(),
            prev_errors_detected: None,
            policy,
            ports,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn memory_metrics(&self) -> MemoryMetrics {
        self.memory.metrics()
    }

    pub fn chat_tail(&self, n: usize) -> Vec<crate::ports::ChatMessage> {
        self.chat.tail(n)
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.ports.clock
    }

    pub(crate) fn rng(&self) -> &Arc<dyn JitterRng> {
        &self.ports.rng
    }

    pub(crate) fn sanitizer(&self) -> &Arc<dyn Sanitizer> {
        &self.ports.sanitizer
    }

    pub(crate) fn append_chat(&mut self, role: ChatRole, content: String, meta: Option<Value>) {
        let ts = self.ports.clock.now_ms();
        self.chat.append(role, content, meta, ts);
    }

    /// Record a refused advisor proposal so later consults can see it.
    pub(crate) fn note_sanitizer_rejection(&mut self, patch_id: &str, reason: &str) {
        let now = self.ports.clock.now_ms();
        self.memory.add(
            serde_json::json!({
                "event": "sanitizer_reject",
                "patch_id": patch_id,
                "reason": reason,
            }),
            now,
        );
    }

    /// Past outcomes similar to `query`, for consult context.
    pub fn similar_outcomes(&self, query: &Value) -> Vec<Value> {
        self.memory
            .similar(query)
            .into_iter()
            .map(|r| r.envelope_json.clone())
            .collect()
    }

    /// Process one attempt against the session's envelope.
    pub async fn process_attempt(
        &mut self,
        envelope: &mut PatchEnvelope,
        request: &AttemptRequest,
    ) -> Result<AttemptOutcome> {
        // 1. Input validation and rate limiting.
        validate_request(request)?;
        self.enforce_rate_limit()?;

        let attempt_index = envelope.counters().total + 1;
        let patch_id = envelope.patch_id().to_string();
        obs::emit_attempt_started(&patch_id, attempt_index, &request.class.to_string());

        // 2. Update the envelope with the current candidate and metadata.
        envelope.set_patch_code(&request.patch_code);
        if let Some(metadata) = &request.metadata {
            envelope.stamp_metadata(metadata.clone());
        }

        // 3. Risk gate, ahead of any sandbox execution.
        let risk_flags = evaluate_risk(
            &request.patch_code,
            &request.original_code,
            &self.policy.risky_keywords,
        );
        if !risk_flags.is_empty() && self.policy.require_human_on_risky {
            for flag in &risk_flags {
                obs::emit_risk_flagged(&patch_id, &flag.keyword);
            }
            let keywords: Vec<&str> = risk_flags.iter().map(|f| f.keyword.as_str()).collect();
            envelope.apply_developer_flag(
                true,
                format!("risky patch requires human review: {}", keywords.join(", ")),
                Some("risk_policy".to_string()),
            );
            let plan = select_strategy(BreakerRecommendation::Continue, &risk_flags).plan(
                &PlanContext {
                    class: request.class,
                    message: &request.message,
                    flags: &risk_flags,
                    recommendation: BreakerRecommendation::Continue,
                },
            );
            let snapshot =
                self.finalize(envelope, Verdict::HumanReview, attempt_index)?;
            return Ok(AttemptOutcome {
                verdict: Verdict::HumanReview,
                snapshot,
                extras: AttemptExtras {
                    confidence: envelope.confidence().clone(),
                    breaker: self.breaker.summary(),
                    cascade_depth: self.cascade.depth(),
                    risk_flags,
                    watchdog: None,
                    recommendation: None,
                    plan: Some(plan),
                    blocked_reason: None,
                },
            });
        }

        // 4. Confidence scoring.
        let confidence =
            self.scorer
                .score(&request.logits, request.class, request.history.as_ref())?;
        envelope.merge_confidence(&confidence);

        // 5. Breaker gate.
        let (allowed, reason) = self.breaker.can_attempt(request.class);
        if !allowed {
            obs::emit_breaker_blocked(&patch_id, reason);
            let (cascade_stop, cascade_reason) = self.cascade.should_stop();
            let verdict = if cascade_stop {
                Verdict::Stop
            } else {
                Verdict::Rollback
            };
            let message = if cascade_stop {
                format!("stopped: {cascade_reason}")
            } else {
                format!("patch budget exhausted: {reason}")
            };
            envelope.apply_developer_flag(true, message, Some("budget_exhausted".to_string()));
            let snapshot = self.finalize(envelope, verdict, attempt_index)?;
            return Ok(AttemptOutcome {
                verdict,
                snapshot,
                extras: AttemptExtras {
                    confidence,
                    breaker: self.breaker.summary(),
                    cascade_depth: self.cascade.depth(),
                    risk_flags,
                    watchdog: None,
                    recommendation: None,
                    plan: None,
                    blocked_reason: Some(reason.to_string()),
                },
            });
        }

        // 6. Cascade gate.
        let (cascade_stop, cascade_reason) = self.cascade.should_stop();
        if cascade_stop {
            obs::emit_cascade_stop(&patch_id, &cascade_reason, self.cascade.depth());
            envelope.apply_developer_flag(
                true,
                format!("cascade stop: {cascade_reason}"),
                Some("cascade_stop".to_string()),
            );
            let snapshot = self.finalize(envelope, Verdict::Stop, attempt_index)?;
            return Ok(AttemptOutcome {
                verdict: Verdict::Stop,
                snapshot,
                extras: AttemptExtras {
                    confidence,
                    breaker: self.breaker.summary(),
                    cascade_depth: self.cascade.depth(),
                    risk_flags,
                    watchdog: None,
                    recommendation: None,
                    plan: None,
                    blocked_reason: Some(cascade_reason),
                },
            });
        }

        // 7. Confidence floor.
        let (clears_floor, floor) = should_attempt(&confidence, request.class, &self.policy);
        if !clears_floor {
            let snapshot = self.finalize(envelope, Verdict::Stop, attempt_index)?;
            return Ok(AttemptOutcome {
                verdict: Verdict::Stop,
                snapshot,
                extras: AttemptExtras {
                    confidence,
                    breaker: self.breaker.summary(),
                    cascade_depth: self.cascade.depth(),
                    risk_flags,
                    watchdog: None,
                    recommendation: None,
                    plan: None,
                    blocked_reason: Some(format!("confidence below floor {floor}")),
                },
            });
        }

        // 8. Sandboxed execution under the watchdog. A port error is a
        //    failed attempt, not a session failure.
        let attempt_key = format!("{patch_id}:{attempt_index}");
        self.watchdog.begin(&attempt_key);
        let sandbox_request = SandboxRequest {
            patch_id: envelope.patch_id(),
            language: request.language.clone(),
            patched_code: request.patch_code.clone(),
            original_code: request.original_code.clone(),
            isolation: self.policy.sandbox_isolation.clone(),
            limits: envelope.resource_usage().limits.clone(),
        };
        let outcome = match self.ports.sandbox.execute(sandbox_request).await {
            Ok(outcome) => outcome,
            Err(error) => SandboxOutcome {
                success: false,
                test_results: Vec::new(),
                error_message: Some(error.to_string()),
                resource_usage: envelope.resource_usage().clone(),
            },
        };
        let watchdog_event = self.watchdog.end(&attempt_key, &outcome.resource_usage);
        envelope.merge_resource_usage(outcome.resource_usage.clone());

        // 9. Delta analysis.
        let detected = request.errors_detected.unwrap_or_else(|| {
            let from_tests = outcome.failed_test_count();
            if outcome.success {
                from_tests
            } else {
                from_tests.max(1)
            }
        });
        let resolved = request.errors_resolved.unwrap_or_else(|| {
            self.prev_errors_detected
                .map(|prev| prev.saturating_sub(detected))
                .unwrap_or(0)
        });
        self.prev_errors_detected = Some(detected);
        let quality = outcome.pass_fraction();
        let loc = request.patch_code.lines().count().max(1) as u32;

        // 10. State updates: breaker, cascade, scorer history.
        self.breaker.record(
            request.class,
            outcome.success,
            detected,
            resolved,
            confidence.overall,
            loc,
        );
        if !outcome.success {
            self.cascade.push(
                request.class,
                &request.message,
                confidence.overall,
                attempt_index,
            );
        }
        self.scorer.record_outcome(confidence.overall, outcome.success);

        // 11. Verdict mapping.
        let recommendation = self.breaker.recommendation(request.class);
        let verdict = self.map_verdict(
            &patch_id,
            request.class,
            outcome.success,
            recommendation,
            watchdog_event.as_ref(),
            attempt_index,
        );

        // 12. Envelope bookkeeping.
        let now = self.now_utc();
        let note = if outcome.success {
            "sandbox passed".to_string()
        } else if verdict == Verdict::Rollback
            && watchdog_event
                .as_ref()
                .is_some_and(|e| e.severity == WatchdogSeverity::High)
        {
            "watchdog_trend".to_string()
        } else {
            outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "sandbox failed".to_string())
        };
        envelope.append_attempt(AttemptRecord {
            ts: now,
            success: outcome.success,
            note,
            breaker_snapshot: BreakerSnapshot {
                state: self.breaker.envelope_state(),
                failure_count: self.breaker.failure_count(),
            },
        });
        let trend = self.breaker.trend();
        envelope.update_trend(TrendMetadata {
            errors_detected: detected,
            errors_resolved: resolved,
            error_trend: trend.error_trend,
            code_quality_score: Some(quality),
            improvement_velocity: Some(trend.improvement_velocity),
            stagnation_risk: Some(trend.stagnation_risk),
        });
        envelope.update_counters(request.class, resolved);
        envelope.mark_success(outcome.success);

        // 13. Finalize, validate, snapshot.
        let snapshot = self.finalize(envelope, verdict, attempt_index)?;
        obs::emit_attempt_finished(
            &patch_id,
            attempt_index,
            outcome.success,
            &verdict.to_string(),
        );

        let plan = select_strategy(recommendation, &risk_flags).plan(&PlanContext {
            class: request.class,
            message: &request.message,
            flags: &risk_flags,
            recommendation,
        });

        Ok(AttemptOutcome {
            verdict,
            snapshot,
            extras: AttemptExtras {
                confidence,
                breaker: self.breaker.summary(),
                cascade_depth: self.cascade.depth(),
                risk_flags,
                watchdog: watchdog_event,
                recommendation: Some(recommendation),
                plan: Some(plan),
                blocked_reason: None,
            },
        })
    }

    /// Record a cancelled session: one failed attempt noted "cancelled",
    /// envelope finalized as `Stop`.
    pub fn record_cancellation(
        &mut self,
        envelope: &mut PatchEnvelope,
        class: ErrorClass,
    ) -> Result<Value> {
        let attempt_index = envelope.counters().total + 1;
        envelope.append_attempt(AttemptRecord {
            ts: self.now_utc(),
            success: false,
            note: "cancelled".to_string(),
            breaker_snapshot: BreakerSnapshot {
                state: self.breaker.envelope_state(),
                failure_count: self.breaker.failure_count(),
            },
        });
        envelope.update_counters(class, 0);
        self.finalize(envelope, Verdict::Stop, attempt_index)
    }

    fn map_verdict(
        &self,
        patch_id: &str,
        class: ErrorClass,
        success: bool,
        recommendation: BreakerRecommendation,
        watchdog_event: Option<&WatchdogEvent>,
        attempt_index: u32,
    ) -> Verdict {
        if let Some(event) = watchdog_event {
            obs::emit_watchdog_event(patch_id, &event.severity.to_string(), event.consecutive);
            if event.severity == WatchdogSeverity::High {
                // First attempt gets a grace window; afterwards a high
                // severity event forces rollback.
                return if attempt_index >= 2 {
                    Verdict::Rollback
                } else {
                    Verdict::PauseAndBackoff
                };
            }
        }

        if success
            && matches!(
                recommendation,
                BreakerRecommendation::Promote | BreakerRecommendation::Continue
            )
        {
            return Verdict::Promote;
        }

        match recommendation {
            BreakerRecommendation::Promote => Verdict::Promote,
            BreakerRecommendation::Rollback => Verdict::Rollback,
            BreakerRecommendation::PauseAndBackoff => Verdict::PauseAndBackoff,
            BreakerRecommendation::TryDifferentStrategy => Verdict::StrategyChange,
            BreakerRecommendation::Continue => {
                if self.breaker.blocked_reason(class).is_none() {
                    Verdict::Retry
                } else {
                    Verdict::Rollback
                }
            }
        }
    }

    /// Shared tail of every pipeline exit: mirror breaker/cascade state,
    /// stamp the timeline and timestamp, hash, validate, and hand
    /// session-ending snapshots to memory.
    fn finalize(
        &mut self,
        envelope: &mut PatchEnvelope,
        verdict: Verdict,
        attempt_index: u32,
    ) -> Result<Value> {
        envelope.set_breaker_state(self.breaker.envelope_state());
        envelope.set_cascade_depth(self.cascade.depth());
        let now = self.now_utc();
        envelope.add_timeline_entry(TimelineEntry {
            attempt: attempt_index,
            verdict,
            ts: now,
            breaker_state: envelope.breaker_state(),
            cascade_depth: envelope.cascade_depth(),
        });
        envelope.set_timestamp(now);
        envelope.set_hash()?;

        let snapshot = envelope.to_value();
        if let Err(error) = validate_envelope(&snapshot) {
            obs::emit_schema_violation(&envelope.patch_id().to_string(), &error);
            return Err(error);
        }
        if verdict.ends_session() {
            self.memory.add(snapshot.clone(), self.ports.clock.now_ms());
        }
        Ok(snapshot)
    }

    fn enforce_rate_limit(&mut self) -> Result<()> {
        let now = self.ports.clock.now_ms();
        let cutoff = now.saturating_sub(RATE_WINDOW_MS);
        while matches!(self.rate_stamps.front(), Some(&stamp) if stamp <= cutoff) {
            self.rate_stamps.pop_front();
        }
        if self.rate_stamps.len() >= self.policy.rate_limit_per_min as usize {
            return Err(EngineError::RateLimitExceeded {
                limit: self.policy.rate_limit_per_min,
                window_ms: RATE_WINDOW_MS,
            });
        }
        self.rate_stamps.push_back(now);
        Ok(())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let ms = self.ports.clock.now_ms();
        Utc.timestamp_millis_opt(ms as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

fn validate_request(request: &AttemptRequest) -> Result<()> {
    if request.message.trim().is_empty() {
        return Err(EngineError::InvalidInput("missing error message".to_string()));
    }
    if request.patch_code.trim().is_empty() {
        return Err(EngineError::InvalidInput("missing patch code".to_string()));
    }
    if request.original_code.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "missing original code".to_string(),
        ));
    }
    if request.logits.is_empty() {
        return Err(EngineError::InvalidInput("empty logits".to_string()));
    }
    Ok(())
}
