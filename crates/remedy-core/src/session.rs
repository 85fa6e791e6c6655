//! The session loop: repeated attempts around one patch, with adaptive
//! backoff, advisor consults, sanitized patch application, and the
//! minimal-tweak fallback.
//!
//! A session owns exactly one envelope. Terminal verdicts (and `Stop`)
//! exit the loop; `PauseAndBackoff`/`Retry` wait, consult, and go again;
//! `StrategyChange` only applies the minimal tweak. Cancellation is
//! cooperative: in-flight port calls finish, then the session records a
//! cancelled attempt and stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backoff::{self, WaitBounds};
use crate::domain::{EngineError, ErrorClass, PatchEnvelope, Result, Verdict};
use crate::engine::{AttemptOutcome, AttemptRequest, Engine};
use crate::obs::{self, SessionSpan};
use crate::observers::WatchdogSeverity;
use crate::ports::{extract_code_block, Advisor, ChatRole, SanitizeConstraints};
use crate::scorer::HistoryHint;
use crate::tweak::apply_minimal_tweak;

/// Inputs that start a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Session identity; generated when absent.
    #[serde(default)]
    pub patch_id: Option<Uuid>,
    pub class: ErrorClass,
    pub message: String,
    pub patch_code: String,
    pub original_code: String,
    pub language: String,
    pub logits: Vec<f64>,
    #[serde(default)]
    pub history: Option<HistoryHint>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Watchdog signals aggregated across the whole session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchdogAggregate {
    pub triggered_attempts: u32,
    pub max_consecutive: u32,
    pub highest_severity: Option<WatchdogSeverity>,
}

impl WatchdogAggregate {
    fn absorb(&mut self, outcome: &AttemptOutcome) {
        if let Some(event) = &outcome.extras.watchdog {
            self.triggered_attempts += 1;
            self.max_consecutive = self.max_consecutive.max(event.consecutive);
            self.highest_severity = Some(match self.highest_severity {
                Some(current) => current.max(event.severity),
                None => event.severity,
            });
        }
    }
}

/// Final session result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub verdict: Verdict,
    pub envelope: Value,
    pub attempts: u32,
    pub cancelled: bool,
    pub watchdog: WatchdogAggregate,
}

/// Drive a full patch session on `engine`.
///
/// `advisor` is optional; without one, every non-terminal iteration
/// falls back to the minimal tweak. `cancel` is checked between port
/// calls only.
pub async fn run_session(
    engine: &mut Engine,
    request: SessionRequest,
    max_attempts: u32,
    bounds: WaitBounds,
    advisor: Option<Arc<dyn Advisor>>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<SessionOutcome> {
    if max_attempts == 0 {
        return Err(EngineError::InvalidInput(
            "max_attempts must be at least 1".to_string(),
        ));
    }

    let patch_id = request.patch_id.unwrap_or_else(Uuid::new_v4);
    let _span = SessionSpan::enter(&patch_id.to_string());

    let policy_snapshot = serde_json::to_value(engine.policy())?;
    let mut envelope = PatchEnvelope::new(
        patch_id,
        &request.language,
        &request.original_code,
        &request.patch_code,
        policy_snapshot,
    );

    engine.append_chat(
        ChatRole::System,
        format!(
            "patch session started: class={} language={}",
            request.class, request.language
        ),
        None,
    );

    let mut current_patch = request.patch_code.clone();
    let mut aggregate = WatchdogAggregate::default();
    let mut last_outcome: Option<AttemptOutcome> = None;

    for _attempt in 1..=max_attempts {
        if is_cancelled(&cancel) {
            return finish_cancelled(engine, &mut envelope, request.class, aggregate);
        }

        let attempt_request = AttemptRequest {
            class: request.class,
            message: request.message.clone(),
            patch_code: current_patch.clone(),
            original_code: request.original_code.clone(),
            language: request.language.clone(),
            logits: request.logits.clone(),
            history: request.history.clone(),
            errors_detected: None,
            errors_resolved: None,
            metadata: request.metadata.clone(),
        };
        let outcome = engine.process_attempt(&mut envelope, &attempt_request).await?;
        aggregate.absorb(&outcome);

        if outcome.verdict.ends_session() {
            obs::emit_session_finished(
                &patch_id.to_string(),
                &outcome.verdict.to_string(),
                envelope.counters().total,
                envelope.success(),
            );
            return Ok(SessionOutcome {
                verdict: outcome.verdict,
                envelope: outcome.snapshot,
                attempts: envelope.counters().total,
                cancelled: false,
                watchdog: aggregate,
            });
        }

        match outcome.verdict {
            Verdict::PauseAndBackoff | Verdict::Retry => {
                let decision = backoff::recommend(
                    &outcome.extras.breaker.trend,
                    outcome.extras.breaker.consecutive_failures,
                    &bounds,
                    engine.rng().as_ref(),
                );
                engine.clock().sleep(decision.wait_ms).await;

                if is_cancelled(&cancel) {
                    return finish_cancelled(engine, &mut envelope, request.class, aggregate);
                }

                current_patch = next_patch(
                    engine,
                    &request,
                    &current_patch,
                    &outcome.snapshot,
                    advisor.as_deref(),
                )
                .await;
            }
            Verdict::StrategyChange => {
                if let Some(tweaked) = apply_minimal_tweak(&current_patch, Some(&request.message)) {
                    current_patch = tweaked;
                }
                obs::emit_consult(&patch_id.to_string(), false, "minimal_tweak");
            }
            _ => {}
        }

        last_outcome = Some(outcome);
    }

    // Attempt budget exhausted without a session-ending verdict; report
    // the last interim state.
    let outcome = last_outcome.ok_or_else(|| {
        EngineError::InvalidInput("session produced no attempts".to_string())
    })?;
    obs::emit_session_finished(
        &patch_id.to_string(),
        &outcome.verdict.to_string(),
        envelope.counters().total,
        envelope.success(),
    );
    Ok(SessionOutcome {
        verdict: outcome.verdict,
        envelope: outcome.snapshot,
        attempts: envelope.counters().total,
        cancelled: false,
        watchdog: aggregate,
    })
}

/// Pick the next candidate patch: a sanitized advisor proposal when one
/// arrives in time, otherwise the minimal tweak.
async fn next_patch(
    engine: &mut Engine,
    request: &SessionRequest,
    current_patch: &str,
    snapshot: &Value,
    advisor: Option<&dyn Advisor>,
) -> String {
    let patch_id = snapshot
        .get("patch_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    if let Some(advisor) = advisor {
        let similar = engine.similar_outcomes(&json!({
            "class": request.class,
            "message": request.message,
        }));
        let prompt = consult_prompt(request, current_patch, snapshot, &similar);
        engine.append_chat(ChatRole::User, prompt.to_string(), None);

        let timeout = Duration::from_millis(engine.policy().advisor_timeout_ms);
        let reply = tokio::time::timeout(timeout, advisor.consult(&prompt)).await;
        match reply {
            Ok(Ok(reply)) => {
                engine.append_chat(ChatRole::Ai, reply.text.clone(), None);
                if let Some(code) = extract_code_block(&reply.text) {
                    let constraints = SanitizeConstraints {
                        max_lines_changed: engine.policy().sanitizer_max_lines_changed,
                        disallow_keywords: engine.policy().risky_keywords.clone(),
                    };
                    let sanitized = engine
                        .sanitizer()
                        .sanitize(&code, current_patch, &constraints);
                    if sanitized.ok {
                        if let Some(code) = sanitized.code {
                            obs::emit_consult(&patch_id, true, "advisor");
                            return code;
                        }
                    } else if let Some(reason) = sanitized.reason {
                        engine.note_sanitizer_rejection(&patch_id, &reason);
                        engine.append_chat(
                            ChatRole::Tool,
                            format!("proposal rejected: {reason}"),
                            None,
                        );
                    }
                }
            }
            Ok(Err(_)) | Err(_) => {
                // Advisor failure or timeout degrades to "no proposal".
            }
        }
    }

    obs::emit_consult(&patch_id, false, "minimal_tweak");
    match apply_minimal_tweak(current_patch, Some(&request.message)) {
        Some(tweaked) => tweaked,
        None => current_patch.to_string(),
    }
}

/// The structured consult envelope sent to the advisor.
fn consult_prompt(
    request: &SessionRequest,
    current_patch: &str,
    snapshot: &Value,
    similar: &[Value],
) -> Value {
    json!({
        "instruction": "Propose a corrected patch. Reply with a single fenced code block.",
        "error": {
            "class": request.class,
            "message": request.message,
        },
        "language": request.language,
        "original_code": request.original_code,
        "last_patch": current_patch,
        "last_envelope": snapshot,
        "similar_outcomes": similar,
    })
}

fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::SeqCst))
        .unwrap_or(false)
}

fn finish_cancelled(
    engine: &mut Engine,
    envelope: &mut PatchEnvelope,
    class: ErrorClass,
    watchdog: WatchdogAggregate,
) -> Result<SessionOutcome> {
    let snapshot = engine.record_cancellation(envelope, class)?;
    obs::emit_session_finished(
        &envelope.patch_id().to_string(),
        &Verdict::Stop.to_string(),
        envelope.counters().total,
        envelope.success(),
    );
    Ok(SessionOutcome {
        verdict: Verdict::Stop,
        envelope: snapshot,
        attempts: envelope.counters().total,
        cancelled: true,
        watchdog,
    })
}
