//! End-to-end scenarios for the decision engine and session loop,
//! driven entirely through deterministic fake ports.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use remedy_core::ports::fakes::{
    CannedAdvisor, ManualClock, ScriptedSandbox, SeededJitterRng,
};
use remedy_core::{
    run_session, AttemptRequest, BasicSanitizer, BreakerState, Engine, EngineError, EnginePolicy,
    EnginePorts, ErrorClass, ErrorTrend, LimitsHit, PatchEnvelope, ResourceObserved, ResourceUsage,
    SandboxOutcome, SessionRequest, Verdict, WaitBounds, WatchdogSeverity,
};
use serde_json::json;
use uuid::Uuid;

fn engine_with(policy: EnginePolicy, sandbox: Arc<ScriptedSandbox>) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at(1_700_000_000_000));
    let ports = EnginePorts {
        sandbox,
        clock: clock.clone(),
        rng: Arc::new(SeededJitterRng::new(11)),
        sanitizer: Arc::new(BasicSanitizer),
    };
    (Engine::new(policy, ports), clock)
}

fn envelope_for(engine: &Engine, patch: &str, original: &str) -> PatchEnvelope {
    PatchEnvelope::new(
        Uuid::new_v4(),
        "javascript",
        original,
        patch,
        serde_json::to_value(engine.policy()).unwrap(),
    )
}

fn syntax_request(patch: &str, original: &str) -> AttemptRequest {
    AttemptRequest {
        class: ErrorClass::Syntax,
        message: "missing )".to_string(),
        patch_code: patch.to_string(),
        original_code: original.to_string(),
        language: "javascript".to_string(),
        logits: vec![0.99, 0.98, 0.97],
        history: None,
        errors_detected: None,
        errors_resolved: None,
        metadata: None,
    }
}

fn hung_outcome() -> SandboxOutcome {
    SandboxOutcome {
        success: false,
        test_results: Vec::new(),
        error_message: Some("no output before limit".to_string()),
        resource_usage: ResourceUsage {
            observed: ResourceObserved {
                wall_ms: 10_000,
                memory_mb: 64,
                cpu_percent: 20.0,
                limits_hit: LimitsHit {
                    time: true,
                    ..LimitsHit::default()
                },
            },
            ..ResourceUsage::default()
        },
    }
}

// S1: a clean syntax fix promotes on the first attempt.
#[tokio::test]
async fn test_syntax_promote_path() {
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing()));
    let (mut engine, _clock) = engine_with(EnginePolicy::default(), sandbox.clone());

    let original = "console.log(\"x\"";
    let patch = "console.log(\"x\");";
    let mut envelope = envelope_for(&engine, patch, original);

    let outcome = engine
        .process_attempt(&mut envelope, &syntax_request(patch, original))
        .await
        .unwrap();

    assert_eq!(outcome.verdict, Verdict::Promote);
    assert!(envelope.success());
    assert_eq!(envelope.attempts().len(), 1);
    assert_eq!(envelope.counters().total, 1);
    assert_eq!(envelope.breaker_state(), BreakerState::Closed);
    assert_eq!(envelope.cascade_depth(), 0);
    assert_eq!(sandbox.calls(), 1);
}

// S2: a risky keyword escalates to human review before any execution.
#[tokio::test]
async fn test_risk_escalation_precedes_sandbox() {
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing()));
    let (mut engine, _clock) = engine_with(EnginePolicy::default(), sandbox.clone());

    let original = "function login(user) { return check(user); }";
    let patch = "function login(user) { return authentication_bypass(user); }";
    let mut envelope = envelope_for(&engine, patch, original);

    let mut request = syntax_request(patch, original);
    request.class = ErrorClass::Security;
    request.message = "auth check fails".to_string();
    let outcome = engine.process_attempt(&mut envelope, &request).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::HumanReview);
    assert_eq!(sandbox.calls(), 0, "sandbox must not run for risky patches");
    assert!(envelope.flagged_for_developer());
    assert!(!envelope.developer_message().is_empty());
    assert!(!envelope.success());
    assert!(!outcome.extras.risk_flags.is_empty());
    assert_eq!(outcome.snapshot["flaggedForDeveloper"], json!(true));
}

// S3: the syntax budget trips after three failing attempts; the fourth
// call is denied with the verbatim reason.
#[tokio::test]
async fn test_budget_exhaustion() {
    let policy = EnginePolicy {
        max_syntax_attempts: 3,
        syntax_error_budget: 1.0,
        ..EnginePolicy::default()
    };
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::failing(
        "still broken",
    )));
    let (mut engine, _clock) = engine_with(policy, sandbox);

    let original = "let x = ";
    let patch = "let x = 1";
    let mut envelope = envelope_for(&engine, patch, original);
    let request = syntax_request(patch, original);

    for _ in 1..=3 {
        let outcome = engine.process_attempt(&mut envelope, &request).await.unwrap();
        assert!(
            matches!(outcome.verdict, Verdict::Retry | Verdict::Rollback),
            "early attempts retry or roll back, got {:?}",
            outcome.verdict
        );
    }

    let outcome = engine.process_attempt(&mut envelope, &request).await.unwrap();
    assert_eq!(outcome.verdict, Verdict::Rollback);
    assert_eq!(
        outcome.extras.blocked_reason.as_deref(),
        Some("attempts exceeded")
    );
    assert_eq!(envelope.breaker_state(), BreakerState::Open);
    assert!(envelope.developer_message().contains("attempts exceeded"));
}

// S4: falling errors and rising confidence culminate in promote.
#[tokio::test]
async fn test_improvement_trajectory() {
    let policy = EnginePolicy {
        logic_error_budget: 1.0,
        ..EnginePolicy::default()
    };
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        ScriptedSandbox::failing("wave 1"),
        ScriptedSandbox::failing("wave 2"),
        ScriptedSandbox::failing("wave 3"),
        ScriptedSandbox::failing("wave 4"),
        ScriptedSandbox::passing(),
    ]));
    let (mut engine, _clock) = engine_with(policy, sandbox);

    let original = "function sort(a) { return a }";
    let patch = "function sort(a) { return a.sort() }";
    let mut envelope = envelope_for(&engine, patch, original);

    let errors = [30u32, 20, 12, 6, 3];
    let resolved = [0u32, 10, 8, 6, 3];
    // Sharpening logits push confidence up each attempt.
    let peaks = [0.5, 1.2, 2.0, 3.0, 4.0];

    let mut last = None;
    for i in 0..5 {
        let request = AttemptRequest {
            class: ErrorClass::Logic,
            message: "unsorted output".to_string(),
            patch_code: patch.to_string(),
            original_code: original.to_string(),
            language: "javascript".to_string(),
            logits: vec![peaks[i], 0.0, 0.0],
            history: None,
            errors_detected: Some(errors[i]),
            errors_resolved: Some(resolved[i]),
            metadata: None,
        };
        last = Some(engine.process_attempt(&mut envelope, &request).await.unwrap());
    }

    let outcome = last.unwrap();
    assert_eq!(outcome.verdict, Verdict::Promote);
    assert_eq!(envelope.trend().error_trend, ErrorTrend::Improving);
    assert!(envelope.trend().improvement_velocity.unwrap() > 0.0);
    assert!(envelope.success());
    assert_eq!(
        outcome.extras.recommendation,
        Some(remedy_core::BreakerRecommendation::Promote)
    );
}

// S5: a hang on the first attempt gets a grace window; repeating it
// forces rollback.
#[tokio::test]
async fn test_watchdog_first_attempt_grace() {
    let policy = EnginePolicy {
        logic_error_budget: 1.0,
        ..EnginePolicy::default()
    };
    let sandbox = Arc::new(ScriptedSandbox::always(hung_outcome()));
    let (mut engine, _clock) = engine_with(policy, sandbox);

    let original = "while (true) { work() }";
    let patch = "while (running) { work() }";
    let mut envelope = envelope_for(&engine, patch, original);
    let mut request = syntax_request(patch, original);
    request.class = ErrorClass::Runtime;
    request.logits = vec![3.0, 0.0, 0.0];

    let first = engine.process_attempt(&mut envelope, &request).await.unwrap();
    assert_eq!(first.verdict, Verdict::PauseAndBackoff, "grace on attempt 1");
    assert_eq!(
        first.extras.watchdog.as_ref().unwrap().severity,
        WatchdogSeverity::High
    );

    let second = engine.process_attempt(&mut envelope, &request).await.unwrap();
    assert_eq!(second.verdict, Verdict::Rollback);
    assert_eq!(envelope.attempts().last().unwrap().note, "watchdog_trend");
}

// Rate limit boundary: the N+1th call inside the window fails, and
// succeeds again once the window has passed.
#[tokio::test]
async fn test_rate_limit_window() {
    let policy = EnginePolicy {
        rate_limit_per_min: 3,
        ..EnginePolicy::default()
    };
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing()));
    let (mut engine, clock) = engine_with(policy, sandbox);

    let original = "let a";
    let patch = "let a;";
    let request = syntax_request(patch, original);

    for _ in 0..3 {
        let mut envelope = envelope_for(&engine, patch, original);
        engine.process_attempt(&mut envelope, &request).await.unwrap();
    }

    let mut envelope = envelope_for(&engine, patch, original);
    let err = engine
        .process_attempt(&mut envelope, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RateLimitExceeded { limit: 3, .. }));

    clock.advance(60_001);
    let mut envelope = envelope_for(&engine, patch, original);
    assert!(engine.process_attempt(&mut envelope, &request).await.is_ok());
}

// Empty logits are rejected before anything happens.
#[tokio::test]
async fn test_empty_logits_invalid_input() {
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing()));
    let (mut engine, _clock) = engine_with(EnginePolicy::default(), sandbox.clone());

    let mut request = syntax_request("let a = 1;", "let a = 1");
    request.logits.clear();
    let mut envelope = envelope_for(&engine, "let a = 1;", "let a = 1");
    let err = engine
        .process_attempt(&mut envelope, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert_eq!(sandbox.calls(), 0);
    assert!(envelope.attempts().is_empty(), "no attempt is recorded");
}

// A full session: two failures, an accepted advisor proposal, then a
// pass that promotes.
#[tokio::test]
async fn test_session_with_advisor_consult() {
    let policy = EnginePolicy {
        syntax_error_budget: 1.0,
        logic_error_budget: 1.0,
        ..EnginePolicy::default()
    };
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        ScriptedSandbox::failing("missing )"),
        ScriptedSandbox::failing("missing )"),
        ScriptedSandbox::passing(),
    ]));
    let (mut engine, clock) = engine_with(policy, sandbox.clone());

    let advisor = Arc::new(CannedAdvisor::new(vec![
        "Close the call:\n```javascript\nconsole.log(\"x\");\n```".to_string(),
        "Try again:\n```javascript\nconsole.log(\"x\");\n```".to_string(),
    ]));

    let request = SessionRequest {
        patch_id: Some(Uuid::new_v4()),
        class: ErrorClass::Syntax,
        message: "missing )".to_string(),
        patch_code: "console.log(\"x\"".to_string(),
        original_code: "console.log(\"x\"".to_string(),
        language: "javascript".to_string(),
        // Sharply peaked logits keep confidence above the promote bar.
        logits: vec![2.0, 0.0, 0.0],
        history: None,
        metadata: None,
    };

    let outcome = run_session(
        &mut engine,
        request,
        5,
        WaitBounds::default(),
        Some(advisor.clone()),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.verdict, Verdict::Promote);
    assert_eq!(outcome.attempts, 3);
    assert!(!outcome.cancelled);
    assert_eq!(sandbox.calls(), 3);
    assert_eq!(advisor.prompts().len(), 2, "one consult per retry");

    // Backoff waits happened through the clock port, inside bounds.
    let sleeps = clock.recorded_sleeps();
    assert_eq!(sleeps.len(), 2);
    for wait in sleeps {
        assert!((500..=1500).contains(&wait));
    }

    // Consults left a transcript.
    let transcript = engine.chat_tail(10);
    assert!(transcript
        .iter()
        .any(|m| m.role == remedy_core::ChatRole::Ai));
}

// A rejected advisor proposal degrades to the minimal tweak and leaves
// a memory record behind.
#[tokio::test]
async fn test_sanitizer_rejection_falls_back_to_tweak() {
    let policy = EnginePolicy {
        syntax_error_budget: 1.0,
        ..EnginePolicy::default()
    };
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        ScriptedSandbox::failing("missing )"),
        ScriptedSandbox::passing(),
    ]));
    let clock = Arc::new(ManualClock::at(1_700_000_000_000));
    let ports = EnginePorts {
        sandbox,
        clock,
        rng: Arc::new(SeededJitterRng::new(11)),
        sanitizer: Arc::new(remedy_core::ports::fakes::RejectAllSanitizer),
    };
    let mut engine = Engine::new(policy, ports);

    let advisor = Arc::new(CannedAdvisor::new(vec![
        "```javascript\nconsole.log(\"x\");\n```".to_string(),
    ]));
    let request = SessionRequest {
        patch_id: None,
        class: ErrorClass::Syntax,
        message: "missing )".to_string(),
        patch_code: "console.log(\"x\"".to_string(),
        original_code: "console.log(\"x\"".to_string(),
        language: "javascript".to_string(),
        logits: vec![2.0, 0.0, 0.0],
        history: None,
        metadata: None,
    };

    let outcome = run_session(
        &mut engine,
        request,
        4,
        WaitBounds::default(),
        Some(advisor),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.verdict, Verdict::Promote);
    assert_eq!(outcome.attempts, 2);
    // One rejection record plus the terminal envelope.
    assert_eq!(engine.memory_metrics().size, 2);
    let transcript = engine.chat_tail(10);
    assert!(transcript
        .iter()
        .any(|m| m.role == remedy_core::ChatRole::Tool && m.content.contains("rejected")));
}

// Cancellation: recorded as a failed attempt and finalized as Stop.
#[tokio::test]
async fn test_session_cancellation() {
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing()));
    let (mut engine, _clock) = engine_with(EnginePolicy::default(), sandbox);

    let cancel = Arc::new(AtomicBool::new(true));
    let request = SessionRequest {
        patch_id: None,
        class: ErrorClass::Logic,
        message: "broken".to_string(),
        patch_code: "let a = 1;".to_string(),
        original_code: "let a = ;".to_string(),
        language: "javascript".to_string(),
        logits: vec![1.0, 0.0],
        history: None,
        metadata: None,
    };

    let outcome = run_session(
        &mut engine,
        request,
        3,
        WaitBounds::default(),
        None,
        Some(cancel),
    )
    .await
    .unwrap();

    assert_eq!(outcome.verdict, Verdict::Stop);
    assert!(outcome.cancelled);
    assert_eq!(outcome.attempts, 1);
    let attempts = outcome.envelope["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["note"], json!("cancelled"));
    assert_eq!(attempts[0]["success"], json!(false));
}

// Terminal envelopes land in memory for future consults.
#[tokio::test]
async fn test_terminal_envelope_feeds_memory() {
    let sandbox = Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing()));
    let (mut engine, _clock) = engine_with(EnginePolicy::default(), sandbox);

    let original = "console.log(\"x\"";
    let patch = "console.log(\"x\");";
    let mut envelope = envelope_for(&engine, patch, original);
    engine
        .process_attempt(&mut envelope, &syntax_request(patch, original))
        .await
        .unwrap();

    assert_eq!(engine.memory_metrics().size, 1);
    let similar = engine.similar_outcomes(&json!({"language": "javascript"}));
    assert_eq!(similar.len(), 1);
}
