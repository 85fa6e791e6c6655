//! Envelope-level properties: hash stability, serialization round
//! trips, and engine idempotence across processes.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use remedy_core::ports::fakes::{ManualClock, ScriptedSandbox, SeededJitterRng};
use remedy_core::{
    AttemptRecord, AttemptRequest, BasicSanitizer, BreakerSnapshot, BreakerState, Engine,
    EnginePolicy, EnginePorts, ErrorClass, PatchEnvelope, Verdict,
};
use uuid::Uuid;

fn fixed_engine() -> Engine {
    let ports = EnginePorts {
        sandbox: Arc::new(ScriptedSandbox::always(ScriptedSandbox::passing())),
        clock: Arc::new(ManualClock::at(1_700_000_000_000)),
        rng: Arc::new(SeededJitterRng::new(5)),
        sanitizer: Arc::new(BasicSanitizer),
    };
    Engine::new(EnginePolicy::default(), ports)
}

fn fixed_request() -> AttemptRequest {
    AttemptRequest {
        class: ErrorClass::Syntax,
        message: "missing )".to_string(),
        patch_code: "console.log(\"x\");".to_string(),
        original_code: "console.log(\"x\"".to_string(),
        language: "javascript".to_string(),
        logits: vec![0.99, 0.98, 0.97],
        history: None,
        errors_detected: None,
        errors_resolved: None,
        metadata: None,
    }
}

fn fixed_envelope(engine: &Engine, patch_id: Uuid) -> PatchEnvelope {
    PatchEnvelope::new(
        patch_id,
        "javascript",
        "console.log(\"x\"",
        "console.log(\"x\");",
        serde_json::to_value(engine.policy()).unwrap(),
    )
}

// S6: appending an attempt and refreshing the timestamp leaves the hash
// untouched; only the volatile fields move.
#[tokio::test]
async fn test_hash_stable_under_volatile_updates() {
    let mut engine = fixed_engine();
    let patch_id = Uuid::new_v4();
    let mut envelope = fixed_envelope(&engine, patch_id);
    engine
        .process_attempt(&mut envelope, &fixed_request())
        .await
        .unwrap();

    let hash_before = envelope.envelope_hash().unwrap().to_string();
    let value_before = envelope.to_value();

    envelope.append_attempt(AttemptRecord {
        ts: Utc.timestamp_millis_opt(1_700_000_100_000).single().unwrap(),
        success: false,
        note: "late diagnostic".to_string(),
        breaker_snapshot: BreakerSnapshot {
            state: BreakerState::Closed,
            failure_count: 0,
        },
    });
    envelope.set_timestamp(Utc.timestamp_millis_opt(1_700_000_200_000).single().unwrap());

    assert_eq!(envelope.compute_hash().unwrap(), hash_before);

    let value_after = envelope.to_value();
    let changed: Vec<&str> = value_before
        .as_object()
        .unwrap()
        .iter()
        .filter(|(k, v)| value_after.get(k.as_str()) != Some(v))
        .map(|(k, _)| k.as_str())
        .collect();
    assert_eq!(changed, vec!["attempts", "timestamp"]);
}

// Round trip: serialize a terminal envelope, parse it back, and the
// recomputed hash matches the original.
#[tokio::test]
async fn test_roundtrip_preserves_hash() {
    let mut engine = fixed_engine();
    let mut envelope = fixed_envelope(&engine, Uuid::new_v4());
    let outcome = engine
        .process_attempt(&mut envelope, &fixed_request())
        .await
        .unwrap();
    assert_eq!(outcome.verdict, Verdict::Promote);

    let serialized = serde_json::to_string(&envelope).unwrap();
    let parsed: PatchEnvelope = serde_json::from_str(&serialized).unwrap();
    assert_eq!(
        parsed.compute_hash().unwrap(),
        envelope.envelope_hash().unwrap()
    );
    assert_eq!(parsed.attempts().len(), envelope.attempts().len());
    assert_eq!(parsed.success(), envelope.success());
}

// Idempotence: identical inputs against fresh engines produce identical
// envelope JSON, hash included.
#[tokio::test]
async fn test_process_attempt_idempotent_across_engines() {
    let patch_id = Uuid::parse_str("7f3d2a10-9c41-4be2-8d6e-5a1f0c9b2e44").unwrap();

    let mut first_snapshot = None;
    for _ in 0..2 {
        let mut engine = fixed_engine();
        let mut envelope = fixed_envelope(&engine, patch_id);
        let outcome = engine
            .process_attempt(&mut envelope, &fixed_request())
            .await
            .unwrap();
        match &first_snapshot {
            None => first_snapshot = Some(outcome.snapshot),
            Some(previous) => assert_eq!(previous, &outcome.snapshot),
        }
    }
}

// The emitted snapshot's hash re-verifies over the canonical subset.
#[tokio::test]
async fn test_snapshot_hash_recomputes() {
    let mut engine = fixed_engine();
    let mut envelope = fixed_envelope(&engine, Uuid::new_v4());
    let outcome = engine
        .process_attempt(&mut envelope, &fixed_request())
        .await
        .unwrap();

    let stored = outcome.snapshot["envelope_hash"].as_str().unwrap();
    let parsed = PatchEnvelope::from_value(&outcome.snapshot).unwrap();
    assert_eq!(parsed.compute_hash().unwrap(), stored);
}

// Attempt timestamps never run backwards within a session.
#[tokio::test]
async fn test_attempt_timestamps_monotonic() {
    let clock = Arc::new(ManualClock::at(1_700_000_000_000));
    let ports = EnginePorts {
        sandbox: Arc::new(ScriptedSandbox::always(ScriptedSandbox::failing("nope"))),
        clock: clock.clone(),
        rng: Arc::new(SeededJitterRng::new(5)),
        sanitizer: Arc::new(BasicSanitizer),
    };
    let policy = EnginePolicy {
        syntax_error_budget: 1.0,
        ..EnginePolicy::default()
    };
    let mut engine = Engine::new(policy, ports);
    let mut envelope = fixed_envelope(&engine, Uuid::new_v4());

    for _ in 0..3 {
        engine
            .process_attempt(&mut envelope, &fixed_request())
            .await
            .unwrap();
        clock.advance(1000);
    }

    let attempts = envelope.attempts();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1].ts >= pair[0].ts);
    }
    assert_eq!(envelope.counters().total as usize, attempts.len());
}
