//! Deterministic port implementations for tests and offline drivers.
//!
//! Sessions driven entirely through these fakes are reproducible: the
//! manual clock never waits, the seeded RNG replays, and the scripted
//! sandbox plays back canned outcomes in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng};
use serde_json::Value;

use super::advisor::{Advisor, AdvisorReply};
use super::clock::Clock;
use super::rng::JitterRng;
use super::sandbox::{Sandbox, SandboxOutcome, SandboxRequest};
use super::sanitizer::{SanitizeConstraints, SanitizeOutcome, Sanitizer};
use crate::domain::{EngineError, ResourceUsage};

/// Clock that only moves when told to; `sleep` advances it instantly and
/// records the requested waits.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    sleeps: Mutex<Vec<u64>>,
}

impl ManualClock {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Every wait requested via `sleep`, in order.
    pub fn recorded_sleeps(&self) -> Vec<u64> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, ms: u64) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(ms);
        }
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

/// Seeded RNG for reproducible jitter.
#[derive(Debug)]
pub struct SeededJitterRng {
    inner: Mutex<StdRng>,
}

impl SeededJitterRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterRng for SeededJitterRng {
    fn uniform(&self, a: f64, b: f64) -> f64 {
        if a >= b {
            return a;
        }
        match self.inner.lock() {
            Ok(mut rng) => rng.gen_range(a..b),
            Err(_) => a,
        }
    }
}

/// Sandbox that replays scripted outcomes in order, then repeats the
/// last one. An empty script is a port failure.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    script: Mutex<VecDeque<SandboxOutcome>>,
    last: Mutex<Option<SandboxOutcome>>,
    calls: AtomicU64,
}

impl ScriptedSandbox {
    pub fn new(outcomes: Vec<SandboxOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            last: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// A sandbox that always reports the same outcome.
    pub fn always(outcome: SandboxOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Some(outcome)),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A passing outcome with minimal resource usage.
    pub fn passing() -> SandboxOutcome {
        SandboxOutcome {
            success: true,
            test_results: Vec::new(),
            error_message: None,
            resource_usage: ResourceUsage::default(),
        }
    }

    /// A failing outcome with the given error message.
    pub fn failing(message: &str) -> SandboxOutcome {
        SandboxOutcome {
            success: false,
            test_results: Vec::new(),
            error_message: Some(message.to_string()),
            resource_usage: ResourceUsage::default(),
        }
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(&self, _request: SandboxRequest) -> Result<SandboxOutcome, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(outcome) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(outcome.clone());
                }
                Ok(outcome)
            }
            None => match self.last.lock().ok().and_then(|l| l.clone()) {
                Some(outcome) => Ok(outcome),
                None => Err(EngineError::SandboxFailure(
                    "scripted sandbox exhausted".to_string(),
                )),
            },
        }
    }
}

/// Advisor that replays canned replies, then reports failure.
#[derive(Debug, Default)]
pub struct CannedAdvisor {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Value>>,
}

impl CannedAdvisor {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<Value> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Advisor for CannedAdvisor {
    async fn consult(&self, prompt: &Value) -> Result<AdvisorReply, EngineError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        match next {
            Some(text) => Ok(AdvisorReply { text }),
            None => Err(EngineError::AdvisorFailure(
                "canned advisor exhausted".to_string(),
            )),
        }
    }
}

/// Sanitizer that rejects everything, forcing the minimal-tweak path.
#[derive(Debug, Default)]
pub struct RejectAllSanitizer;

impl Sanitizer for RejectAllSanitizer {
    fn sanitize(
        &self,
        _proposed: &str,
        _baseline: &str,
        _constraints: &SanitizeConstraints,
    ) -> SanitizeOutcome {
        SanitizeOutcome::reject("rejected by test sanitizer")
    }
}
