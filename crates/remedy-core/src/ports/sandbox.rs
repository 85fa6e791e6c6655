//! Sandbox port: the bounded execution surface for candidate patches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{EngineError, ResourceLimits, ResourceUsage};

/// What the engine hands the sandbox per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub patch_id: Uuid,
    pub language: String,
    pub patched_code: String,
    pub original_code: String,
    /// Isolation level, passed verbatim from policy.
    pub isolation: String,
    pub limits: ResourceLimits,
}

/// Outcome of one test inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// What the sandbox reports back.
///
/// `success` is the sandbox's own verdict on the patched code; a port
/// *error* (transport, crash) is a distinct failure surfaced as
/// [`EngineError::SandboxFailure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub success: bool,
    pub test_results: Vec<TestResult>,
    pub error_message: Option<String>,
    pub resource_usage: ResourceUsage,
}

impl SandboxOutcome {
    pub fn failed_test_count(&self) -> u32 {
        self.test_results.iter().filter(|t| !t.passed).count() as u32
    }

    /// Fraction of tests that passed; 1.0 when no tests ran but the
    /// sandbox succeeded, 0.0 when it failed without tests.
    pub fn pass_fraction(&self) -> f64 {
        if self.test_results.is_empty() {
            return if self.success { 1.0 } else { 0.0 };
        }
        let passed = self.test_results.iter().filter(|t| t.passed).count();
        passed as f64 / self.test_results.len() as f64
    }
}

/// Bounded executor for candidate patches.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxOutcome, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_test_count() {
        let outcome = SandboxOutcome {
            success: false,
            test_results: vec![
                TestResult {
                    name: "a".into(),
                    passed: true,
                    detail: None,
                },
                TestResult {
                    name: "b".into(),
                    passed: false,
                    detail: Some("assertion".into()),
                },
            ],
            error_message: None,
            resource_usage: ResourceUsage::default(),
        };
        assert_eq!(outcome.failed_test_count(), 1);
        assert!((outcome.pass_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_pass_fraction_without_tests() {
        let mut outcome = SandboxOutcome {
            success: true,
            test_results: Vec::new(),
            error_message: None,
            resource_usage: ResourceUsage::default(),
        };
        assert_eq!(outcome.pass_fraction(), 1.0);
        outcome.success = false;
        assert_eq!(outcome.pass_fraction(), 0.0);
    }
}
