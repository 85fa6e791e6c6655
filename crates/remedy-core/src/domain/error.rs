//! Domain-level error taxonomy for the Remedy engine.

/// Remedy engine errors.
///
/// `InvalidInput` and `SchemaViolation` are fatal to the caller.
/// `RateLimitExceeded` is fatal per call but non-terminal for a session.
/// `SandboxFailure` is downgraded to a failed attempt by the engine;
/// `AdvisorFailure` and `SanitizerReject` degrade into the minimal-tweak path.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limit exceeded: {limit} attempts per {window_ms}ms")]
    RateLimitExceeded { limit: u32, window_ms: u64 },

    #[error("envelope schema violation: {0}")]
    SchemaViolation(String),

    #[error("sandbox failure: {0}")]
    SandboxFailure(String),

    #[error("advisor failure: {0}")]
    AdvisorFailure(String),

    #[error("sanitizer rejected patch: {0}")]
    SanitizerReject(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Remedy engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::InvalidInput("empty logits".to_string());
        assert!(err.to_string().contains("invalid input"));

        let err = EngineError::RateLimitExceeded {
            limit: 15,
            window_ms: 60_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("15"));
        assert!(msg.contains("60000"));
    }

    #[test]
    fn test_schema_violation_carries_detail() {
        let err = EngineError::SchemaViolation("missing field `patch_id`".to_string());
        assert!(err.to_string().contains("patch_id"));
    }

    #[test]
    fn test_serialization_error_from() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: EngineError = bad.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
