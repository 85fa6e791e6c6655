//! Advisor port: the external code-generation consultant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::EngineError;

/// Free-text reply from the advisor; may contain a fenced code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorReply {
    pub text: String,
}

/// External consultant invoked during backoff consults.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn consult(&self, prompt: &Value) -> Result<AdvisorReply, EngineError>;
}

/// Extract the body of the first fenced code block, tolerating an
/// optional language tag on the fence line. Returns the whole trimmed
/// text when no fence is present and the text is non-empty.
pub fn extract_code_block(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Some(open) = trimmed.find("```") else {
        return Some(trimmed.to_string());
    };
    let after_fence = &trimmed[open + 3..];
    // Skip the language tag line if present.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let code = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    let code = code.trim_matches('\n');
    if code.trim().is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}
