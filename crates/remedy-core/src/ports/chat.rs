//! Chat store port: append-only transcript of consult traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Ai,
    Tool,
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub meta: Option<Value>,
    pub ts: u64,
}

/// Append-only transcript store.
pub trait ChatStore: Send + Sync {
    fn append(&mut self, role: ChatRole, content: String, meta: Option<Value>, ts: u64);
    fn tail(&self, n: usize) -> Vec<ChatMessage>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default in-process transcript.
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    messages: Vec<ChatMessage>,
}

impl ChatStore for InMemoryChatStore {
    fn append(&mut self, role: ChatRole, content: String, meta: Option<Value>, ts: u64) {
        self.messages.push(ChatMessage {
            role,
            content,
            meta,
            ts,
        });
    }

    fn tail(&self, n: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..].to_vec()
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}
