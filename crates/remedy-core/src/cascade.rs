//! Cascade tracking: detects pathological error chains across attempts.
//!
//! A cascade is the sequence of errors observed while repairing one
//! patch. The tracker signals a stop when the chain gets too deep, keeps
//! repeating one class, loses confidence monotonically, or escalates in
//! severity.

use serde::{Deserialize, Serialize};

use crate::domain::ErrorClass;

/// One observed error in the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeEntry {
    pub class: ErrorClass,
    pub message: String,
    pub confidence: f64,
    pub attempt: u32,
}

/// Tracks the error chain for a single session.
#[derive(Debug)]
pub struct CascadeTracker {
    entries: Vec<CascadeEntry>,
    max_depth: u32,
}

impl CascadeTracker {
    pub fn new(max_depth: u32) -> Self {
        Self {
            entries: Vec::new(),
            max_depth,
        }
    }

    pub fn push(
        &mut self,
        class: ErrorClass,
        message: impl Into<String>,
        confidence: f64,
        attempt: u32,
    ) {
        self.entries.push(CascadeEntry {
            class,
            message: message.into(),
            confidence,
            attempt,
        });
    }

    pub fn depth(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn entries(&self) -> &[CascadeEntry] {
        &self.entries
    }

    /// Whether the chain warrants stopping, and why.
    ///
    /// Any one condition triggers: depth over limit, one class recurring
    /// three times in the last four entries, strictly decreasing
    /// confidence over the last three, or severity escalating over the
    /// last three.
    pub fn should_stop(&self) -> (bool, String) {
        if self.depth() > self.max_depth {
            return (
                true,
                format!(
                    "cascade depth {} exceeds limit {}",
                    self.depth(),
                    self.max_depth
                ),
            );
        }

        // Judged only on a full four-entry window: three same-class
        // entries alone are what a plain budget exhaustion produces and
        // must not read as a pathological chain.
        if self.entries.len() >= 4 {
            let tail: Vec<_> = self.entries.iter().rev().take(4).collect();
            for class in [
                ErrorClass::Syntax,
                ErrorClass::Logic,
                ErrorClass::Runtime,
                ErrorClass::Performance,
                ErrorClass::Security,
            ] {
                if tail.iter().filter(|e| e.class == class).count() >= 3 {
                    return (true, format!("error class {class} recurring"));
                }
            }
        }

        if self.entries.len() >= 3 {
            let last3 = &self.entries[self.entries.len() - 3..];
            if last3
                .windows(2)
                .all(|w| w[1].confidence < w[0].confidence)
            {
                return (true, "confidence decaying across attempts".to_string());
            }
            if last3
                .windows(2)
                .all(|w| w[1].class.severity_rank() > w[0].class.severity_rank())
            {
                return (true, "error severity escalating".to_string());
            }
        }

        (false, String::new())
    }
}
