//! Ports: the bounded external surfaces the engine consumes.
//!
//! The core never does I/O of its own; everything that touches the
//! outside world goes through one of these traits. Each port call is a
//! single suspension point with a bounded timeout enforced by the
//! caller.
//!
//! # Modules
//!
//! - [`sandbox`]   — bounded patch execution with resource accounting
//! - [`advisor`]   — the external code-generation consultant
//! - [`sanitizer`] — validation of advisor-proposed patches
//! - [`clock`]     — deterministic time and sleeping
//! - [`rng`]       — jitter source for backoff
//! - [`chat`]      — append-only consult transcript
//! - [`fakes`]     — scripted implementations for tests and the CLI

pub mod advisor;
pub mod chat;
pub mod clock;
pub mod fakes;
pub mod rng;
pub mod sandbox;
pub mod sanitizer;

pub use advisor::{extract_code_block, Advisor, AdvisorReply};
pub use chat::{ChatMessage, ChatRole, ChatStore, InMemoryChatStore};
pub use clock::{Clock, SystemClock};
pub use rng::{JitterRng, ThreadJitterRng};
pub use sandbox::{Sandbox, SandboxOutcome, SandboxRequest, TestResult};
pub use sanitizer::{BasicSanitizer, SanitizeConstraints, SanitizeOutcome, Sanitizer};
