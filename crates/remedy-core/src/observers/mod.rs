//! Read-only observers that annotate attempts.
//!
//! - [`risk`]     — policy keyword matching against the candidate patch
//! - [`watchdog`] — resource/time anomaly detection with severity escalation

pub mod risk;
pub mod watchdog;

pub use risk::{evaluate_risk, RiskFlag};
pub use watchdog::{HangWatchdog, WatchdogEvent, WatchdogSeverity};
