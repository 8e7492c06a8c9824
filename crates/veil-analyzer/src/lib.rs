//! VEIL traffic analyzer
//!
//! Classifies mirrored HTTP requests against the attack signature library
//! and per-IP rate heuristics, publishing `attack_detected` events for the
//! deception controller to act on. Detection is best-effort and
//! confidence-scored; the analyzer never blocks traffic itself.

pub mod detector;
pub mod patterns;
pub mod service;

pub use detector::{AttackDetector, RequestDescriptor};
pub use service::{analyze_payload, router, run, AnalyzerState, SERVICE_NAME};
