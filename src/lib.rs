//! In-line request-defense pipeline: fingerprints inbound requests, filters
//! them through a staged safety gate, scores surviving requests for risk,
//! and answers suspected attackers with deterministic, tracked deceptive
//! payloads instead of a denial.
//!
//! The single public entry point is [`orchestrator::Orchestrator::process`].

pub mod audit;
pub mod config;
pub mod deception;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod pattern_detector;
pub mod reputation;
pub mod risk_scorer;
pub mod rng;
pub mod safety_filter;
pub mod scenario;
pub mod types;

pub use audit::{AuditRecord, AuditSink};
pub use config::ConfigLoader;
pub use error::{ConfigError, CoreError};
pub use orchestrator::Orchestrator;
pub use rng::{RandomSource, SystemRandomSource};
pub use types::{Request, Verdict, VerdictAction};
