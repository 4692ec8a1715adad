//! Error kinds for the defense pipeline.
//!
//! Only `CoreError` ever crosses the public API. `ConfigError` is
//! startup-fatal and is only ever produced by [`crate::config`]; it never
//! escapes `Orchestrator::process`.

use thiserror::Error;

/// Raised by the config loader. Startup-fatal, never surfaced from
/// `process()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("config error in {which}: {reason}")]
pub struct ConfigError {
    pub which: ConfigDocument,
    pub reason: String,
}

impl ConfigError {
    pub fn new(which: ConfigDocument, reason: impl Into<String>) -> Self {
        Self {
            which,
            reason: reason.into(),
        }
    }
}

/// Which of the two declarative documents a `ConfigError` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDocument {
    Rules,
    Policies,
}

impl std::fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigDocument::Rules => write!(f, "rules"),
            ConfigDocument::Policies => write!(f, "policies"),
        }
    }
}

/// Errors that can occur while `Orchestrator::process` runs a single
/// request through the pipeline. Every variant is either recovered locally
/// (and only recorded in evidence) or converted into a fail-closed
/// `Verdict` — none of them propagate out of `process()` as an `Err`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A content-pattern regex exceeded its step budget. Recovered
    /// locally: the pattern's contribution is treated as "matched at
    /// minimum score."
    #[error("detection budget exceeded for pattern `{pattern}`")]
    DetectionBudgetExceeded { pattern: String },

    /// No scenario matched the resolved threat category. Recovered locally
    /// by falling back to the generic scenario.
    #[error("no scenario registered for threat category `{category}`")]
    ScenarioResolutionMiss { category: String },

    /// The DeceptionFactory could not materialize the requested payload
    /// kind. Escalated to the orchestrator, which falls back to the
    /// generic payload kind.
    #[error("payload build failed for template `{template_id}`: {reason}")]
    PayloadBuildFailure { template_id: String, reason: String },

    /// The audit log could not accept a record. Fatal for the current
    /// request — the orchestrator returns a fail-closed block Verdict.
    #[error("audit append failed: {reason}")]
    AuditAppendFailure { reason: String },

    /// One of the invariants failed to hold. Panics in test builds,
    /// degrades to a fail-closed block in production.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

impl CoreError {
    /// Test builds panic on invariant violations so they surface as test
    /// failures instead of silently degrading; production builds degrade
    /// to a fail-closed verdict (see `orchestrator::Orchestrator::process`).
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if cfg!(debug_assertions) {
            panic!("internal invariant violated: {msg}");
        }
        CoreError::InternalInvariantViolation(msg)
    }
}
