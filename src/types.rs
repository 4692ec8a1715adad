//! The data model.
//!
//! Every type here is a closed-vocabulary record or tagged variant rather
//! than a dynamic dictionary, per the redesign note: the compiler, not a
//! runtime check, enforces the shape constraints describes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Inbound request, immutable once constructed. `query_params` is ordered
/// because enumeration-sweep detection depends on the order the
/// caller observed the parameters in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub timestamp: u64,
    pub source_address: String,
    pub user_agent: String,
    pub endpoint: String,
    pub query_params: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub session_id: String,
}

impl Request {
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// 256-bit digest of `(source_address, user_agent, session_id)` after
/// normalization. Has no semantics beyond identity and is never reversed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One entry in a fingerprint's bounded sliding history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: u64,
    pub endpoint: String,
    pub content_hash: [u8; 32],
    pub size: usize,
}

/// Per-fingerprint reputation score, bounded to `[-100, 100]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Reputation {
    pub score: i32,
    pub last_update: u64,
}

impl Reputation {
    pub const MIN: i32 = -100;
    pub const MAX: i32 = 100;

    pub fn fresh(now: u64) -> Self {
        Self {
            score: 0,
            last_update: now,
        }
    }

    pub fn clamp_score(score: i32) -> i32 {
        score.clamp(Self::MIN, Self::MAX)
    }
}

/// Structured evidence value attached to a pattern's contribution. A
/// tagged variant rather than a free-form JSON blob,
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceValue {
    Scalar(f64),
    Count(u64),
    Flag(bool),
    Label(String),
    Budget { exceeded_for: String },
}

/// Output of the pattern detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_suspicious: bool,
    pub confidence: f64,
    pub detected_patterns: Vec<String>,
    pub risk_score: f64,
    pub evidence: BTreeMap<String, EvidenceValue>,
    /// Highest-scoring content/ML-attack pattern group, if any fired.
    /// Drives `RiskScorer`'s threat-category selection.
    pub best_content_category: Option<String>,
    /// True if the winning signal came from a content/ML-attack match
    /// rather than only timing/behavioral evidence (drives `stage_weight`
    /// in `RiskScorer::score`).
    pub content_confirmed: bool,
    /// True if a non-timing behavioral signal fired (burst rate, systematic
    /// enumeration, token sweep, fingerprint rotation) — used when no
    /// content signal did.
    pub behavioral_confirmed: bool,
    /// True if the only behavioral evidence is the timing
    /// coefficient-of-variation check, with no other behavioral signal and
    /// no content match. Distinguished from `behavioral_confirmed` so
    /// `RiskScorer` can apply spec §4.5's three distinct stage weights
    /// (content 1.0 / behavioral 0.7 / timing-only 0.5) instead of
    /// collapsing timing into the general behavioral tier.
    pub timing_only_confirmed: bool,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self {
            is_suspicious: false,
            confidence: 0.0,
            detected_patterns: Vec::new(),
            risk_score: 0.0,
            evidence: BTreeMap::new(),
            best_content_category: None,
            content_confirmed: false,
            behavioral_confirmed: false,
            timing_only_confirmed: false,
        }
    }
}

/// Closed vocabulary of response-policy actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Log,
    Track,
    RateLimit,
    ServeFake,
    DeployCounter,
    AggressiveRateLimit,
    SetTraps,
    ReverseTracking,
}

/// Risk level ladder (invariant: exactly determined by `risk_score`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// : `LOW ⇔ score<30; MEDIUM ⇔ 30≤score<60; HIGH ⇔ 60≤score<80;
    /// CRITICAL ⇔ score≥80`.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskLevel::Critical
        } else if score >= 60.0 {
            RiskLevel::High
        } else if score >= 30.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Mapped from a DetectionResult by the RiskScorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub risk_score: f64,
    pub threat_category: String,
    pub actions: Vec<ResponseAction>,
    pub confidence: f64,
    pub summary: String,
}

/// Declarative, immutable, loaded once from PolicyBook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub threat_categories: Vec<String>,
    pub required_payload_kinds: Vec<PayloadKind>,
    pub template_id: String,
    pub counter_strategy: String,
    pub isolation_level: String,
}

/// The six payload kinds requires an implementer to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    SqlHoneypot,
    ApiScrapingFlood,
    CredentialStuffing,
    EnvConfigDump,
    FilesystemTree,
    Generic,
}

/// Intensity tier resolved from a RiskLevel via the Scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityTier {
    Low,
    Medium,
    High,
}

impl IntensityTier {
    /// `CRITICAL → high`, `HIGH → medium`, `MEDIUM → low`. LOW never
    /// reaches the scenario resolver (SafetyFilter/RiskScorer stop it at
    /// `allow` before the registry is invoked), so it maps conservatively to `low`.
    pub fn from_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Critical => IntensityTier::High,
            RiskLevel::High => IntensityTier::Medium,
            RiskLevel::Medium | RiskLevel::Low => IntensityTier::Low,
        }
    }
}

/// Opaque 128-bit per-verdict correlation id, hex-encoded. Bound 1:1 to a
/// Verdict and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingToken(pub [u8; 16]);

impl TrackingToken {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TrackingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackingToken({})", self.to_hex())
    }
}

impl fmt::Display for TrackingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The verdict's top-level action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictAction {
    Allow,
    Countermeasures,
    Block,
}

/// The single output record of the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub action: VerdictAction,
    pub risk_assessment: RiskAssessment,
    pub tracking_token: Option<TrackingToken>,
    pub deceptive_payload: Option<serde_json::Value>,
    pub scenario_name: Option<String>,
    pub audit_id: u64,
    /// Set when `action = Block` was produced as a fail-closed degradation
    /// rather than a genuine CRITICAL-confidence verdict.
    pub fail_closed: bool,
}

impl Verdict {
    /// Short human-readable reason string, for adapters that don't want to
    /// walk `risk_assessment` themselves.
    pub fn evidence_summary(&self) -> String {
        if self.fail_closed {
            return "fail-closed: audit log unavailable".to_string();
        }
        format!(
            "{:?} ({:?}, score={:.1}, confidence={:.2})",
            self.action, self.risk_assessment.level, self.risk_assessment.risk_score, self.risk_assessment.confidence
        )
    }

    /// Cross-field invariants (an `Allow` verdict carries no token or
    /// payload; a non-`Allow` verdict always carries both), checked in
    /// debug builds at construction sites (see `orchestrator`).
    pub fn check_invariants(&self) -> Result<(), crate::error::CoreError> {
        match self.action {
            VerdictAction::Allow => {
                if self.tracking_token.is_some() || self.deceptive_payload.is_some() {
                    return Err(crate::error::CoreError::invariant(
                        "allow verdict carries a tracking token or payload",
                    ));
                }
            }
            VerdictAction::Countermeasures => {
                if self.tracking_token.is_none()
                    || self.deceptive_payload.is_none()
                    || self.scenario_name.is_none()
                {
                    return Err(crate::error::CoreError::invariant(
                        "countermeasures verdict missing token, payload, or scenario",
                    ));
                }
            }
            VerdictAction::Block => {}
        }
        Ok(())
    }
}
