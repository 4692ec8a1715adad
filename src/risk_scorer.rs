//! RiskScorer: maps a `DetectionResult` to a
//! `RiskAssessment` and the verdict-level action decision. Grounded on
//! `ai_core::multi_layer_security_fixed`'s score-to-action mapping, reshaped
//! around the closed `RiskLevel` ladder instead of free-form thresholds.

use crate::config::ResponsePolicy;
use crate::types::{DetectionResult, RiskAssessment, RiskLevel, VerdictAction};

/// Weight applied to a detector's raw confidence depending on which stage
/// produced the winning signal ("confidence = detection.confidence ×
/// stage_weight" per spec §4.5: 1.0 content-confirmed, 0.7 behavioral-only,
/// 0.5 timing-only). Content matches are the most reliable signal; a pure
/// timing coefficient-of-variation signal is the weakest and is weighted
/// down hardest to reduce false positives from legitimate bursty clients.
fn stage_weight(detection: &DetectionResult) -> f64 {
    if detection.content_confirmed {
        1.0
    } else if detection.behavioral_confirmed {
        0.7
    } else if detection.timing_only_confirmed {
        0.5
    } else {
        0.5
    }
}

pub struct RiskScorer<'a> {
    response_policies: &'a ResponsePolicy,
}

impl<'a> RiskScorer<'a> {
    pub fn new(response_policies: &'a ResponsePolicy) -> Self {
        Self { response_policies }
    }

    pub fn score(&self, detection: &DetectionResult) -> RiskAssessment {
        let level = RiskLevel::from_score(detection.risk_score);
        let confidence = (detection.confidence * stage_weight(detection)).clamp(0.0, 1.0);
        let threat_category = detection
            .best_content_category
            .clone()
            .unwrap_or_else(|| "suspicious_behavior".to_string());
        let actions = self.response_policies.for_level(level).to_vec();
        let summary = format!(
            "{level:?} risk (score={:.1}, confidence={confidence:.2}): {}",
            detection.risk_score,
            if detection.detected_patterns.is_empty() {
                "no signals".to_string()
            } else {
                detection.detected_patterns.join(", ")
            }
        );

        RiskAssessment {
            level,
            risk_score: detection.risk_score,
            threat_category,
            actions,
            confidence,
            summary,
        }
    }
}

/// The verdict-level action decision rule:
/// countermeasures iff `level ∈ {HIGH, CRITICAL} ∧ confidence ≥ 0.5`;
/// block iff `level = CRITICAL ∧ confidence ≥ 0.9`; otherwise allow.
/// Block implies countermeasures would also have applied, so it is checked
/// first.
pub fn decide_action(assessment: &RiskAssessment) -> VerdictAction {
    if assessment.level == RiskLevel::Critical && assessment.confidence >= 0.9 {
        return VerdictAction::Block;
    }
    if matches!(assessment.level, RiskLevel::High | RiskLevel::Critical) && assessment.confidence >= 0.5 {
        return VerdictAction::Countermeasures;
    }
    VerdictAction::Allow
}
