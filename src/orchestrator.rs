//! Orchestrator: the single public entry point. Drives
//! Fingerprinter → SafetyFilter → (PatternDetector → RiskScorer →
//! ScenarioRegistry → DeceptionFactory) → audit → reputation, and returns
//! exactly one `Verdict` per request.

use tracing::{info_span, warn};

use crate::audit::AuditSink;
use crate::config::ConfigLoader;
use crate::deception::DeceptionFactory;
use crate::error::CoreError;
use crate::fingerprint::{self, HistoryStore};
use crate::pattern_detector::PatternDetector;
use crate::reputation::{ReputationAdjustment, ReputationTable};
use crate::risk_scorer::{self, RiskScorer};
use crate::rng::RandomSource;
use crate::safety_filter::SafetyFilter;
use crate::scenario::ScenarioRegistry;
use crate::types::{HistoryEntry, IntensityTier, RiskAssessment, RiskLevel, Verdict, VerdictAction};

pub struct Orchestrator<R: RandomSource> {
    config: ConfigLoader,
    history: HistoryStore,
    reputation: ReputationTable,
    audit: AuditSink,
    rng: R,
}

impl<R: RandomSource> Orchestrator<R> {
    pub fn new(config: ConfigLoader, audit: AuditSink, rng: R) -> Self {
        Self {
            config,
            history: HistoryStore::new(),
            reputation: ReputationTable::new(),
            audit,
            rng,
        }
    }

    /// Reloads the config snapshot. A failure here is logged and the prior
    /// snapshot keeps serving traffic (failure semantics); it never
    /// refuses traffic.
    pub fn reload_config(&self, rules_source: &str, policies_source: &str) {
        if let Err(err) = self.config.reload(rules_source, policies_source) {
            warn!(error = %err, "config reload failed, continuing on prior snapshot");
        }
    }

    pub fn process(&self, request: crate::types::Request) -> Verdict {
        let span = info_span!("process", endpoint = %request.endpoint);
        let _guard = span.enter();

        let snapshot = self.config.snapshot();
        let (rules, policies) = (&snapshot.0, &snapshot.1);

        // Step 1: fingerprint + history append.
        let fp = fingerprint::fingerprint(&request);
        self.history.append(
            fp,
            HistoryEntry {
                timestamp: request.timestamp,
                endpoint: request.endpoint.clone(),
                content_hash: fingerprint::content_hash(&request),
                size: request.body.len(),
            },
        );
        let history_snapshot = self.history.snapshot(fp);

        // Step 2: SafetyFilter.
        let safety = SafetyFilter::new(rules, &self.reputation).check(&request, fp, &history_snapshot);
        if safety.safe {
            return self.emit_allow(fp, request.timestamp);
        }

        // Step 3-4: PatternDetector + RiskScorer.
        let detection = PatternDetector::new(rules).detect(&request, &history_snapshot);
        let assessment = RiskScorer::new(&rules.response_policies).score(&detection);
        let action = risk_scorer::decide_action(&assessment);

        match action {
            VerdictAction::Allow => {
                self.finalize(fp, request.timestamp, VerdictAction::Allow, assessment, None, None)
            }
            VerdictAction::Countermeasures | VerdictAction::Block => {
                self.process_actionable(fp, &request, policies, assessment, action)
            }
        }
    }

    fn process_actionable(
        &self,
        fp: crate::types::Fingerprint,
        request: &crate::types::Request,
        policies: &crate::config::PolicyBook,
        assessment: RiskAssessment,
        action: VerdictAction,
    ) -> Verdict {
        // Step 6: token, scenario, payload.
        let token = crate::types::TrackingToken(self.rng.random_token_128());
        let registry = ScenarioRegistry::new(policies);
        let (scenario, miss) = registry.resolve(&assessment.threat_category);
        if let Some(err) = miss {
            warn!(error = %err, "scenario resolution missed, using fallback");
        }

        let tier = IntensityTier::from_level(assessment.level);
        let intensity_value = registry.intensity_for(scenario, tier);
        let (payload, payload_err) = DeceptionFactory::build(scenario, tier, intensity_value, &token);
        if let Some(err) = payload_err {
            warn!(error = %err, "deception payload build degraded to generic fallback");
        }

        self.finalize(
            fp,
            request.timestamp,
            action,
            assessment,
            Some((token, payload)),
            Some(scenario.name.clone()),
        )
    }

    /// Steps 7-9: audit append (atomic with verdict emission) then return.
    /// An audit failure degrades the whole verdict to a fail-closed block,
    /// and — the only place in the pipeline where an internal
    /// error reshapes the caller-visible action.
    fn finalize(
        &self,
        fp: crate::types::Fingerprint,
        timestamp: u64,
        action: VerdictAction,
        assessment: RiskAssessment,
        token_and_payload: Option<(crate::types::TrackingToken, serde_json::Value)>,
        scenario_name: Option<String>,
    ) -> Verdict {
        let (tracking_token, deceptive_payload) = match token_and_payload {
            Some((t, p)) => (Some(t), Some(p)),
            None => (None, None),
        };

        match self.audit.append(timestamp, fp, action, scenario_name.clone(), tracking_token) {
            Ok(audit_id) => {
                let verdict = Verdict {
                    action,
                    risk_assessment: assessment,
                    tracking_token,
                    deceptive_payload,
                    scenario_name,
                    audit_id,
                    fail_closed: false,
                };
                if let Err(err) = verdict.check_invariants() {
                    warn!(error = %err, "verdict invariant check failed, degrading to fail-closed block");
                    return self.fail_closed_verdict();
                }
                // Step 8: reputation adjustment, only once the audit record
                // (step 7) is durably accepted.
                let adjustment = match action {
                    VerdictAction::Block => ReputationAdjustment::Block,
                    VerdictAction::Countermeasures => ReputationAdjustment::Countermeasures,
                    VerdictAction::Allow => ReputationAdjustment::Allow,
                };
                self.reputation.adjust(fp, adjustment, timestamp);
                verdict
            }
            Err(CoreError::AuditAppendFailure { reason }) => {
                warn!(reason, "audit append failed, returning fail-closed block");
                self.fail_closed_verdict()
            }
            Err(other) => {
                warn!(error = %other, "unexpected error from audit append, returning fail-closed block");
                self.fail_closed_verdict()
            }
        }
    }

    fn emit_allow(&self, fp: crate::types::Fingerprint, timestamp: u64) -> Verdict {
        let assessment = RiskAssessment {
            level: RiskLevel::Low,
            risk_score: 0.0,
            threat_category: "none".to_string(),
            actions: vec![crate::types::ResponseAction::Log],
            confidence: 1.0,
            summary: "safety filter cleared request at an early stage".to_string(),
        };
        self.finalize(fp, timestamp, VerdictAction::Allow, assessment, None, None)
    }

    fn fail_closed_verdict(&self) -> Verdict {
        Verdict {
            action: VerdictAction::Block,
            risk_assessment: RiskAssessment {
                level: RiskLevel::Critical,
                risk_score: 100.0,
                threat_category: "internal_failure".to_string(),
                actions: vec![],
                confidence: 1.0,
                summary: "fail-closed: audit log unavailable".to_string(),
            },
            tracking_token: None,
            deceptive_payload: None,
            scenario_name: None,
            audit_id: 0,
            fail_closed: true,
        }
    }
}
