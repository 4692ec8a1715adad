//! PatternDetector: timing, behavioral, content, and
//! ML-attack-heuristic checks, combined into one `DetectionResult`.
//! Deterministic given a fixed history snapshot and `RuleBook` — no
//! randomness, no wall-clock reads beyond the request's own `timestamp`
//! (determinism note). Grounded on
//! `ai_core::multi_layer_security_fixed::AnomalyDetectionEngine`'s
//! weighted-sum-of-checks scoring, and on
//! `other_examples/.../production_security.rs.rs`'s regex-driven
//! `SecurityValidator` for the content-pattern stage.

use std::collections::BTreeMap;

use tracing::trace;

use crate::config::RuleBook;
use crate::error::CoreError;
use crate::types::{DetectionResult, EvidenceValue, HistoryEntry, Request};

/// Regex steps budgeted per request across all content patterns. Once
/// exhausted, remaining patterns are treated as "matched at minimum score"
/// rather than run to completion, and the budget breach is recorded as
/// evidence rather than raised as an error to the caller.
const MAX_REGEX_STEPS: usize = 5_000;
/// crude proxy for "steps": haystack length scanned per pattern attempt.
const STEP_COST_PER_HAYSTACK: usize = 1;

pub struct PatternDetector<'a> {
    rules: &'a RuleBook,
}

impl<'a> PatternDetector<'a> {
    pub fn new(rules: &'a RuleBook) -> Self {
        Self { rules }
    }

    pub fn detect(&self, req: &Request, history: &[HistoryEntry]) -> DetectionResult {
        let mut evidence = BTreeMap::new();
        let mut risk_score = 0.0f64;
        let mut detected_patterns = Vec::new();
        let mut best_content_category: Option<(String, f64)> = None;
        let mut content_confirmed = false;
        let mut behavioral_confirmed = false;
        let mut timing_confirmed = false;

        // --- content / ML-attack-heuristic stage ---
        let haystacks = content_haystacks(req);
        let mut budget_remaining = MAX_REGEX_STEPS;
        for pattern in &self.rules.content_patterns {
            if budget_remaining == 0 {
                let _err = CoreError::DetectionBudgetExceeded {
                    pattern: pattern.rule.name.clone(),
                };
                trace!(pattern = %pattern.rule.name, "regex step budget exhausted, scoring at minimum");
                evidence.insert(
                    format!("budget_exceeded:{}", pattern.rule.name),
                    EvidenceValue::Budget {
                        exceeded_for: pattern.rule.name.clone(),
                    },
                );
                // Fail-safe toward caution (spec §5/§7): an exhausted
                // pattern is treated as matched at the minimum suspicious
                // score rather than skipped, so a ReDoS-style budget
                // exhaustion can never resolve quietly to "no signal."
                detected_patterns.push(pattern.rule.name.clone());
                risk_score += self.rules.min_suspicious;
                content_confirmed = true;
                let better = best_content_category
                    .as_ref()
                    .map(|(_, s)| self.rules.min_suspicious > *s)
                    .unwrap_or(true);
                if better {
                    best_content_category = Some((pattern.rule.group.clone(), self.rules.min_suspicious));
                }
                continue;
            }
            let cost: usize = haystacks.iter().map(|h| h.len() * STEP_COST_PER_HAYSTACK).sum();
            budget_remaining = budget_remaining.saturating_sub(cost);

            if haystacks.iter().any(|h| pattern.regex.is_match(h)) {
                detected_patterns.push(pattern.rule.name.clone());
                risk_score += pattern.rule.risk_score;
                content_confirmed = true;
                evidence.insert(
                    format!("content:{}", pattern.rule.name),
                    EvidenceValue::Scalar(pattern.rule.risk_score),
                );
                let better = best_content_category
                    .as_ref()
                    .map(|(_, s)| pattern.rule.risk_score > *s)
                    .unwrap_or(true);
                if better {
                    best_content_category = Some((pattern.rule.group.clone(), pattern.rule.risk_score));
                }
            }
        }

        // token sweep: distinct query-param values beyond threshold, a
        // credential-stuffing / enumeration signal independent of content
        // regex matches.
        let distinct_values = distinct_param_values(req);
        if distinct_values as f64 >= self.rules.token_sweep.threshold {
            detected_patterns.push("token_sweep".to_string());
            risk_score += self.rules.token_sweep.risk_score;
            behavioral_confirmed = true;
            evidence.insert(
                "token_sweep".to_string(),
                EvidenceValue::Count(distinct_values as u64),
            );
        }

        // --- behavioral stage (history-derived) ---
        if let Some(cv) = timing_cv(history) {
            evidence.insert("timing_cv".to_string(), EvidenceValue::Scalar(cv));
            if cv <= self.rules.consistent_timing.threshold {
                detected_patterns.push("consistent_timing".to_string());
                risk_score += self.rules.consistent_timing.risk_score;
                timing_confirmed = true;
            }
        }

        let burst_rate = burst_rate_per_minute(history, req.timestamp);
        evidence.insert("burst_rate".to_string(), EvidenceValue::Scalar(burst_rate));
        if burst_rate >= self.rules.burst_activity.threshold {
            detected_patterns.push("burst_activity".to_string());
            risk_score += self.rules.burst_activity.risk_score;
            behavioral_confirmed = true;
        }

        let enumeration_score = enumeration_signal_strength(history);
        if enumeration_score >= self.rules.systematic_enumeration.threshold {
            detected_patterns.push("systematic_enumeration".to_string());
            risk_score += self.rules.systematic_enumeration.risk_score;
            behavioral_confirmed = true;
            evidence.insert(
                "systematic_enumeration".to_string(),
                EvidenceValue::Scalar(enumeration_score),
            );
        }

        // fingerprint_rotation: same session id reused with churn across
        // header shape is out of scope at this layer (fingerprinting
        // already collapses identity); approximate instead via rapid
        // endpoint-size variance, a weak proxy kept intentionally small.
        let rotation_score = fingerprint_rotation_signal(history);
        if rotation_score >= self.rules.fingerprint_rotation.threshold {
            detected_patterns.push("fingerprint_rotation".to_string());
            risk_score += self.rules.fingerprint_rotation.risk_score;
            behavioral_confirmed = true;
        }

        let is_suspicious = risk_score >= self.rules.min_suspicious;
        let confidence = confidence_from(risk_score, detected_patterns.len());
        // Timing-only iff the coefficient-of-variation check was the sole
        // signal — any other behavioral or content match upgrades the
        // stage weight via `behavioral_confirmed`/`content_confirmed`.
        let timing_only_confirmed = timing_confirmed && !behavioral_confirmed && !content_confirmed;

        DetectionResult {
            is_suspicious,
            confidence,
            detected_patterns,
            risk_score,
            evidence,
            best_content_category: best_content_category.map(|(g, _)| g),
            content_confirmed,
            behavioral_confirmed,
            timing_only_confirmed,
        }
    }
}

fn content_haystacks(req: &Request) -> Vec<String> {
    let mut out = vec![req.body_str().to_string(), req.endpoint.clone()];
    for (k, v) in &req.query_params {
        out.push(k.clone());
        out.push(v.clone());
    }
    for v in req.headers.values() {
        out.push(v.clone());
    }
    out
}

fn distinct_param_values(req: &Request) -> usize {
    req.query_params
        .iter()
        .map(|(_, v)| v.clone())
        .collect::<std::collections::HashSet<_>>()
        .len()
}

fn timing_cv(history: &[HistoryEntry]) -> Option<f64> {
    if history.len() < 3 {
        return None;
    }
    let mut intervals: Vec<f64> = history
        .windows(2)
        .map(|w| (w[1].timestamp as i64 - w[0].timestamp as i64).unsigned_abs() as f64)
        .collect();
    if intervals.len() > 10 {
        let start = intervals.len() - 10;
        intervals = intervals[start..].to_vec();
    }
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean == 0.0 {
        return Some(0.0);
    }
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    Some(variance.sqrt() / mean)
}

fn burst_rate_per_minute(history: &[HistoryEntry], now: u64) -> f64 {
    let count = history.iter().filter(|e| now.saturating_sub(e.timestamp) <= 60).count();
    count as f64
}

fn enumeration_signal_strength(history: &[HistoryEntry]) -> f64 {
    let numeric: Vec<u64> = history
        .iter()
        .rev()
        .take(20)
        .filter_map(|e| trailing_number(&e.endpoint))
        .collect();
    if numeric.len() < 5 {
        return 0.0;
    }
    let mut sorted = numeric.clone();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() < 5 {
        return 0.0;
    }
    let diffs: Vec<i64> = sorted.windows(2).map(|w| w[1] as i64 - w[0] as i64).collect();
    let constant_step = !diffs.is_empty() && diffs.iter().all(|&d| d == diffs[0]) && diffs[0] != 0;
    if constant_step {
        sorted.len() as f64
    } else {
        0.0
    }
}

fn trailing_number(endpoint: &str) -> Option<u64> {
    let digits: String = endpoint.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

fn fingerprint_rotation_signal(history: &[HistoryEntry]) -> f64 {
    let recent: Vec<&HistoryEntry> = history.iter().rev().take(10).collect();
    if recent.len() < 4 {
        return 0.0;
    }
    let unique_sizes: std::collections::HashSet<usize> = recent.iter().map(|e| e.size).collect();
    unique_sizes.len() as f64
}

fn confidence_from(risk_score: f64, signal_count: usize) -> f64 {
    let base = (risk_score / 100.0).clamp(0.0, 1.0);
    let breadth_bonus = (signal_count as f64 * 0.05).min(0.2);
    (base + breadth_bonus).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::{POLICIES_TOML, RULES_TOML};
    use crate::config::ConfigLoader;
    use std::collections::BTreeMap as BMap;

    fn base_req() -> Request {
        Request {
            timestamp: 1000,
            source_address: "203.0.113.7".to_string(),
            user_agent: "curl/7.88.0".to_string(),
            endpoint: "/api/users".to_string(),
            query_params: vec![],
            headers: BMap::new(),
            body: Vec::new(),
            session_id: "sess".to_string(),
        }
    }

    #[test]
    fn sql_injection_in_body_is_detected_with_high_confidence() {
        let loader = ConfigLoader::load(RULES_TOML, POLICIES_TOML).unwrap();
        let snap = loader.snapshot();
        let detector = PatternDetector::new(&snap.0);

        let mut req = base_req();
        req.body = b"id=1' OR '1'='1' UNION SELECT * FROM users".to_vec();

        let result = detector.detect(&req, &[]);
        assert!(result.is_suspicious);
        assert!(result.content_confirmed);
        assert_eq!(result.best_content_category.as_deref(), Some("sql_injection"));
    }

    #[test]
    fn regex_budget_exhaustion_fails_closed_at_minimum_score_instead_of_skipping() {
        let loader = ConfigLoader::load(RULES_TOML, POLICIES_TOML).unwrap();
        let snap = loader.snapshot();
        let detector = PatternDetector::new(&snap.0);

        // A huge haystack that matches none of the fixture's content
        // patterns exhausts the per-request regex step budget partway
        // through the pattern list. The remaining patterns must still
        // contribute at `min_suspicious` rather than silently scoring 0.
        let mut req = base_req();
        req.body = vec![b'a'; 3_000];

        let result = detector.detect(&req, &[]);
        assert!(
            result.evidence.keys().any(|k| k.starts_with("budget_exceeded:")),
            "expected at least one budget_exceeded evidence entry"
        );
        assert!(result.content_confirmed);
        assert!(result.risk_score >= snap.0.min_suspicious);
        assert!(result.is_suspicious);
    }

    #[test]
    fn benign_request_with_no_history_is_not_suspicious() {
        let loader = ConfigLoader::load(RULES_TOML, POLICIES_TOML).unwrap();
        let snap = loader.snapshot();
        let detector = PatternDetector::new(&snap.0);

        let req = base_req();
        let result = detector.detect(&req, &[]);
        assert!(!result.is_suspicious);
        assert_eq!(result.risk_score, 0.0);
    }

    #[test]
    fn consistent_timing_alone_sets_timing_only_confirmed() {
        let loader = ConfigLoader::load(RULES_TOML, POLICIES_TOML).unwrap();
        let snap = loader.snapshot();
        let detector = PatternDetector::new(&snap.0);

        let history: Vec<HistoryEntry> = (0..12)
            .map(|i| HistoryEntry {
                timestamp: i * 10,
                endpoint: "/api/scan".to_string(),
                content_hash: [0u8; 32],
                size: 128,
            })
            .collect();
        let mut req = base_req();
        req.timestamp = 120;

        let result = detector.detect(&req, &history);
        assert!(result.timing_only_confirmed);
        assert!(!result.behavioral_confirmed);
        assert!(!result.content_confirmed);
    }

    #[test]
    fn systematic_enumeration_over_sequential_endpoints_is_flagged() {
        let loader = ConfigLoader::load(RULES_TOML, POLICIES_TOML).unwrap();
        let snap = loader.snapshot();
        let detector = PatternDetector::new(&snap.0);

        let history: Vec<HistoryEntry> = (0..8)
            .map(|i| HistoryEntry {
                timestamp: i * 5,
                endpoint: format!("/api/users/{}", 1000 + i),
                content_hash: [0u8; 32],
                size: 64,
            })
            .collect();
        let req = base_req();

        let result = detector.detect(&req, &history);
        assert!(result.detected_patterns.contains(&"systematic_enumeration".to_string()));
    }
}
