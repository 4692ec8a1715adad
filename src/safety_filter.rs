//! SafetyFilter: three sequential stages. The first stage
//! to produce a definitive outcome terminates. Modeled after
//! `ai_core::multi_layer_security_fixed::AnomalyDetectionEngine`'s
//! enable-flag-gated, weighted-sum-of-checks structure, restaged here into
//! sequential early-exit stages rather than one flat weighted sum.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::debug;

use crate::config::RuleBook;
use crate::reputation::ReputationTable;
use crate::types::{Fingerprint, HistoryEntry, Reputation, Request};

/// Stage reached when the filter produced its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    QuickChecks,
    Behavioral,
    Deep,
}

/// Result of running a request through the filter. `SafetyFilter` never
/// computes a `risk_score` itself.
#[derive(Debug, Clone)]
pub struct SafetyOutcome {
    pub safe: bool,
    pub stage_reached: Stage,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

const BEHAVIORAL_WINDOW: usize = 10;

pub struct SafetyFilter<'a> {
    rules: &'a RuleBook,
    reputation: &'a ReputationTable,
}

impl<'a> SafetyFilter<'a> {
    pub fn new(rules: &'a RuleBook, reputation: &'a ReputationTable) -> Self {
        Self { rules, reputation }
    }

    pub fn check(&self, req: &Request, fp: Fingerprint, history: &[HistoryEntry]) -> SafetyOutcome {
        if let Some(outcome) = self.stage1_quick_checks(req, fp, history) {
            return outcome;
        }
        let behavioral = self.stage2_behavioral(history);
        self.stage3_deep(req, behavioral)
    }

    /// Stage 1: reputation, whitelist, burst-rate. Only ever returns `Some`
    /// for the definitive `safe` case (whitelisted/high-reputation with no
    /// content match); everything else falls through as indeterminate.
    fn stage1_quick_checks(
        &self,
        req: &Request,
        fp: Fingerprint,
        history: &[HistoryEntry],
    ) -> Option<SafetyOutcome> {
        let rep = self.reputation.get(fp, req.timestamp);

        if is_whitelisted(req, &self.rules.whitelist) {
            debug!(stage = "quick_checks", "whitelist match");
            return Some(SafetyOutcome {
                safe: true,
                stage_reached: Stage::QuickChecks,
                confidence: 1.0,
                reasons: vec!["whitelisted user agent, address, or endpoint".to_string()],
            });
        }

        if rep.score >= 50 && !self.has_any_content_match(req) {
            debug!(stage = "quick_checks", score = rep.score, "high reputation, no content match");
            return Some(SafetyOutcome {
                safe: true,
                stage_reached: Stage::QuickChecks,
                confidence: 0.9,
                reasons: vec![format!("reputation {} with no content pattern match", rep.score)],
            });
        }

        // Burst over 60s window alone is not a verdict; it just narrows
        // confidence and we fall through to stage 2 regardless.
        let rate_60s = rate_over_window(history, req.timestamp, 60);
        if rate_60s > self.rules.burst_threshold {
            debug!(stage = "quick_checks", rate_60s, "burst rate exceeds threshold, deferring");
        }

        None
    }

    fn has_any_content_match(&self, req: &Request) -> bool {
        let haystacks = content_haystacks(req);
        self.rules
            .content_patterns
            .iter()
            .any(|p| haystacks.iter().any(|h| p.regex.is_match(h)))
    }

    /// Stage 2: timing coefficient of variation, endpoint-sequence
    /// signatures, noise absence. Two-of-three criteria (or one very
    /// strong timing signal) escalates — stage 2 never emits a terminal
    /// `safe`/`unsafe` outcome itself, but a strong behavioral signal here
    /// is evidence stage 3 folds into its own match decision, so a
    /// scripted burst with no content-pattern match still reaches
    /// `unsafe` rather than being waved through as `safe`.
    fn stage2_behavioral(&self, history: &[HistoryEntry]) -> BehavioralSignal {
        if history.len() < 3 {
            return BehavioralSignal::default();
        }

        let cv = timing_coefficient_of_variation(history, BEHAVIORAL_WINDOW);
        let enumeration_signal = has_enumeration_signature(history);
        let noise_absent = lacks_human_noise(history);

        let mut criteria_hit = 0;
        let mut reasons = Vec::new();
        let mut strong_signal = false;
        if let Some(cv) = cv {
            if cv < 0.05 {
                strong_signal = true;
                reasons.push(format!("timing coefficient of variation {cv:.4} indicates scripted cadence"));
            } else if cv <= self.rules.consistent_timing.threshold {
                criteria_hit += 1;
                reasons.push(format!("timing coefficient of variation {cv:.4} below threshold"));
            }
        }
        if enumeration_signal {
            criteria_hit += 1;
            reasons.push("endpoint-suffix walk suggests systematic enumeration".to_string());
        }
        if noise_absent {
            criteria_hit += 1;
            reasons.push("no variance in request size across recent history".to_string());
        }

        let escalate = strong_signal || criteria_hit >= 2;
        debug!(stage = "behavioral", criteria_hit, strong_signal, escalate, "behavioral stage evaluated");
        BehavioralSignal { escalate, reasons }
    }

    /// Stage 3: content-pattern match, ML-attack heuristics, and any
    /// behavioral escalation carried from stage 2. A match on any of these
    /// produces `unsafe`; none of them produces `safe` and nudges
    /// reputation (handled by the orchestrator, which owns the single
    /// reputation write-back per request).
    fn stage3_deep(&self, req: &Request, behavioral: BehavioralSignal) -> SafetyOutcome {
        let haystacks = content_haystacks(req);
        let mut reasons = behavioral.reasons;
        let mut matched = behavioral.escalate;

        for pattern in &self.rules.content_patterns {
            if haystacks.iter().any(|h| pattern.regex.is_match(h)) {
                matched = true;
                reasons.push(format!(
                    "content pattern `{}` matched ({})",
                    pattern.rule.name, pattern.rule.group
                ));
            }
        }

        let sweep = distinct_param_value_count(req);
        if sweep >= 50 {
            matched = true;
            reasons.push(format!("parameter sweep: {sweep} distinct values in window"));
        }

        SafetyOutcome {
            safe: !matched,
            stage_reached: Stage::Deep,
            confidence: if matched { 0.9 } else { 0.6 },
            reasons,
        }
    }
}

/// Carries stage 2's escalation decision into stage 3, since stage 2 never
/// terminates the filter on its own.
#[derive(Debug, Clone, Default)]
struct BehavioralSignal {
    escalate: bool,
    reasons: Vec<String>,
}

fn content_haystacks(req: &Request) -> Vec<String> {
    let mut out = vec![req.body_str().to_string(), req.endpoint.clone()];
    for (k, v) in &req.query_params {
        out.push(k.clone());
        out.push(v.clone());
    }
    out
}

fn rate_over_window(history: &[HistoryEntry], now: u64, window_secs: u64) -> f64 {
    let count = history
        .iter()
        .filter(|e| now.saturating_sub(e.timestamp) <= window_secs)
        .count();
    count as f64 / window_secs.max(1) as f64
}

/// Coefficient of variation of inter-arrival intervals across the last
/// `window` history entries.
fn timing_coefficient_of_variation(history: &[HistoryEntry], window: usize) -> Option<f64> {
    if history.len() < 3 {
        return None;
    }
    let tail: Vec<u64> = history
        .iter()
        .rev()
        .take(window + 1)
        .map(|e| e.timestamp)
        .collect();
    if tail.len() < 3 {
        return None;
    }
    let mut intervals: Vec<f64> = tail
        .windows(2)
        .map(|w| (w[0] as i64 - w[1] as i64).unsigned_abs() as f64)
        .collect();
    intervals.reverse();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean == 0.0 {
        return Some(0.0);
    }
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    Some(variance.sqrt() / mean)
}

/// Detects monotonic path-suffix walks, header-field sweeps, or
/// param-value sweeps suggesting systematic enumeration.
fn has_enumeration_signature(history: &[HistoryEntry]) -> bool {
    let suffixes: Vec<Option<u64>> = history
        .iter()
        .rev()
        .take(BEHAVIORAL_WINDOW)
        .map(|e| trailing_number(&e.endpoint))
        .collect();
    let numeric: Vec<u64> = suffixes.into_iter().flatten().collect();
    if numeric.len() < 5 {
        return false;
    }
    let mut sorted = numeric.clone();
    sorted.sort_unstable();
    sorted.dedup();
    // Arithmetic-progression check: consecutive differences are ~constant.
    let diffs: Vec<i64> = sorted.windows(2).map(|w| w[1] as i64 - w[0] as i64).collect();
    !diffs.is_empty() && diffs.iter().all(|&d| d == diffs[0]) && diffs[0] != 0
}

fn trailing_number(endpoint: &str) -> Option<u64> {
    let digits: String = endpoint.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

/// Absence of human-like noise: no endpoint variety, suggesting a scripted
/// client walking a fixed path template repeatedly.
fn lacks_human_noise(history: &[HistoryEntry]) -> bool {
    let recent: Vec<&HistoryEntry> = history.iter().rev().take(BEHAVIORAL_WINDOW).collect();
    if recent.len() < 5 {
        return false;
    }
    let unique_sizes: HashSet<usize> = recent.iter().map(|e| e.size).collect();
    unique_sizes.len() <= 1
}

fn distinct_param_value_count(req: &Request) -> usize {
    req.query_params
        .iter()
        .map(|(_, v)| v.clone())
        .collect::<HashSet<_>>()
        .len()
}

fn is_whitelisted(req: &Request, whitelist: &crate::config::Whitelist) -> bool {
    if whitelist.user_agents.iter().any(|ua| ua.eq_ignore_ascii_case(&req.user_agent)) {
        return true;
    }
    if whitelist.endpoint_globs.iter().any(|g| glob_match(g, &req.endpoint)) {
        return true;
    }
    if let Ok(addr) = req.source_address.parse::<IpAddr>() {
        if whitelist.cidrs.iter().any(|c| cidr_contains(c, addr)) {
            return true;
        }
    }
    false
}

/// Minimal glob matcher supporting a single trailing `*`, sufficient for
/// endpoint whitelist entries like `/health*`.
fn glob_match(pattern: &str, value: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        value.starts_with(prefix)
    } else {
        pattern == value
    }
}

fn cidr_contains(cidr: &str, addr: IpAddr) -> bool {
    let Some((base, bits)) = cidr.split_once('/') else {
        return cidr.parse::<IpAddr>().map(|a| a == addr).unwrap_or(false);
    };
    let (IpAddr::V4(base), IpAddr::V4(addr)) = (
        match base.parse::<IpAddr>() {
            Ok(a) => a,
            Err(_) => return false,
        },
        addr,
    ) else {
        return false;
    };
    let bits: u32 = match bits.parse() {
        Ok(b) => b,
        Err(_) => return false,
    };
    if bits > 32 {
        return false;
    }
    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
    u32::from(base) & mask == u32::from(addr) & mask
}
