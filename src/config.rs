//! Config loader.
//!
//! Parses two declarative TOML documents — rules and policies — into typed,
//! validated, immutable in-memory tables. `ConfigLoader` holds the current
//! snapshot behind an `RwLock<Arc<_>>` so `reload()` can swap both tables
//! atomically while in-flight requests keep using the snapshot they
//! acquired at the start of `process()` via copy-on-write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigDocument, ConfigError};
use crate::types::{PayloadKind, ResponseAction, RiskLevel, Scenario};

/// A single named content-detection pattern, grouped by threat category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub group: String,
    pub regex: String,
    pub risk_score: f64,
}

/// Configured score + threshold for one of the timing/behavioral/ML-attack
/// checks in a rules document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoredThreshold {
    pub threshold: f64,
    pub risk_score: f64,
}

/// Whitelist entries consulted by SafetyFilter stage 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Whitelist {
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub cidrs: Vec<String>,
    #[serde(default)]
    pub endpoint_globs: Vec<String>,
}

/// Risk-level → actions ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePolicy {
    pub low: Vec<ResponseAction>,
    pub medium: Vec<ResponseAction>,
    pub high: Vec<ResponseAction>,
    pub critical: Vec<ResponseAction>,
}

impl ResponsePolicy {
    pub fn for_level(&self, level: RiskLevel) -> &[ResponseAction] {
        match level {
            RiskLevel::Low => &self.low,
            RiskLevel::Medium => &self.medium,
            RiskLevel::High => &self.high,
            RiskLevel::Critical => &self.critical,
        }
    }
}

/// The raw `rules.toml` document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesDocument {
    pub min_suspicious: f64,
    pub burst_threshold: f64,
    pub consistent_timing: ScoredThreshold,
    pub burst_activity: ScoredThreshold,
    pub systematic_enumeration: ScoredThreshold,
    pub token_sweep: ScoredThreshold,
    pub fingerprint_rotation: ScoredThreshold,
    pub model_inversion: ScoredThreshold,
    pub membership_inference: ScoredThreshold,
    pub model_extraction: ScoredThreshold,
    #[serde(default)]
    pub content_patterns: Vec<PatternRule>,
    #[serde(default)]
    pub whitelist: Whitelist,
    pub response_policies: ResponsePolicy,
    /// Ladder used by `RiskLevel::from_score`; kept here too so a reload
    /// can validate the document's own expectations against the compiled
    /// ladder (validation rule: "risk-threshold ladder must be
    /// strictly increasing").
    pub risk_ladder: RiskLadder,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskLadder {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

/// The raw `policies.toml` document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesDocument {
    pub scenarios: Vec<Scenario>,
    pub fallback_scenario: Scenario,
    pub counter_strategies: HashMap<String, CounterStrategy>,
}

/// Non-decreasing intensity tiers for a scenario's counter-strategy
/// (validation rule: "at least three intensity tiers, non-decreasing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterStrategy {
    pub low_intensity: u32,
    pub medium_intensity: u32,
    pub high_intensity: u32,
}

/// A `PatternRule` paired with its pre-compiled `Regex`. Compiling once at
/// load time (rather than per request) keeps the per-request CPU budget
/// predictable; `Regex::clone` is cheap (reference-counted internally)
/// so this is safe to hand out to every request via the shared snapshot.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub rule: PatternRule,
    pub regex: regex::Regex,
}

/// Validated, immutable in-memory RuleBook.
#[derive(Debug, Clone)]
pub struct RuleBook {
    pub min_suspicious: f64,
    pub burst_threshold: f64,
    pub consistent_timing: ScoredThreshold,
    pub burst_activity: ScoredThreshold,
    pub systematic_enumeration: ScoredThreshold,
    pub token_sweep: ScoredThreshold,
    pub fingerprint_rotation: ScoredThreshold,
    pub model_inversion: ScoredThreshold,
    pub membership_inference: ScoredThreshold,
    pub model_extraction: ScoredThreshold,
    pub content_patterns: Vec<CompiledPattern>,
    pub whitelist: Whitelist,
    pub response_policies: ResponsePolicy,
    pub risk_ladder: RiskLadder,
}

/// Validated, immutable in-memory PolicyBook.
#[derive(Debug, Clone)]
pub struct PolicyBook {
    pub scenarios: Vec<Scenario>,
    pub fallback_scenario: Scenario,
    pub counter_strategies: HashMap<String, CounterStrategy>,
}

fn validate_rules(doc: &RulesDocument) -> Result<(), ConfigError> {
    let ladder = &doc.risk_ladder;
    if !(ladder.low < ladder.medium && ladder.medium < ladder.high && ladder.high < ladder.critical) {
        return Err(ConfigError::new(
            ConfigDocument::Rules,
            "risk_ladder thresholds must be strictly increasing (low < medium < high < critical)",
        ));
    }

    for (name, st) in [
        ("consistent_timing", &doc.consistent_timing),
        ("burst_activity", &doc.burst_activity),
        ("systematic_enumeration", &doc.systematic_enumeration),
        ("token_sweep", &doc.token_sweep),
        ("fingerprint_rotation", &doc.fingerprint_rotation),
        ("model_inversion", &doc.model_inversion),
        ("membership_inference", &doc.membership_inference),
        ("model_extraction", &doc.model_extraction),
    ] {
        if st.risk_score <= 0.0 {
            return Err(ConfigError::new(
                ConfigDocument::Rules,
                format!("{name}.risk_score must be positive"),
            ));
        }
    }

    for pattern in &doc.content_patterns {
        if pattern.risk_score <= 0.0 {
            return Err(ConfigError::new(
                ConfigDocument::Rules,
                format!("content pattern `{}` has non-positive risk_score", pattern.name),
            ));
        }
        regex::Regex::new(&pattern.regex).map_err(|e| {
            ConfigError::new(
                ConfigDocument::Rules,
                format!("content pattern `{}` has invalid regex: {e}", pattern.name),
            )
        })?;
    }

    Ok(())
}

fn validate_policies(doc: &PoliciesDocument, rules: &RulesDocument) -> Result<(), ConfigError> {
    let known_templates: std::collections::HashSet<&str> =
        doc.counter_strategies.keys().map(String::as_str).collect();
    let known_categories: std::collections::HashSet<&str> = rules
        .content_patterns
        .iter()
        .map(|p| p.group.as_str())
        .chain(["suspicious_behavior", "unknown"])
        .collect();

    for scenario in doc.scenarios.iter().chain(std::iter::once(&doc.fallback_scenario)) {
        if scenario.threat_categories.is_empty() {
            return Err(ConfigError::new(
                ConfigDocument::Policies,
                format!("scenario `{}` names no threat categories", scenario.name),
            ));
        }
        if !known_templates.contains(scenario.counter_strategy.as_str()) {
            return Err(ConfigError::new(
                ConfigDocument::Policies,
                format!(
                    "scenario `{}` references unknown counter_strategy `{}`",
                    scenario.name, scenario.counter_strategy
                ),
            ));
        }
        for category in &scenario.threat_categories {
            if !known_categories.contains(category.as_str()) {
                return Err(ConfigError::new(
                    ConfigDocument::Policies,
                    format!(
                        "scenario `{}` references unknown threat category `{}`",
                        scenario.name, category
                    ),
                ));
            }
        }
    }

    for (name, strategy) in &doc.counter_strategies {
        if !(strategy.low_intensity <= strategy.medium_intensity
            && strategy.medium_intensity <= strategy.high_intensity)
        {
            return Err(ConfigError::new(
                ConfigDocument::Policies,
                format!("counter_strategy `{name}` intensity tiers must be non-decreasing"),
            ));
        }
    }

    Ok(())
}

pub fn load_rules(source: &str) -> Result<RuleBook, ConfigError> {
    let doc: RulesDocument = toml::from_str(source)
        .map_err(|e| ConfigError::new(ConfigDocument::Rules, format!("parse error: {e}")))?;
    validate_rules(&doc)?;

    // `validate_rules` already confirmed every pattern compiles; compiling
    // again here (rather than threading the `Regex` values through
    // validation) keeps validation a pure yes/no check over the raw
    // document.
    let content_patterns = doc
        .content_patterns
        .into_iter()
        .map(|rule| {
            let regex = regex::Regex::new(&rule.regex).map_err(|e| {
                ConfigError::new(
                    ConfigDocument::Rules,
                    format!("content pattern `{}` has invalid regex: {e}", rule.name),
                )
            })?;
            Ok(CompiledPattern { rule, regex })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(RuleBook {
        min_suspicious: doc.min_suspicious,
        burst_threshold: doc.burst_threshold,
        consistent_timing: doc.consistent_timing,
        burst_activity: doc.burst_activity,
        systematic_enumeration: doc.systematic_enumeration,
        token_sweep: doc.token_sweep,
        fingerprint_rotation: doc.fingerprint_rotation,
        model_inversion: doc.model_inversion,
        membership_inference: doc.membership_inference,
        model_extraction: doc.model_extraction,
        content_patterns,
        whitelist: doc.whitelist,
        response_policies: doc.response_policies,
        risk_ladder: doc.risk_ladder,
    })
}

pub fn load_policies(source: &str, rules_doc_source: &str) -> Result<PolicyBook, ConfigError> {
    let doc: PoliciesDocument = toml::from_str(source)
        .map_err(|e| ConfigError::new(ConfigDocument::Policies, format!("parse error: {e}")))?;
    let rules_doc: RulesDocument = toml::from_str(rules_doc_source)
        .map_err(|e| ConfigError::new(ConfigDocument::Rules, format!("parse error: {e}")))?;
    validate_policies(&doc, &rules_doc)?;
    Ok(PolicyBook {
        scenarios: doc.scenarios,
        fallback_scenario: doc.fallback_scenario,
        counter_strategies: doc.counter_strategies,
    })
}

/// Holds the current `(RuleBook, PolicyBook)` pair behind an atomically
/// swappable pointer. Readers call `snapshot()` once at the start of a
/// request and hold that `Arc` for the request.s duration.
pub struct ConfigLoader {
    current: RwLock<Arc<(RuleBook, PolicyBook)>>,
}

impl ConfigLoader {
    pub fn load(rules_source: &str, policies_source: &str) -> Result<Self, ConfigError> {
        let rules = load_rules(rules_source)?;
        let policies = load_policies(policies_source, rules_source)?;
        Ok(Self {
            current: RwLock::new(Arc::new((rules, policies))),
        })
    }

    pub fn snapshot(&self) -> Arc<(RuleBook, PolicyBook)> {
        self.current.read().clone()
    }

    /// Atomically replaces the pair. In-flight requests that already hold
    /// a snapshot (an `Arc` clone) keep running on the prior version; new
    /// requests see the swap immediately.
    pub fn reload(&self, rules_source: &str, policies_source: &str) -> Result<(), ConfigError> {
        let rules = load_rules(rules_source)?;
        let policies = load_policies(policies_source, rules_source)?;
        *self.current.write() = Arc::new((rules, policies));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const RULES_TOML: &str = r#"
min_suspicious = 30.0
burst_threshold = 5.0

[consistent_timing]
threshold = 0.05
risk_score = 20.0

[burst_activity]
threshold = 10.0
risk_score = 25.0

[systematic_enumeration]
threshold = 5.0
risk_score = 20.0

[token_sweep]
threshold = 10.0
risk_score = 15.0

[fingerprint_rotation]
threshold = 3.0
risk_score = 15.0

[model_inversion]
threshold = 10.0
risk_score = 20.0

[membership_inference]
threshold = 10.0
risk_score = 20.0

[model_extraction]
threshold = 10.0
risk_score = 20.0

[[content_patterns]]
name = "sql_union_select"
group = "sql_injection"
regex = "(?i)union\\s+select"
risk_score = 60.0

[[content_patterns]]
name = "sql_tautology"
group = "sql_injection"
regex = "(?i)'\\s*or\\s*'?1'?\\s*=\\s*'?1"
risk_score = 82.0

[[content_patterns]]
name = "xss_script_tag"
group = "xss"
regex = "(?i)<script[^>]*>"
risk_score = 45.0

[[content_patterns]]
name = "path_traversal_dotdot"
group = "path_traversal"
regex = "\\.\\./\\.\\./"
risk_score = 65.0

[[content_patterns]]
name = "cmd_injection_semicolon"
group = "cmd_injection"
regex = "(?i);\\s*(cat|ls|whoami|curl|wget)\\b"
risk_score = 65.0

[[content_patterns]]
name = "ldap_injection_wildcard"
group = "ldap_injection"
regex = '\(\|\(.*=\*\)\)'
risk_score = 40.0

[whitelist]
user_agents = ["HealthCheck/1.0"]
cidrs = ["10.0.0.0/8"]
endpoint_globs = ["/health", "/healthz"]

[response_policies]
low = ["log"]
medium = ["log", "track", "rate_limit"]
high = ["log", "track", "serve_fake", "deploy_counter"]
critical = ["log", "track", "serve_fake", "deploy_counter", "aggressive_rate_limit", "set_traps", "reverse_tracking"]

[risk_ladder]
low = 0.0
medium = 30.0
high = 60.0
critical = 80.0
"#;

    pub const POLICIES_TOML: &str = r#"
[[scenarios]]
name = "sql_injection_honeypot"
threat_categories = ["sql_injection"]
required_payload_kinds = ["sql_honeypot"]
template_id = "sql_honeypot_v1"
counter_strategy = "sql_injection"
isolation_level = "container"

[[scenarios]]
name = "xss_honeypot"
threat_categories = ["xss"]
required_payload_kinds = ["generic"]
template_id = "generic_v1"
counter_strategy = "xss"
isolation_level = "container"

[[scenarios]]
name = "path_traversal_honeypot"
threat_categories = ["path_traversal"]
required_payload_kinds = ["filesystem_tree"]
template_id = "filesystem_tree_v1"
counter_strategy = "path_traversal"
isolation_level = "container"

[[scenarios]]
name = "cmd_injection_honeypot"
threat_categories = ["cmd_injection"]
required_payload_kinds = ["env_config_dump"]
template_id = "env_config_dump_v1"
counter_strategy = "cmd_injection"
isolation_level = "container"

[[scenarios]]
name = "ldap_injection_honeypot"
threat_categories = ["ldap_injection"]
required_payload_kinds = ["credential_stuffing"]
template_id = "credential_stuffing_v1"
counter_strategy = "ldap_injection"
isolation_level = "container"

[[scenarios]]
name = "scraping_flood_honeypot"
threat_categories = ["suspicious_behavior"]
required_payload_kinds = ["api_scraping_flood"]
template_id = "api_scraping_flood_v1"
counter_strategy = "suspicious_behavior"
isolation_level = "container"

[fallback_scenario]
name = "generic_fallback"
threat_categories = ["unknown"]
required_payload_kinds = ["generic"]
template_id = "generic_v1"
counter_strategy = "generic"
isolation_level = "none"

[counter_strategies.sql_injection]
low_intensity = 10
medium_intensity = 30
high_intensity = 60

[counter_strategies.xss]
low_intensity = 5
medium_intensity = 15
high_intensity = 30

[counter_strategies.path_traversal]
low_intensity = 5
medium_intensity = 20
high_intensity = 40

[counter_strategies.cmd_injection]
low_intensity = 5
medium_intensity = 15
high_intensity = 30

[counter_strategies.ldap_injection]
low_intensity = 5
medium_intensity = 15
high_intensity = 30

[counter_strategies.suspicious_behavior]
low_intensity = 10
medium_intensity = 40
high_intensity = 100

[counter_strategies.generic]
low_intensity = 1
medium_intensity = 1
high_intensity = 1
"#;
}
