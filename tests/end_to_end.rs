//! End-to-end scenarios exercised through the public `Orchestrator::process`
//! API only, mirroring the six concrete scenarios this pipeline is built
//! to classify correctly.

use std::collections::{BTreeMap, HashSet};
use std::thread;

use mirage_core::audit::AuditSink;
use mirage_core::config::ConfigLoader;
use mirage_core::orchestrator::Orchestrator;
use mirage_core::rng::SystemRandomSource;
use mirage_core::types::{Request, RiskLevel, VerdictAction};

const RULES_TOML: &str = include_str!("fixtures/rules.toml");
const POLICIES_TOML: &str = include_str!("fixtures/policies.toml");

fn base_request(endpoint: &str, timestamp: u64) -> Request {
    Request {
        timestamp,
        source_address: "198.51.100.10".to_string(),
        user_agent: "curl/7.88.0".to_string(),
        endpoint: endpoint.to_string(),
        query_params: vec![],
        headers: BTreeMap::new(),
        body: Vec::new(),
        session_id: "e2e-session".to_string(),
    }
}

fn orchestrator_with_drain() -> (Orchestrator<SystemRandomSource>, thread::JoinHandle<()>) {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("mirage_core=debug").try_init();
    let config = ConfigLoader::load(RULES_TOML, POLICIES_TOML).unwrap();
    let (sink, rx) = AuditSink::new();
    let drainer = thread::spawn(move || while rx.recv().is_ok() {});
    (Orchestrator::new(config, sink, SystemRandomSource), drainer)
}

#[test]
fn scenario_1_benign_whitelisted_get_is_allowed() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut request = base_request("/health", 1);
    request.user_agent = "HealthCheck/1.0".to_string();

    let verdict = orchestrator.process(request);

    assert_eq!(verdict.action, VerdictAction::Allow);
    assert_eq!(verdict.risk_assessment.level, RiskLevel::Low);
    assert!(verdict.tracking_token.is_none());
    assert!(verdict.deceptive_payload.is_none());
}

#[test]
fn scenario_2_classic_sql_injection_triggers_countermeasures() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut request = base_request("/api/users", 1);
    request.query_params = vec![("id".to_string(), "1' OR '1'='1".to_string())];
    request.body = b"SELECT * FROM users WHERE id='1' OR '1'='1'".to_vec();

    let verdict = orchestrator.process(request);

    assert_eq!(verdict.risk_assessment.threat_category, "sql_injection");
    assert!(verdict.risk_assessment.risk_score >= 80.0);
    assert_eq!(verdict.risk_assessment.level, RiskLevel::Critical);
    assert_eq!(verdict.action, VerdictAction::Countermeasures);

    let payload = verdict.deceptive_payload.expect("countermeasures carries a payload");
    let rows = payload["rows"].as_array().expect("sql honeypot payload has rows");
    assert!(rows.len() >= 5, "row count should scale with intensity");

    let token_hex = verdict.tracking_token.unwrap().to_hex();
    assert!(payload.to_string().contains(&token_hex));
}

#[test]
fn scenario_3_burst_scraping_escalates_to_high_or_critical() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut last_verdict = None;
    for n in 1..=120u64 {
        let mut request = base_request(&format!("/api/products?page={n}"), n * 50 / 1000 + n);
        request.endpoint = format!("/api/products/{n}");
        request.timestamp = n; // 50ms-scale monotonic clock, collapsed to integer ticks
        last_verdict = Some(orchestrator.process(request));
    }
    let verdict = last_verdict.unwrap();
    assert!(matches!(verdict.risk_assessment.level, RiskLevel::High | RiskLevel::Critical));
}

#[test]
fn scenario_4_directory_traversal_returns_filesystem_tree_with_token() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut request = base_request("/api/files/read", 1);
    request.query_params = vec![("path".to_string(), "../../etc/passwd".to_string())];
    request.body = b"../../etc/passwd".to_vec();

    let verdict = orchestrator.process(request);

    assert_eq!(verdict.risk_assessment.threat_category, "path_traversal");
    assert_eq!(verdict.action, VerdictAction::Countermeasures);

    let payload = verdict.deceptive_payload.expect("countermeasures carries a payload");
    let token_hex = verdict.tracking_token.unwrap().to_hex();
    assert!(payload.to_string().contains(&token_hex));
    assert!(payload.get("tree").is_some());
}

#[test]
fn scenario_5_honeypot_path_hit_returns_env_dump_with_token() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut request = base_request("/.env", 1);
    request.body = b";cat /etc/passwd".to_vec();

    let verdict = orchestrator.process(request);

    assert_eq!(verdict.action, VerdictAction::Countermeasures);
    let payload = verdict.deceptive_payload.expect("countermeasures carries a payload");
    let token_hex = verdict.tracking_token.unwrap().to_hex();
    assert!(payload.to_string().contains(&token_hex));
}

#[test]
fn scenario_6_config_reload_mid_traffic_does_not_mix_snapshots() {
    let (orchestrator, _drain) = orchestrator_with_drain();

    let borderline_score_request = || {
        let mut request = base_request("/api/search", 1);
        request.query_params = vec![("q".to_string(), "<script>x</script>".to_string())];
        request.body = b"<script>alert(1)</script>".to_vec();
        request
    };

    let before = orchestrator.process(borderline_score_request());

    let stricter = RULES_TOML.replace("risk_score = 45.0", "risk_score = 95.0");
    orchestrator.reload_config(&stricter, POLICIES_TOML);

    let after = orchestrator.process(borderline_score_request());

    assert!(before.risk_assessment.risk_score < after.risk_assessment.risk_score);
}

#[test]
fn invariant_p2_tracking_tokens_are_pairwise_distinct() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut tokens = HashSet::new();
    for i in 0..20u64 {
        let mut request = base_request("/api/login", i);
        request.body = b"' UNION SELECT password FROM users--".to_vec();
        let verdict = orchestrator.process(request);
        if let Some(token) = verdict.tracking_token {
            assert!(tokens.insert(token.to_hex()), "tracking token reused across verdicts");
        }
    }
    assert!(!tokens.is_empty());
}

#[test]
fn invariant_p5_allow_verdicts_carry_no_token_or_payload() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let verdict = orchestrator.process(base_request("/api/users", 1));
    assert_eq!(verdict.action, VerdictAction::Allow);
    assert!(verdict.tracking_token.is_none());
    assert!(verdict.deceptive_payload.is_none());
}

#[test]
fn invariant_p9_audit_ids_increase_in_emission_order() {
    let (orchestrator, _drain) = orchestrator_with_drain();
    let mut previous = 0u64;
    for i in 0..10u64 {
        let verdict = orchestrator.process(base_request("/api/users", i));
        assert!(verdict.audit_id > previous);
        previous = verdict.audit_id;
    }
}
