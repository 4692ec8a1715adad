//! DeceptionFactory: builds a deceptive payload for a
//! scenario at a given intensity, deterministically seeded from the
//! request's tracking token. Every leaf string embeds the token's hex
//! form. Grounded on `axiom-ai-enhancement::contract_auditor`'s
//! template-driven report builders, generalized here to produce JSON
//! honeypot bodies instead of audit reports.

use serde_json::{json, Value};

use crate::error::CoreError;
use crate::rng::SeededGenerator;
use crate::types::{IntensityTier, PayloadKind, Scenario, TrackingToken};

pub struct DeceptionFactory;

impl DeceptionFactory {
    /// Builds the payload `scenario.required_payload_kinds` calls for (the
    /// first kind is authoritative; a scenario names exactly the kinds its
    /// template needs). Falls back to `Generic` on any build
    /// failure, recording the miss as a `CoreError` the caller may log.
    pub fn build(
        scenario: &Scenario,
        intensity: IntensityTier,
        intensity_value: u32,
        token: &TrackingToken,
    ) -> (Value, Option<CoreError>) {
        let kind = scenario.required_payload_kinds.first().copied().unwrap_or(PayloadKind::Generic);
        let mut rng = SeededGenerator::from_token(token);

        let built = match kind {
            PayloadKind::SqlHoneypot => build_sql_honeypot(&mut rng, intensity_value, token),
            PayloadKind::ApiScrapingFlood => build_api_scraping_flood(&mut rng, intensity_value, token),
            PayloadKind::CredentialStuffing => build_credential_stuffing(&mut rng, intensity_value, token),
            PayloadKind::EnvConfigDump => build_env_config_dump(&mut rng, intensity_value, token),
            PayloadKind::FilesystemTree => build_filesystem_tree(&mut rng, intensity_value, token),
            PayloadKind::Generic => Ok(build_generic(&mut rng, intensity, token)),
        };

        match built {
            Ok(value) => (value, None),
            Err(err) => (
                build_generic(&mut rng, intensity, token),
                Some(err),
            ),
        }
    }
}

const FIRST_NAMES: &[&str] = &["alice", "bob", "carla", "derek", "elena", "farid", "gina", "hugo"];
const DOMAINS: &[&str] = &["corp.internal", "example.net", "acme.test"];

fn build_sql_honeypot(rng: &mut SeededGenerator, intensity: u32, token: &TrackingToken) -> Result<Value, CoreError> {
    let row_count = intensity.clamp(3, 200) as usize;
    let rows: Vec<Value> = (0..row_count)
        .map(|i| {
            let name = rng.choose(FIRST_NAMES);
            let domain = rng.choose(DOMAINS);
            let role = if i == 0 { "admin" } else { "user" };
            json!({
                "id": i + 1,
                "username": format!("{name}{}.{}", rng.gen_range_usize(1, 999), token.to_hex()),
                "email": format!("{name}.{}@{domain}", token.to_hex()),
                "password_hash": format!("$2b$12${}{}", rng.hex_string(22), token.to_hex()),
                "api_key": format!("sk_live_{}_{}", token.to_hex(), rng.hex_string(8)),
                "role": format!("{role}:{}", token.to_hex()),
            })
        })
        .collect();

    Ok(json!({
        "schema": {
            "table": format!("users_{}", token.to_hex()),
            "tracking_ref": token.to_hex(),
        },
        "rows": rows,
    }))
}

fn build_api_scraping_flood(rng: &mut SeededGenerator, intensity: u32, token: &TrackingToken) -> Result<Value, CoreError> {
    let page_count = intensity.clamp(1, 500) as usize;
    let items: Vec<Value> = (0..page_count.min(50))
        .map(|i| {
            json!({
                "id": format!("item-{}-{}", token.to_hex(), i),
                "price": 10 + rng.gen_range_usize(0, 990),
                "in_stock": rng.gen_range_usize(0, 2) == 0,
            })
        })
        .collect();

    Ok(json!({
        "page": 1,
        "total_pages": page_count,
        "tracking_ref": token.to_hex(),
        "items": items,
        "next_cursor": format!("cur_{}_{}", rng.hex_string(12), token.to_hex()),
    }))
}

fn build_credential_stuffing(rng: &mut SeededGenerator, intensity: u32, token: &TrackingToken) -> Result<Value, CoreError> {
    let attempts = intensity.clamp(1, 50) as usize;
    let accounts: Vec<Value> = (0..attempts)
        .map(|_| {
            let name = rng.choose(FIRST_NAMES);
            json!({
                "username": format!("{name}{}.{}", rng.gen_range_usize(100, 999), token.to_hex()),
                "locked": rng.gen_range_usize(0, 3) == 0,
                "tracking_ref": token.to_hex(),
            })
        })
        .collect();

    Ok(json!({
        "status": "authenticated",
        "session_token": format!("ldap_sess_{}_{}", token.to_hex(), rng.hex_string(6)),
        "accounts": accounts,
    }))
}

fn build_env_config_dump(rng: &mut SeededGenerator, _intensity: u32, token: &TrackingToken) -> Result<Value, CoreError> {
    Ok(json!({
        "DATABASE_URL": format!("postgres://svc_{}:{}@db.internal:5432/app", token.to_hex(), rng.hex_string(10)),
        "AWS_SECRET_ACCESS_KEY": format!("{}{}", token.to_hex(), rng.hex_string(20)),
        "JWT_SIGNING_KEY": format!("{}{}", token.to_hex(), rng.hex_string(32)),
        "TRACKING_REF": token.to_hex(),
        "ENVIRONMENT": format!("production-{}", token.to_hex()),
    }))
}

fn build_filesystem_tree(rng: &mut SeededGenerator, intensity: u32, token: &TrackingToken) -> Result<Value, CoreError> {
    let depth = intensity.clamp(1, 10) as usize;
    let mut node = json!({
        "name": format!("secret-{}.txt", token.to_hex()),
        "type": "file",
    });
    for level in (0..depth).rev() {
        node = json!({
            "name": format!("dir-{level}-{}-{}", rng.hex_string(4), token.to_hex()),
            "type": "directory",
            "children": [node],
        });
    }
    Ok(json!({
        "root": format!("/srv/app-{}", token.to_hex()),
        "tree": node,
    }))
}

fn build_generic(rng: &mut SeededGenerator, intensity: IntensityTier, token: &TrackingToken) -> Value {
    json!({
        "status": "ok",
        "intensity": format!("{intensity:?}"),
        "request_id": format!("req_{}_{}", token.to_hex(), rng.hex_string(4)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PayloadKind;

    fn scenario_with(kind: PayloadKind) -> Scenario {
        Scenario {
            name: "test".to_string(),
            threat_categories: vec!["x".to_string()],
            required_payload_kinds: vec![kind],
            template_id: "t".to_string(),
            counter_strategy: "c".to_string(),
            isolation_level: "none".to_string(),
        }
    }

    fn token() -> TrackingToken {
        TrackingToken([0x42u8; 16])
    }

    #[test]
    fn every_payload_kind_embeds_the_tracking_token() {
        for kind in [
            PayloadKind::SqlHoneypot,
            PayloadKind::ApiScrapingFlood,
            PayloadKind::CredentialStuffing,
            PayloadKind::EnvConfigDump,
            PayloadKind::FilesystemTree,
            PayloadKind::Generic,
        ] {
            let scenario = scenario_with(kind);
            let t = token();
            let (payload, err) = DeceptionFactory::build(&scenario, IntensityTier::Medium, 10, &t);
            assert!(err.is_none());
            let serialized = payload.to_string();
            assert!(
                serialized.contains(&t.to_hex()),
                "payload for {kind:?} did not embed tracking token: {serialized}"
            );
        }
    }

    #[test]
    fn same_token_produces_identical_payload() {
        let scenario = scenario_with(PayloadKind::SqlHoneypot);
        let t = token();
        let (a, _) = DeceptionFactory::build(&scenario, IntensityTier::High, 20, &t);
        let (b, _) = DeceptionFactory::build(&scenario, IntensityTier::High, 20, &t);
        assert_eq!(a, b);
    }

    #[test]
    fn different_tokens_produce_different_payloads() {
        let scenario = scenario_with(PayloadKind::SqlHoneypot);
        let (a, _) = DeceptionFactory::build(&scenario, IntensityTier::High, 20, &TrackingToken([1u8; 16]));
        let (b, _) = DeceptionFactory::build(&scenario, IntensityTier::High, 20, &TrackingToken([2u8; 16]));
        assert_ne!(a, b);
    }

    #[test]
    fn sql_honeypot_row_count_scales_with_intensity() {
        let scenario = scenario_with(PayloadKind::SqlHoneypot);
        let t = token();
        let (payload, _) = DeceptionFactory::build(&scenario, IntensityTier::Low, 5, &t);
        let rows = payload["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 5);
    }
}
