//! ScenarioRegistry: resolves a threat category to a
//! `Scenario`, falling back to `PolicyBook::fallback_scenario` on a miss.
//! Also resolves the `IntensityTier` → numeric intensity via the scenario's
//! `CounterStrategy`.

use crate::config::PolicyBook;
use crate::error::CoreError;
use crate::types::{IntensityTier, Scenario};

pub struct ScenarioRegistry<'a> {
    policies: &'a PolicyBook,
}

impl<'a> ScenarioRegistry<'a> {
    pub fn new(policies: &'a PolicyBook) -> Self {
        Self { policies }
    }

    /// Exact match on `threat_categories`, else the fallback scenario.
    /// A miss is recorded via `CoreError::ScenarioResolutionMiss` but is
    /// always recovered locally — the return value is never an `Err`.
    pub fn resolve(&self, threat_category: &str) -> (&Scenario, Option<CoreError>) {
        let found = self
            .policies
            .scenarios
            .iter()
            .find(|s| s.threat_categories.iter().any(|c| c == threat_category));
        match found {
            Some(scenario) => (scenario, None),
            None => (
                &self.policies.fallback_scenario,
                Some(CoreError::ScenarioResolutionMiss {
                    category: threat_category.to_string(),
                }),
            ),
        }
    }

    /// Numeric intensity for `scenario` at `tier`, via its counter-strategy.
    /// Falls back to `1` if the counter-strategy name is unknown — this
    /// should never happen for a config that passed `validate_policies`,
    /// but `Orchestrator` should not panic on it in production.
    pub fn intensity_for(&self, scenario: &Scenario, tier: IntensityTier) -> u32 {
        let Some(strategy) = self.policies.counter_strategies.get(&scenario.counter_strategy) else {
            return 1;
        };
        match tier {
            IntensityTier::Low => strategy.low_intensity,
            IntensityTier::Medium => strategy.medium_intensity,
            IntensityTier::High => strategy.high_intensity,
        }
    }
}
