use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// key: billing-plan -> subscription tier
///
/// Plans arrive as free-form strings from storage, so anything outside the
/// known tiers is kept verbatim as `Unrecognised` instead of failing the load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Plan {
    Ultimate,
    Enterprise,
    Basic,
    Lite,
    Trial,
    Unrecognised(String),
}

impl Plan {
    pub const KNOWN: [Plan; 5] = [
        Plan::Ultimate,
        Plan::Enterprise,
        Plan::Basic,
        Plan::Lite,
        Plan::Trial,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Plan::Ultimate => "Ultimate",
            Plan::Enterprise => "Enterprise",
            Plan::Basic => "Basic",
            Plan::Lite => "Lite",
            Plan::Trial => "Trial",
            Plan::Unrecognised(name) => name.as_str(),
        }
    }

    pub fn is_recognised(&self) -> bool {
        !matches!(self, Plan::Unrecognised(_))
    }

    fn default_allowance(&self) -> i64 {
        match self {
            Plan::Ultimate => 1000,
            Plan::Enterprise => 500,
            Plan::Basic => 100,
            Plan::Lite => 20,
            Plan::Trial => 10,
            Plan::Unrecognised(_) => 0,
        }
    }
}

impl From<String> for Plan {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(Plan::Unrecognised(value))
    }
}

impl From<Plan> for String {
    fn from(plan: Plan) -> Self {
        match plan {
            Plan::Unrecognised(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for Plan {
    type Err = CatalogError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "Ultimate" => Ok(Plan::Ultimate),
            "Enterprise" => Ok(Plan::Enterprise),
            "Basic" => Ok(Plan::Basic),
            "Lite" => Ok(Plan::Lite),
            "Trial" => Ok(Plan::Trial),
            other => Err(CatalogError::UnknownPlan(other.to_string())),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown plan `{0}`")]
    UnknownPlan(String),
    #[error("plan `{plan}` must have a positive allowance, got {allowance}")]
    InvalidAllowance { plan: String, allowance: i64 },
}

/// key: billing-plan-catalog -> monthly allowance per plan
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    allowances: HashMap<Plan, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanCatalogEntry {
    pub plan: Plan,
    pub monthly_allowance: i64,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let allowances = Plan::KNOWN
            .iter()
            .map(|plan| (plan.clone(), plan.default_allowance()))
            .collect();
        Self { allowances }
    }
}

impl PlanCatalog {
    /// Builds the catalog from the default allowances, replacing any plan named
    /// in `overrides`.
    pub fn with_overrides(overrides: &HashMap<String, i64>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for (name, allowance) in overrides {
            let plan: Plan = name.parse()?;
            if *allowance <= 0 {
                return Err(CatalogError::InvalidAllowance {
                    plan: name.clone(),
                    allowance: *allowance,
                });
            }
            catalog.allowances.insert(plan, *allowance);
        }
        Ok(catalog)
    }

    pub fn allowance(&self, plan: &Plan) -> i64 {
        match plan {
            Plan::Unrecognised(name) => {
                tracing::warn!(plan = %name, "unrecognised plan has no monthly allowance");
                0
            }
            known => self
                .allowances
                .get(known)
                .copied()
                .unwrap_or_else(|| known.default_allowance()),
        }
    }

    pub fn entries(&self) -> Vec<PlanCatalogEntry> {
        let mut entries: Vec<_> = Plan::KNOWN
            .iter()
            .map(|plan| PlanCatalogEntry {
                plan: plan.clone(),
                monthly_allowance: self.allowance(plan),
            })
            .collect();
        entries.sort_by(|a, b| b.monthly_allowance.cmp(&a.monthly_allowance));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allowances_match_plan_tiers() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.allowance(&Plan::Ultimate), 1000);
        assert_eq!(catalog.allowance(&Plan::Enterprise), 500);
        assert_eq!(catalog.allowance(&Plan::Basic), 100);
        assert_eq!(catalog.allowance(&Plan::Lite), 20);
        assert_eq!(catalog.allowance(&Plan::Trial), 10);
    }

    #[test]
    fn unrecognised_plan_has_zero_allowance() {
        let catalog = PlanCatalog::default();
        let plan = Plan::from("Platinum".to_string());
        assert_eq!(plan, Plan::Unrecognised("Platinum".into()));
        assert_eq!(catalog.allowance(&plan), 0);
    }

    #[test]
    fn plan_names_survive_serde() {
        let json = serde_json::to_string(&Plan::Enterprise).unwrap();
        assert_eq!(json, "\"Enterprise\"");

        let legacy: Plan = serde_json::from_str("\"Legacy\"").unwrap();
        assert_eq!(serde_json::to_string(&legacy).unwrap(), "\"Legacy\"");
        assert!(!legacy.is_recognised());
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = HashMap::from([("Basic".to_string(), 150)]);
        let catalog = PlanCatalog::with_overrides(&overrides).unwrap();
        assert_eq!(catalog.allowance(&Plan::Basic), 150);
        assert_eq!(catalog.allowance(&Plan::Lite), 20);
    }

    #[test]
    fn overrides_reject_unknown_plans_and_bad_allowances() {
        let unknown = HashMap::from([("Gold".to_string(), 10)]);
        assert_eq!(
            PlanCatalog::with_overrides(&unknown).unwrap_err(),
            CatalogError::UnknownPlan("Gold".into())
        );

        let zero = HashMap::from([("Trial".to_string(), 0)]);
        assert!(matches!(
            PlanCatalog::with_overrides(&zero),
            Err(CatalogError::InvalidAllowance { allowance: 0, .. })
        ));
    }

    #[test]
    fn entries_are_ordered_by_allowance() {
        let entries = PlanCatalog::default().entries();
        let plans: Vec<_> = entries.iter().map(|entry| entry.plan.clone()).collect();
        assert_eq!(
            plans,
            vec![
                Plan::Ultimate,
                Plan::Enterprise,
                Plan::Basic,
                Plan::Lite,
                Plan::Trial
            ]
        );
    }
}
