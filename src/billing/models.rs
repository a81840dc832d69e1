use std::collections::HashMap;

use chrono::{DateTime, Datelike, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::plans::{Plan, PlanCatalog};

/// Share of the total credits at which an organisation is warned.
pub const APPROACHING_LIMIT_RATIO: f64 = 0.8;

/// key: billing-account-model -> organisation credit ledger for the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganisationAccount {
    pub id: String,
    pub plan: Plan,
    pub used_credits: i64,
    pub monthly_usage_remaining: i64,
    #[serde(default)]
    pub user_usage: HashMap<String, i64>,
    pub top_up_credits: i64,
    pub per_user_limit: i64,
    pub last_reset_date: DateTime<Utc>,
    pub notification_sent: bool,
    pub total_credits: i64,
}

impl OrganisationAccount {
    /// Fresh account on `plan` with no usage, cycle starting at `now`.
    pub fn new(
        id: impl Into<String>,
        plan: Plan,
        now: DateTime<Utc>,
        catalog: &PlanCatalog,
    ) -> Self {
        let mut account = Self {
            id: id.into(),
            plan,
            used_credits: 0,
            monthly_usage_remaining: 0,
            user_usage: HashMap::new(),
            top_up_credits: 0,
            per_user_limit: 0,
            last_reset_date: cycle_start(now),
            notification_sent: false,
            total_credits: 0,
        };
        account.refresh_derived_totals(catalog);
        account
    }

    pub fn compute_total_credits(&self, catalog: &PlanCatalog) -> i64 {
        catalog
            .allowance(&self.plan)
            .saturating_add(self.top_up_credits)
    }

    /// Adds top-up credits and refreshes the totals. Returns `false` and
    /// leaves the account untouched when the new total would not fit.
    pub fn add_top_up(&mut self, credits: i64, catalog: &PlanCatalog) -> bool {
        let allowance = catalog.allowance(&self.plan);
        let Some(top_up) = self
            .top_up_credits
            .checked_add(credits)
            .filter(|top_up| allowance.checked_add(*top_up).is_some())
        else {
            return false;
        };
        self.top_up_credits = top_up;
        self.refresh_derived_totals(catalog);
        true
    }

    pub fn refresh_derived_totals(&mut self, catalog: &PlanCatalog) {
        let previous_total = self.total_credits;
        self.total_credits = self.compute_total_credits(catalog);
        self.monthly_usage_remaining = self.total_credits - self.used_credits;
        tracing::debug!(
            org_id = %self.id,
            plan = %self.plan,
            previous_total,
            total_credits = self.total_credits,
            top_up_credits = self.top_up_credits,
            used_credits = self.used_credits,
            remaining = self.monthly_usage_remaining,
            "refreshed credit totals"
        );
    }

    pub fn remaining_credits(&self) -> i64 {
        self.monthly_usage_remaining
    }

    pub fn usage_for_user(&self, user_id: &str) -> i64 {
        self.user_usage.get(user_id).copied().unwrap_or(0)
    }

    pub fn can_user_consume(&self, user_id: &str) -> bool {
        if self.remaining_credits() <= 0 {
            return false;
        }
        if self.per_user_limit > 0 && self.usage_for_user(user_id) >= self.per_user_limit {
            return false;
        }
        true
    }

    /// Records one credit against `user_id`. Callers check
    /// [`can_user_consume`](Self::can_user_consume) first.
    pub fn consume_credit(&mut self, user_id: &str) {
        self.used_credits += 1;
        *self.user_usage.entry(user_id.to_string()).or_insert(0) += 1;
        self.monthly_usage_remaining = self.total_credits - self.used_credits;
    }

    pub fn is_approaching_limit(&self) -> bool {
        if self.total_credits <= 0 {
            return false;
        }
        self.used_credits as f64 / self.total_credits as f64 >= APPROACHING_LIMIT_RATIO
    }

    pub fn is_blocked(&self) -> bool {
        self.remaining_credits() <= 0
    }

    pub fn needs_monthly_reset(&self, now: DateTime<Utc>) -> bool {
        now.month() != self.last_reset_date.month() || now.year() != self.last_reset_date.year()
    }

    /// Starts a new cycle. Top-up credits do not carry over.
    pub fn reset_monthly_usage(&mut self, now: DateTime<Utc>, catalog: &PlanCatalog) {
        self.used_credits = 0;
        self.top_up_credits = 0;
        self.user_usage.clear();
        self.notification_sent = false;
        self.last_reset_date = cycle_start(now);
        self.refresh_derived_totals(catalog);
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.total_credits <= 0 {
            return 0.0;
        }
        self.used_credits as f64 / self.total_credits as f64 * 100.0
    }
}

// TIMESTAMPTZ keeps microseconds.
fn cycle_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(6)
}
