use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

use super::adapters::Notifier;
use super::clock::Clock;
use super::models::OrganisationAccount;
use super::plans::{Plan, PlanCatalog};
use super::store::{AccountStore, StoreError, StoredAccount, WriteCondition};

pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UseCreditReceipt {
    pub enquiry_id: String,
    pub remaining_credits: i64,
    pub user_usage: i64,
    pub total_credits: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUpReceipt {
    pub total_credits: i64,
    pub remaining_credits: i64,
    pub top_up_credits: i64,
}

/// key: billing-usage-service -> read, mutate and conditionally write one account per call
///
/// Every write after a read is conditioned on the version that was read. A
/// conflicting write restarts the whole sequence from a fresh read, up to
/// `max_write_attempts` times.
#[derive(Clone)]
pub struct UsageService {
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    catalog: Arc<PlanCatalog>,
    clock: Arc<dyn Clock>,
    max_write_attempts: u32,
}

enum Commit {
    Written,
    Conflict,
}

impl UsageService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
        catalog: Arc<PlanCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            catalog,
            clock,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub async fn set_plan(&self, org_id: &str, plan: &str) -> AppResult<OrganisationAccount> {
        require_field("org_id", org_id)?;
        let plan: Plan = plan
            .parse()
            .map_err(|err| AppError::InvalidInput(format!("{err}")))?;

        let account = OrganisationAccount::new(org_id, plan, self.clock.now(), &self.catalog);
        self.store.put(&account, WriteCondition::Overwrite).await?;

        info!(
            org_id = %account.id,
            plan = %account.plan,
            total_credits = account.total_credits,
            "organisation plan saved"
        );
        Ok(account)
    }

    pub async fn set_user_limit(&self, org_id: &str, limit: i64) -> AppResult<OrganisationAccount> {
        require_field("org_id", org_id)?;
        if limit < 0 {
            return Err(AppError::InvalidInput(
                "limit must be zero or positive".into(),
            ));
        }

        for attempt in 1..=self.max_write_attempts {
            let StoredAccount {
                mut account,
                version,
            } = self.load(org_id).await?;
            account.per_user_limit = limit;

            if let Commit::Written = self.commit(&account, version, attempt).await? {
                info!(org_id, per_user_limit = limit, "per-user limit updated");
                return Ok(account);
            }
        }
        Err(self.contention(org_id))
    }

    pub async fn get_org(&self, org_id: &str) -> AppResult<OrganisationAccount> {
        require_field("org_id", org_id)?;
        let stored = self.load(org_id).await?;
        debug!(org_id, version = stored.version, "organisation retrieved");
        Ok(stored.account)
    }

    pub async fn use_credit(
        &self,
        org_id: &str,
        user_id: &str,
        enquiry_id: &str,
    ) -> AppResult<UseCreditReceipt> {
        require_field("org_id", org_id)?;
        require_field("user_id", user_id)?;

        let mut denied = false;
        for attempt in 1..=self.max_write_attempts {
            let StoredAccount {
                mut account,
                version,
            } = self.load(org_id).await?;
            let rolled_over = self.roll_over_if_due(&mut account);
            denied = false;

            if !account.can_user_consume(user_id) {
                info!(
                    org_id,
                    user_id,
                    enquiry_id,
                    remaining = account.remaining_credits(),
                    user_usage = account.usage_for_user(user_id),
                    per_user_limit = account.per_user_limit,
                    "credit refused, limit reached"
                );

                let mut dirty = rolled_over;
                if !account.notification_sent {
                    if let Err(err) = self.notifier.notify_limit_reached(&account).await {
                        warn!(?err, org_id, "failed to send limit reached notification");
                    }
                    account.notification_sent = true;
                    dirty = true;
                }

                if dirty {
                    match self.commit(&account, version, attempt).await {
                        Ok(Commit::Conflict) => {
                            denied = true;
                            continue;
                        }
                        Ok(Commit::Written) => {}
                        Err(err) => {
                            warn!(?err, org_id, "failed to persist limit reached state");
                        }
                    }
                }
                return Err(AppError::LimitReached);
            }

            account.consume_credit(user_id);

            if account.is_approaching_limit() && !account.notification_sent {
                info!(
                    org_id,
                    used_credits = account.used_credits,
                    total_credits = account.total_credits,
                    "organisation reached 80% of its credits"
                );
                if let Err(err) = self.notifier.notify_approaching_limit(&account).await {
                    warn!(?err, org_id, "failed to send approaching limit notification");
                }
                account.notification_sent = true;
            }

            if let Commit::Written = self.commit(&account, version, attempt).await? {
                info!(
                    org_id,
                    user_id,
                    enquiry_id,
                    remaining = account.remaining_credits(),
                    "credit used"
                );
                return Ok(UseCreditReceipt {
                    enquiry_id: enquiry_id.to_string(),
                    remaining_credits: account.remaining_credits(),
                    user_usage: account.usage_for_user(user_id),
                    total_credits: account.total_credits,
                });
            }
        }
        if denied {
            warn!(org_id, "limit reached state not persisted after repeated conflicts");
            return Err(AppError::LimitReached);
        }
        Err(self.contention(org_id))
    }

    pub async fn top_up(&self, org_id: &str, credits: i64) -> AppResult<TopUpReceipt> {
        require_field("org_id", org_id)?;
        if credits <= 0 {
            return Err(AppError::InvalidInput("credits must be positive".into()));
        }

        for attempt in 1..=self.max_write_attempts {
            let StoredAccount {
                mut account,
                version,
            } = self.load(org_id).await?;
            self.roll_over_if_due(&mut account);

            if !account.add_top_up(credits, &self.catalog) {
                return Err(AppError::InvalidInput(
                    "credits would exceed the maximum balance".into(),
                ));
            }

            if let Commit::Written = self.commit(&account, version, attempt).await? {
                info!(
                    org_id,
                    credits,
                    total_credits = account.total_credits,
                    "top-up credits added"
                );
                return Ok(TopUpReceipt {
                    total_credits: account.total_credits,
                    remaining_credits: account.remaining_credits(),
                    top_up_credits: account.top_up_credits,
                });
            }
        }
        Err(self.contention(org_id))
    }

    async fn load(&self, org_id: &str) -> AppResult<StoredAccount> {
        match self.store.get(org_id).await? {
            Some(stored) => Ok(stored),
            None => {
                debug!(org_id, "organisation not found");
                Err(AppError::NotFound)
            }
        }
    }

    fn roll_over_if_due(&self, account: &mut OrganisationAccount) -> bool {
        let now = self.clock.now();
        if !account.needs_monthly_reset(now) {
            return false;
        }
        account.reset_monthly_usage(now, &self.catalog);
        info!(org_id = %account.id, "monthly usage reset");
        true
    }

    async fn commit(
        &self,
        account: &OrganisationAccount,
        version: i64,
        attempt: u32,
    ) -> AppResult<Commit> {
        match self
            .store
            .put(account, WriteCondition::IfVersion(version))
            .await
        {
            Ok(_) => Ok(Commit::Written),
            Err(StoreError::Conflict { .. }) => {
                debug!(
                    org_id = %account.id,
                    version,
                    attempt,
                    "concurrent update detected, retrying"
                );
                Ok(Commit::Conflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn contention(&self, org_id: &str) -> AppError {
        warn!(
            org_id,
            attempts = self.max_write_attempts,
            "giving up after repeated concurrent updates"
        );
        AppError::Contention
    }
}

fn require_field(name: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{name} is required")));
    }
    Ok(())
}
