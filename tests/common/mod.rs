#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use org_usage::billing::{
    AccountStore, FixedClock, InMemoryAccountStore, NotificationKind, Notifier,
    OrganisationAccount, Plan, PlanCatalog, StoreError, StoredAccount, UsageService,
    WriteCondition,
};

pub fn march_10() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
}

/// Trial account with every credit of the cycle already used by `alice`.
pub fn exhausted_trial(org_id: &str) -> OrganisationAccount {
    let mut account =
        OrganisationAccount::new(org_id, Plan::Trial, march_10(), &PlanCatalog::default());
    for _ in 0..account.total_credits {
        account.consume_credit("alice");
    }
    account
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, OrganisationAccount)>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    fn record(&self, kind: NotificationKind, account: &OrganisationAccount) {
        self.sent.lock().unwrap().push((kind, account.clone()));
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_approaching_limit(&self, account: &OrganisationAccount) -> Result<()> {
        self.record(NotificationKind::ApproachingLimit, account);
        Ok(())
    }

    async fn notify_limit_reached(&self, account: &OrganisationAccount) -> Result<()> {
        self.record(NotificationKind::LimitReached, account);
        Ok(())
    }
}

#[derive(Default)]
pub struct FailingNotifier {
    pub attempts: AtomicU32,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify_approaching_limit(&self, _account: &OrganisationAccount) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("operations channel unavailable"))
    }

    async fn notify_limit_reached(&self, _account: &OrganisationAccount) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("operations channel unavailable"))
    }
}

/// Store where another writer sneaks in before the next `conflicts`
/// conditional writes, so each of them loses the race.
pub struct RacingStore {
    inner: InMemoryAccountStore,
    conflicts: AtomicU32,
}

impl RacingStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: InMemoryAccountStore::new(),
            conflicts: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl AccountStore for RacingStore {
    async fn get(&self, org_id: &str) -> Result<Option<StoredAccount>, StoreError> {
        self.inner.get(org_id).await
    }

    async fn put(
        &self,
        account: &OrganisationAccount,
        condition: WriteCondition,
    ) -> Result<i64, StoreError> {
        if let WriteCondition::IfVersion(_) = condition {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                if let Some(current) = self.inner.get(&account.id).await? {
                    self.inner
                        .put(&current.account, WriteCondition::Overwrite)
                        .await?;
                }
            }
        }
        self.inner.put(account, condition).await
    }
}

/// Store whose conditional writes always fail with a database error.
#[derive(Default)]
pub struct BrokenWritesStore {
    inner: InMemoryAccountStore,
}

#[async_trait]
impl AccountStore for BrokenWritesStore {
    async fn get(&self, org_id: &str) -> Result<Option<StoredAccount>, StoreError> {
        self.inner.get(org_id).await
    }

    async fn put(
        &self,
        account: &OrganisationAccount,
        condition: WriteCondition,
    ) -> Result<i64, StoreError> {
        match condition {
            WriteCondition::IfVersion(_) => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
            WriteCondition::Overwrite => self.inner.put(account, condition).await,
        }
    }
}

pub struct Harness {
    pub service: UsageService,
    pub store: Arc<dyn AccountStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryAccountStore::new()))
    }

    pub fn with_store(store: Arc<dyn AccountStore>) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(FixedClock::new(march_10()));
        let service = UsageService::new(
            store.clone(),
            notifier.clone(),
            Arc::new(PlanCatalog::default()),
            clock.clone(),
        );
        Self {
            service,
            store,
            notifier,
            clock,
        }
    }

    pub async fn stored(&self, org_id: &str) -> StoredAccount {
        self.store
            .get(org_id)
            .await
            .unwrap()
            .expect("account should be stored")
    }
}
