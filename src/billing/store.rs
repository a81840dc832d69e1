use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use thiserror::Error;

use super::models::OrganisationAccount;
use super::plans::Plan;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("organisation `{org_id}` was modified concurrently")]
    Conflict { org_id: String },
}

/// An account as read from storage, with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccount {
    pub account: OrganisationAccount,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Replace whatever is stored.
    Overwrite,
    /// Write only if the stored record is still at this version.
    IfVersion(i64),
}

/// key: billing-account-store -> one account record per organisation
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, org_id: &str) -> Result<Option<StoredAccount>, StoreError>;

    /// Persists the full account and returns the new version.
    async fn put(
        &self,
        account: &OrganisationAccount,
        condition: WriteCondition,
    ) -> Result<i64, StoreError>;
}

/// key: billing-account-store-memory -> process-local store
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    records: DashMap<String, StoredAccount>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, org_id: &str) -> Result<Option<StoredAccount>, StoreError> {
        Ok(self.records.get(org_id).map(|record| record.value().clone()))
    }

    async fn put(
        &self,
        account: &OrganisationAccount,
        condition: WriteCondition,
    ) -> Result<i64, StoreError> {
        let conflict = || StoreError::Conflict {
            org_id: account.id.clone(),
        };
        match self.records.entry(account.id.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if let WriteCondition::IfVersion(expected) = condition {
                    if expected != current {
                        return Err(conflict());
                    }
                }
                let version = current + 1;
                occupied.insert(StoredAccount {
                    account: account.clone(),
                    version,
                });
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if let WriteCondition::IfVersion(_) = condition {
                    return Err(conflict());
                }
                vacant.insert(StoredAccount {
                    account: account.clone(),
                    version: 1,
                });
                Ok(1)
            }
        }
    }
}

/// key: billing-account-store-postgres -> organisation_usage table
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    org_id: String,
    plan: String,
    used_credits: i64,
    monthly_usage_remaining: i64,
    user_usage: Json<HashMap<String, i64>>,
    top_up_credits: i64,
    per_user_limit: i64,
    last_reset_date: DateTime<Utc>,
    notification_sent: bool,
    total_credits: i64,
    version: i64,
}

impl From<AccountRow> for StoredAccount {
    fn from(row: AccountRow) -> Self {
        StoredAccount {
            account: OrganisationAccount {
                id: row.org_id,
                plan: Plan::from(row.plan),
                used_credits: row.used_credits,
                monthly_usage_remaining: row.monthly_usage_remaining,
                user_usage: row.user_usage.0,
                top_up_credits: row.top_up_credits,
                per_user_limit: row.per_user_limit,
                last_reset_date: row.last_reset_date,
                notification_sent: row.notification_sent,
                total_credits: row.total_credits,
            },
            version: row.version,
        }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn get(&self, org_id: &str) -> Result<Option<StoredAccount>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT
                org_id,
                plan,
                used_credits,
                monthly_usage_remaining,
                user_usage,
                top_up_credits,
                per_user_limit,
                last_reset_date,
                notification_sent,
                total_credits,
                version
            FROM organisation_usage
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoredAccount::from))
    }

    async fn put(
        &self,
        account: &OrganisationAccount,
        condition: WriteCondition,
    ) -> Result<i64, StoreError> {
        tracing::debug!(
            org_id = %account.id,
            plan = %account.plan,
            total_credits = account.total_credits,
            top_up_credits = account.top_up_credits,
            ?condition,
            "saving organisation usage"
        );

        let user_usage = Json(&account.user_usage);
        let version: Option<i64> = match condition {
            WriteCondition::Overwrite => sqlx::query_scalar(
                r#"
                INSERT INTO organisation_usage (
                    org_id,
                    plan,
                    used_credits,
                    monthly_usage_remaining,
                    user_usage,
                    top_up_credits,
                    per_user_limit,
                    last_reset_date,
                    notification_sent,
                    total_credits,
                    version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)
                ON CONFLICT (org_id)
                DO UPDATE SET
                    plan = EXCLUDED.plan,
                    used_credits = EXCLUDED.used_credits,
                    monthly_usage_remaining = EXCLUDED.monthly_usage_remaining,
                    user_usage = EXCLUDED.user_usage,
                    top_up_credits = EXCLUDED.top_up_credits,
                    per_user_limit = EXCLUDED.per_user_limit,
                    last_reset_date = EXCLUDED.last_reset_date,
                    notification_sent = EXCLUDED.notification_sent,
                    total_credits = EXCLUDED.total_credits,
                    version = organisation_usage.version + 1,
                    updated_at = NOW()
                RETURNING version
                "#,
            )
            .bind(&account.id)
            .bind(account.plan.as_str())
            .bind(account.used_credits)
            .bind(account.monthly_usage_remaining)
            .bind(user_usage)
            .bind(account.top_up_credits)
            .bind(account.per_user_limit)
            .bind(account.last_reset_date)
            .bind(account.notification_sent)
            .bind(account.total_credits)
            .fetch_optional(&self.pool)
            .await?,
            WriteCondition::IfVersion(expected) => sqlx::query_scalar(
                r#"
                UPDATE organisation_usage SET
                    plan = $2,
                    used_credits = $3,
                    monthly_usage_remaining = $4,
                    user_usage = $5,
                    top_up_credits = $6,
                    per_user_limit = $7,
                    last_reset_date = $8,
                    notification_sent = $9,
                    total_credits = $10,
                    version = version + 1,
                    updated_at = NOW()
                WHERE org_id = $1 AND version = $11
                RETURNING version
                "#,
            )
            .bind(&account.id)
            .bind(account.plan.as_str())
            .bind(account.used_credits)
            .bind(account.monthly_usage_remaining)
            .bind(user_usage)
            .bind(account.top_up_credits)
            .bind(account.per_user_limit)
            .bind(account.last_reset_date)
            .bind(account.notification_sent)
            .bind(account.total_credits)
            .bind(expected)
            .fetch_optional(&self.pool)
            .await?,
        };

        version.ok_or_else(|| StoreError::Conflict {
            org_id: account.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::plans::PlanCatalog;
    use chrono::TimeZone;

    fn account(id: &str) -> OrganisationAccount {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        OrganisationAccount::new(id, Plan::Lite, now, &PlanCatalog::default())
    }

    #[tokio::test]
    async fn memory_store_round_trips_accounts() {
        let store = InMemoryAccountStore::new();
        let mut original = account("org-a");
        original.consume_credit("alice");
        original.per_user_limit = 3;

        let version = store.put(&original, WriteCondition::Overwrite).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.get("org-a").await.unwrap().expect("stored account");
        assert_eq!(loaded.account, original);
        assert_eq!(loaded.version, 1);
        assert!(store.get("org-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_rejects_stale_versions() {
        let store = InMemoryAccountStore::new();
        let original = account("org-a");
        store.put(&original, WriteCondition::Overwrite).await.unwrap();

        let v2 = store
            .put(&original, WriteCondition::IfVersion(1))
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let err = store
            .put(&original, WriteCondition::IfVersion(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref org_id } if org_id == "org-a"));

        let missing = store
            .put(&account("org-new"), WriteCondition::IfVersion(1))
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::Conflict { .. }));
        assert_eq!(store.len(), 1);
    }
}
