use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use super::models::OrganisationAccount;

pub const SIGNATURE_HEADER: &str = "x-usage-signature";

/// key: billing-notifier -> threshold alerts to the operations channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_approaching_limit(&self, account: &OrganisationAccount) -> Result<()>;
    async fn notify_limit_reached(&self, account: &OrganisationAccount) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApproachingLimit,
    LimitReached,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ApproachingLimit => "approaching_limit",
            NotificationKind::LimitReached => "limit_reached",
        }
    }
}

/// Rendered alert, independent of the transport that delivers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub org_id: String,
    pub subject: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

impl Notification {
    pub fn render(kind: NotificationKind, account: &OrganisationAccount) -> Self {
        let (subject, message) = match kind {
            NotificationKind::ApproachingLimit => (
                format!("Credit Limit Warning - {} (80% usage)", account.id),
                approaching_limit_message(account),
            ),
            NotificationKind::LimitReached => (
                format!("Credit Limit REACHED - {}", account.id),
                limit_reached_message(account),
            ),
        };
        Self {
            id: Uuid::new_v4(),
            kind,
            org_id: account.id.clone(),
            subject,
            message,
            sent_at: Utc::now(),
        }
    }
}

fn status_block(account: &OrganisationAccount) -> String {
    format!(
        "Current Status:\n- Plan: {}\n- Total Credits: {}\n- Used Credits: {}\n- Remaining Credits: {}\n",
        account.plan,
        account.total_credits,
        account.used_credits,
        account.remaining_credits(),
    )
}

fn approaching_limit_message(account: &OrganisationAccount) -> String {
    format!(
        "Dear Customer Success Team,\n\n\
         Organization \"{}\" is approaching their monthly credit limit.\n\n\
         {}- Usage Percentage: {:.1}%\n\n\
         This is an automated notification to help you proactively reach out to the customer about upgrading their plan.\n",
        account.id,
        status_block(account),
        account.usage_percentage(),
    )
}

fn limit_reached_message(account: &OrganisationAccount) -> String {
    let mut message = format!(
        "Dear Customer Success Team,\n\n\
         Organization \"{}\" has REACHED their monthly credit limit and is now blocked from running reports.\n\n\
         {}\n\
         URGENT: Please contact the customer immediately to discuss upgrading their plan or adding top-up credits.\n\n\
         User Activity:\n",
        account.id,
        status_block(account),
    );

    let mut users: Vec<_> = account.user_usage.iter().collect();
    users.sort_by(|a, b| a.0.cmp(b.0));
    for (user_id, usage) in users {
        let _ = writeln!(message, "- User {user_id}: {usage} reports");
    }
    message
}

/// key: billing-notifier-log -> fallback when no webhook is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    fn emit(&self, notification: Notification) {
        tracing::info!(
            org_id = %notification.org_id,
            kind = notification.kind.as_str(),
            subject = %notification.subject,
            message = %notification.message,
            "threshold notification"
        );
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_approaching_limit(&self, account: &OrganisationAccount) -> Result<()> {
        self.emit(Notification::render(
            NotificationKind::ApproachingLimit,
            account,
        ));
        Ok(())
    }

    async fn notify_limit_reached(&self, account: &OrganisationAccount) -> Result<()> {
        self.emit(Notification::render(NotificationKind::LimitReached, account));
        Ok(())
    }
}

/// key: billing-notifier-webhook -> signed JSON delivery over HTTP
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build notification client")?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }

    async fn deliver(&self, notification: Notification) -> Result<()> {
        let body = serde_json::to_vec(&notification)?;
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .with_context(|| format!("failed to send {} notification", notification.kind.as_str()))?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "notification endpoint rejected {} for org {} with status {status}",
                notification.kind.as_str(),
                notification.org_id
            );
        }

        tracing::info!(
            org_id = %notification.org_id,
            kind = notification.kind.as_str(),
            notification_id = %notification.id,
            "delivered threshold notification"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_approaching_limit(&self, account: &OrganisationAccount) -> Result<()> {
        self.deliver(Notification::render(
            NotificationKind::ApproachingLimit,
            account,
        ))
        .await
    }

    async fn notify_limit_reached(&self, account: &OrganisationAccount) -> Result<()> {
        self.deliver(Notification::render(NotificationKind::LimitReached, account))
            .await
    }
}

/// `sha256=<hex>` HMAC of `body` keyed with `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow!("invalid notification signing key: {err}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
