pub mod adapters;
pub mod api;
pub mod clock;
pub mod models;
pub mod plans;
pub mod service;
pub mod store;

pub use adapters::{
    sign_payload, LogNotifier, Notification, NotificationKind, Notifier, WebhookNotifier,
    SIGNATURE_HEADER,
};
pub use api::{GetOrgQuery, SetPlanRequest, SetUserLimitRequest, TopUpRequest, UseCreditRequest};
pub use clock::{Clock, FixedClock, SystemClock};
pub use models::{OrganisationAccount, APPROACHING_LIMIT_RATIO};
pub use plans::{CatalogError, Plan, PlanCatalog, PlanCatalogEntry};
pub use service::{TopUpReceipt, UsageService, UseCreditReceipt, DEFAULT_MAX_WRITE_ATTEMPTS};
pub use store::{
    AccountStore, InMemoryAccountStore, PgAccountStore, StoreError, StoredAccount,
    WriteCondition,
};
