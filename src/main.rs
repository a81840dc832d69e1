use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use org_usage::billing::{
    AccountStore, InMemoryAccountStore, LogNotifier, Notifier, PgAccountStore, PlanCatalog,
    SystemClock, UsageService, WebhookNotifier,
};
use org_usage::config::{self, AccountStoreBackend};
use org_usage::routes::api_routes;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

async fn account_store() -> Result<Arc<dyn AccountStore>, Box<dyn std::error::Error>> {
    match *config::ACCOUNT_STORE {
        AccountStoreBackend::Memory => {
            tracing::warn!("using in-memory account store; usage is lost on restart");
            Ok(Arc::new(InMemoryAccountStore::new()))
        }
        AccountStoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(*config::DATABASE_MAX_CONNECTIONS)
                .connect(config::DATABASE_URL.as_str())
                .await?;

            if let Err(error) = sqlx::migrate!().run(&pool).await {
                if *config::ALLOW_MIGRATION_FAILURE {
                    tracing::warn!(
                        ?error,
                        "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
                    );
                } else {
                    return Err(Box::new(error) as Box<dyn std::error::Error>);
                }
            }
            Ok(Arc::new(PgAccountStore::new(pool)))
        }
    }
}

fn notifier() -> anyhow::Result<Arc<dyn Notifier>> {
    match config::NOTIFICATION_WEBHOOK_URL.as_deref() {
        Some(url) => {
            tracing::info!(%url, "sending threshold notifications to webhook");
            let notifier = WebhookNotifier::new(
                url,
                config::NOTIFICATION_WEBHOOK_SECRET.clone(),
                Duration::from_secs(*config::NOTIFICATION_TIMEOUT_SECS),
            )?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::info!("NOTIFICATION_WEBHOOK_URL not set, logging notifications only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let catalog = PlanCatalog::with_overrides(&config::PLAN_ALLOWANCES)?;
    let store = account_store().await?;
    tracing::info!(
        backend = config::ACCOUNT_STORE.as_str(),
        "account store ready"
    );
    let notifier = notifier()?;

    let service = Arc::new(
        UsageService::new(store, notifier, Arc::new(catalog), Arc::new(SystemClock))
            .with_max_write_attempts(*config::USAGE_WRITE_MAX_ATTEMPTS),
    );

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(service));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
