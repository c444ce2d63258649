//! Naratama sweep worker
//!
//! Runs one pass of the periodic maintenance work and exits: due-soon
//! reminders, Active-to-Overdue transitions with fine assessment, and
//! retries of refunds and stock releases that failed at return time.
//! Scheduling is left to cron or a systemd timer.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use naratama_server::{
    config::AppConfig,
    repository::Repository,
    services::{EmailNotifier, HttpPaymentGateway, NoopNotifier, NotificationSink, Services},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("naratama_server={}", config.logging.level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Naratama sweep worker v{}", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations").run(&pool).await?;

    let notifier: Arc<dyn NotificationSink> = if config.email.enabled {
        Arc::new(EmailNotifier::new(config.email.clone()))
    } else {
        Arc::new(NoopNotifier)
    };

    let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);

    let services = Services::new(
        Repository::postgres(pool),
        config.loans.clone(),
        gateway,
        notifier,
    );

    let summary = services
        .borrowings
        .run_overdue_sweep(chrono::Utc::now())
        .await?;

    let releases_settled = services.borrowings.retry_pending_releases().await?;
    let refunds_settled = services.borrowings.retry_pending_refunds().await?;

    tracing::info!(
        due_soon = summary.due_soon_notified,
        overdue = summary.marked_overdue,
        skipped = summary.skipped,
        releases_settled,
        refunds_settled,
        "sweep worker done"
    );

    Ok(())
}
