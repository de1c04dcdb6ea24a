//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at startup and registers the recurring
//! app-version freshness job. The sales-window checker registers its own
//! jobs on the same scheduler once polling has succeeded.

pub mod sales_window;

use std::sync::Arc;

use chrono_tz::Tz;
use tgbridge_tgtg::AppVersionChecker;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::marketplace::Marketplace;
use crate::token_store::TokenStore;

pub use sales_window::SalesWindowScheduler;

/// Twice a day, evaluated in the configured zone.
const FRESHNESS_CRON: &str = "0 0 0,12 * * *";

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle. It must be kept alive for
/// the lifetime of the process and shut down on exit.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    checker: Arc<AppVersionChecker>,
    tokens: Arc<TokenStore>,
    marketplace: Arc<dyn Marketplace>,
    timezone: Tz,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_freshness_job(&scheduler, checker, tokens, marketplace, timezone).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Register the user-agent freshness job.
///
/// Looks up the latest published app version and rebuilds the session's
/// user agent when the recorded version has fallen too far behind.
async fn register_freshness_job(
    scheduler: &JobScheduler,
    checker: Arc<AppVersionChecker>,
    tokens: Arc<TokenStore>,
    marketplace: Arc<dyn Marketplace>,
    timezone: Tz,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async_tz(FRESHNESS_CRON, timezone, move |_uuid, _lock| {
        let checker = Arc::clone(&checker);
        let tokens = Arc::clone(&tokens);
        let marketplace = Arc::clone(&marketplace);

        Box::pin(async move {
            tracing::debug!("scheduler: starting app version check");
            run_freshness_check(&checker, &tokens, marketplace.as_ref()).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = FRESHNESS_CRON, "scheduler: registered app version job");
    Ok(())
}

async fn run_freshness_check(
    checker: &AppVersionChecker,
    tokens: &TokenStore,
    marketplace: &dyn Marketplace,
) {
    let latest = match checker.latest_version().await {
        Ok(latest) => latest,
        Err(e) => {
            tracing::warn!(error = %e, "scheduler: app version lookup failed, keeping current user agent");
            return;
        }
    };

    match tokens.apply_latest_version(marketplace, &latest) {
        Ok(true) => tracing::info!(version = %latest, "scheduler: user agent rebuilt"),
        Ok(false) => {}
        Err(e) => tracing::error!(error = %e, "scheduler: failed to persist rebuilt session"),
    }
}
