//! Daily job scheduler.
//!
//! Registers the scheduled rate job on a [`JobScheduler`]. The returned handle
//! must be kept alive for as long as the job should keep firing.

use crate::core::config::ScheduleConfig;
use crate::sync::RateSync;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Builds the job that runs [`RateSync::run_scheduled`] once a day.
pub fn daily_job(service: Arc<RateSync>, schedule: &ScheduleConfig) -> Result<Job> {
    let cron = schedule.cron_expression()?;
    let timezone = schedule.timezone()?;

    Job::new_async_tz(cron.as_str(), timezone, move |_uuid, _scheduler| {
        let service = Arc::clone(&service);
        Box::pin(async move {
            if let Err(e) = service.run_scheduled().await {
                error!(error = %e, "Scheduled exchange rate job failed");
            }
        })
    })
    .with_context(|| format!("Invalid job schedule: {cron}"))
}

/// Builds and starts the scheduler with the daily rate job registered.
pub async fn build_scheduler(
    service: Arc<RateSync>,
    schedule: &ScheduleConfig,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create job scheduler")?;
    scheduler
        .add(daily_job(service, schedule)?)
        .await
        .context("Failed to register exchange rate job")?;
    scheduler
        .start()
        .await
        .context("Failed to start job scheduler")?;

    info!(
        "Exchange rate job scheduled daily at {:02}:{:02} (UTC{:+})",
        schedule.hour, schedule.minute, schedule.utc_offset_hours
    );
    Ok(scheduler)
}
