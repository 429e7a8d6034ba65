//! Periodic execution of the pipeline.
//!
//! A flow is one scheduled execution: a pipeline run, retried as a whole up
//! to `flow_retries` times when it ends `failed`. Each retry is a new run
//! row. Flows start every `interval_secs`, measured from the end of the
//! previous flow.

use anyhow::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ScheduleConfig;
use crate::models::RunStatus;
use crate::pipeline::{Pipeline, RunReport};

/// Runs one flow and returns the report of its last attempt.
pub async fn run_flow(
    pipeline: &Pipeline,
    pool: &SqlitePool,
    schedule: &ScheduleConfig,
) -> Result<RunReport> {
    let mut attempt = 0;
    loop {
        let report = pipeline.run(pool).await?;
        if report.run.status == RunStatus::Success || attempt >= schedule.flow_retries {
            return Ok(report);
        }

        attempt += 1;
        warn!(
            run_id = report.run.id,
            attempt,
            error = report.run.error_message.as_deref().unwrap_or(""),
            "run failed, retrying flow in {}s",
            schedule.retry_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(schedule.retry_delay_secs)).await;
    }
}

/// Runs flows forever, or `max_flows` times when given.
pub async fn run_schedule(
    pipeline: &Pipeline,
    pool: &SqlitePool,
    schedule: &ScheduleConfig,
    max_flows: Option<u64>,
) -> Result<()> {
    let mut completed = 0u64;
    loop {
        let report = run_flow(pipeline, pool, schedule).await?;
        completed += 1;
        info!(
            run_id = report.run.id,
            status = %report.run.status,
            flows = completed,
            "flow finished"
        );

        if max_flows.is_some_and(|max| completed >= max) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(schedule.interval_secs)).await;
    }
}
