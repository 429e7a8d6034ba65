//! The `pipeline_runs` table.
//!
//! A run row is inserted as `running` when the run starts and receives
//! exactly one terminal update. The terminal update is guarded on the
//! current status, so a second completion of the same run is an error.

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::models::{PipelineRun, RunStatus};

const RUN_COLUMNS: &str =
    "id, status, started_at, completed_at, error_message, records_processed, metadata";

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_default()
}

fn run_from_row(row: &SqliteRow) -> Result<PipelineRun> {
    let status: String = row.get("status");
    let metadata: String = row.get("metadata");
    let completed_at: Option<i64> = row.get("completed_at");

    Ok(PipelineRun {
        id: row.get("id"),
        status: status.parse::<RunStatus>().map_err(anyhow::Error::msg)?,
        started_at: from_ts(row.get("started_at")),
        completed_at: completed_at.map(from_ts),
        error_message: row.get("error_message"),
        records_processed: row.get("records_processed"),
        metadata: serde_json::from_str(&metadata)?,
    })
}

/// Inserts a new run in state `running` and returns it with its assigned id.
pub async fn record_pipeline_run(pool: &SqlitePool, started_at: DateTime<Utc>) -> Result<PipelineRun> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO pipeline_runs (status, started_at, metadata) VALUES (?, ?, '{}') RETURNING id",
    )
    .bind(RunStatus::Running.as_str())
    .bind(started_at.timestamp_millis())
    .fetch_one(pool)
    .await?;

    Ok(PipelineRun {
        id,
        status: RunStatus::Running,
        started_at: from_ts(started_at.timestamp_millis()),
        completed_at: None,
        error_message: None,
        records_processed: 0,
        metadata: serde_json::json!({}),
    })
}

/// Applies the terminal update of a running run.
pub async fn complete_pipeline_run(
    pool: &SqlitePool,
    run_id: i64,
    status: RunStatus,
    error_message: Option<&str>,
    records_processed: i64,
    metadata: &serde_json::Value,
) -> Result<PipelineRun> {
    if !status.is_terminal() {
        bail!("cannot complete run {} with non-terminal status {}", run_id, status);
    }

    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = ?, completed_at = ?, error_message = ?, records_processed = ?, metadata = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(status.as_str())
    .bind(Utc::now().timestamp_millis())
    .bind(error_message)
    .bind(records_processed.max(0))
    .bind(metadata.to_string())
    .bind(run_id)
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        bail!("run {} is not running", run_id);
    }

    match get_pipeline_run(pool, run_id).await? {
        Some(run) => Ok(run),
        None => bail!("run {} disappeared", run_id),
    }
}

pub async fn get_pipeline_run(pool: &SqlitePool, run_id: i64) -> Result<Option<PipelineRun>> {
    let row = sqlx::query(&format!("SELECT {} FROM pipeline_runs WHERE id = ?", RUN_COLUMNS))
        .bind(run_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Most recent runs first.
pub async fn list_pipeline_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<PipelineRun>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM pipeline_runs ORDER BY started_at DESC, id DESC LIMIT ?",
        RUN_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}
