//! Pipeline orchestration.
//!
//! One run executes, in order:
//!
//! 1. record the run as `running` in `pipeline_runs`
//! 2. fetch all collections ([`extract_all`])
//! 3. write raw JSON partitions
//! 4. transform and filter orphans ([`transform_run`])
//! 5. write Parquet partitions
//! 6. upsert users, posts and comments in one transaction
//! 7. mark the run `success` or `failed`
//! 8. on success, compute analytics and write reports
//!
//! Failures of steps 2-6 end the run as `failed` with the error message and
//! `records_processed = 0`; they are not returned to the caller. Failures in
//! step 8 are reported in [`RunReport`] and leave the run status untouched.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::analytics::{compute_summary, AnalyticsSummary};
use crate::config::Config;
use crate::error::PipelineError;
use crate::extract::{extract_all, Extractor, HttpExtractor};
use crate::models::{EntityKind, EntityStats, PipelineRun, RunStatus, UpsertCounts};
use crate::report::ReportWriter;
use crate::repository::{upsert_comments, upsert_posts, upsert_users};
use crate::runlog::{complete_pipeline_run, record_pipeline_run};
use crate::storage::{partition_for, ProcessedStore, RawStore};
use crate::transform::{transform_run, Rejection, TransformedRun};

/// Everything a caller learns about one finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: PipelineRun,
    pub stats: BTreeMap<EntityKind, EntityStats>,
    pub rejections: Vec<Rejection>,
    pub summary: Option<AnalyticsSummary>,
    pub report_paths: Vec<PathBuf>,
    pub analytics_error: Option<String>,
    pub report_error: Option<String>,
}

/// Output of a successful extract → load sequence.
struct Loaded {
    partition: String,
    stats: BTreeMap<EntityKind, EntityStats>,
    rejections: Vec<Rejection>,
    written: u64,
}

pub struct Pipeline {
    config: Arc<Config>,
    extractor: Arc<dyn Extractor>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, extractor: Arc<dyn Extractor>) -> Self {
        Self { config, extractor }
    }

    /// Pipeline backed by the HTTP extractor configured in `[api]`.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let extractor = HttpExtractor::new(&config.api)?;
        Ok(Self::new(config, Arc::new(extractor)))
    }

    /// Records a new run as `running`. Pair with [`Pipeline::execute`].
    pub async fn start(&self, pool: &SqlitePool) -> Result<PipelineRun> {
        let run = record_pipeline_run(pool, Utc::now()).await?;
        info!(run_id = run.id, "pipeline run started");
        Ok(run)
    }

    /// Starts and executes a run.
    pub async fn run(&self, pool: &SqlitePool) -> Result<RunReport> {
        let run = self.start(pool).await?;
        self.execute(pool, run).await
    }

    /// Executes a run previously returned by [`Pipeline::start`].
    ///
    /// Only run-log failures are returned as `Err`; stage failures end up in
    /// the run's status.
    pub async fn execute(&self, pool: &SqlitePool, run: PipelineRun) -> Result<RunReport> {
        let span = info_span!("pipeline_run", run_id = run.id);
        self.execute_inner(pool, run).instrument(span).await
    }

    async fn execute_inner(&self, pool: &SqlitePool, run: PipelineRun) -> Result<RunReport> {
        let loaded = match self.extract_and_load(pool, &run).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(stage = e.stage(), error = %e, "pipeline run failed");
                let message = e.to_string();
                let metadata = serde_json::json!({ "failed_stage": e.stage() });
                let run = complete_pipeline_run(
                    pool,
                    run.id,
                    RunStatus::Failed,
                    Some(message.as_str()),
                    0,
                    &metadata,
                )
                .await?;
                return Ok(RunReport {
                    run,
                    stats: BTreeMap::new(),
                    rejections: Vec::new(),
                    summary: None,
                    report_paths: Vec::new(),
                    analytics_error: None,
                    report_error: None,
                });
            }
        };

        let metadata = serde_json::json!({
            "partition": loaded.partition,
            "entities": loaded.stats,
        });
        let run = complete_pipeline_run(
            pool,
            run.id,
            RunStatus::Success,
            None,
            i64::try_from(loaded.written).unwrap_or(i64::MAX),
            &metadata,
        )
        .await?;
        info!(records = loaded.written, "pipeline run succeeded");

        let mut report = RunReport {
            run,
            stats: loaded.stats,
            rejections: loaded.rejections,
            summary: None,
            report_paths: Vec::new(),
            analytics_error: None,
            report_error: None,
        };

        let summary = match compute_summary(pool, self.config.analytics.top_posts).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "analytics failed");
                report.analytics_error = Some(e.to_string());
                return Ok(report);
            }
        };

        match ReportWriter::new(&self.config.storage.reports_dir).write_all(&summary) {
            Ok(paths) => {
                for path in &paths {
                    info!(path = %path.display(), "report written");
                }
                report.report_paths = paths;
            }
            Err(e) => {
                error!(error = %e, "report generation failed");
                report.report_error = Some(e.to_string());
            }
        }
        report.summary = Some(summary);

        Ok(report)
    }

    async fn extract_and_load(
        &self,
        pool: &SqlitePool,
        run: &PipelineRun,
    ) -> Result<Loaded, PipelineError> {
        let partition = partition_for(run.started_at);
        let data_dir = &self.config.storage.data_dir;

        let raw = extract_all(self.extractor.as_ref()).await?;
        info!(records = raw.total(), "extraction complete");

        let raw_store = RawStore::new(data_dir);
        for kind in EntityKind::ALL {
            raw_store.write(kind, &partition, raw.get(kind))?;
        }

        let transformed = transform_run(&raw, run.started_at);
        for rejection in &transformed.rejections {
            warn!(%rejection, "record rejected");
        }
        info!(
            accepted = transformed.accepted(),
            rejected = transformed.rejections.len(),
            "transform complete"
        );

        let processed = ProcessedStore::new(data_dir);
        processed.write(&partition, &transformed.users)?;
        processed.write(&partition, &transformed.posts)?;
        processed.write(&partition, &transformed.comments)?;

        let mut tx = pool.begin().await?;
        let counts = match load(&mut *tx, &transformed).await {
            Ok(counts) => {
                tx.commit().await?;
                counts
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(e.into());
            }
        };

        let mut stats = transformed.stats;
        let mut rejections = transformed.rejections;
        let mut written = 0;
        for (kind, c) in counts {
            let rejected = c.rejected();
            let entry = stats.entry(kind).or_default();
            entry.inserted = c.inserted;
            entry.updated = c.updated;
            entry.accepted = entry.accepted.saturating_sub(rejected);
            entry.rejected += rejected;
            written += c.written();
            info!(%kind, inserted = c.inserted, updated = c.updated, rejected, "loaded");
            rejections.extend(c.rejections);
        }

        Ok(Loaded {
            partition,
            stats,
            rejections,
            written,
        })
    }
}

/// Upserts parents before children on one connection.
async fn load(
    conn: &mut SqliteConnection,
    transformed: &TransformedRun,
) -> Result<BTreeMap<EntityKind, UpsertCounts>, sqlx::Error> {
    let mut counts = BTreeMap::new();
    counts.insert(EntityKind::Users, upsert_users(conn, &transformed.users).await?);
    counts.insert(EntityKind::Posts, upsert_posts(conn, &transformed.posts).await?);
    counts.insert(
        EntityKind::Comments,
        upsert_comments(conn, &transformed.comments).await?,
    );
    Ok(counts)
}
