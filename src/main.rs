//! # rest-etl CLI
//!
//! ## Usage
//!
//! ```bash
//! rest-etl --config ./config/etl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rest-etl init` | Create the SQLite database and run schema migrations |
//! | `rest-etl run` | Execute one pipeline run |
//! | `rest-etl runs` | List recent pipeline runs |
//! | `rest-etl status <id>` | Show one pipeline run |
//! | `rest-etl analytics` | Print the analytics summary |
//! | `rest-etl reports list` | List report files |
//! | `rest-etl reports delete <name>` | Delete a report file |
//! | `rest-etl serve` | Start the HTTP server and dashboard |
//! | `rest-etl schedule` | Run the pipeline periodically |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use rest_etl::analytics::{compute_summary, AnalyticsSummary};
use rest_etl::config::{self, Config};
use rest_etl::models::{PipelineRun, RunStatus};
use rest_etl::pipeline::{Pipeline, RunReport};
use rest_etl::{db, logging, migrate, report, runlog, schedule, server};

/// ETL pipeline for a JSONPlaceholder-style REST API.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db] path` is required.
#[derive(Parser)]
#[command(
    name = "rest-etl",
    about = "Extract, transform and load a REST API into SQLite, Parquet and analytics reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/etl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Execute one pipeline run and print its outcome.
    ///
    /// Exits non-zero when the run ends `failed`.
    Run,

    /// List recent pipeline runs, newest first.
    Runs {
        /// Number of runs to show (defaults to `[server] recent_runs`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show one pipeline run.
    Status {
        /// Run id.
        id: i64,
    },

    /// Compute and print the analytics summary from stored data.
    Analytics {
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage report files.
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },

    /// Start the HTTP server and dashboard on `[server] bind`.
    Serve,

    /// Run the pipeline every `[schedule] interval_secs`.
    Schedule {
        /// Stop after this many flows.
        #[arg(long)]
        max_runs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ReportsAction {
    /// List report files, newest first.
    List,
    /// Delete one report file by name.
    Delete {
        /// File name as shown by `reports list`.
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run => {
            let report = run_once(&cfg).await?;
            print_run_report(&report);
            if report.run.status == RunStatus::Failed {
                bail!("pipeline run {} failed", report.run.id);
            }
        }
        Commands::Runs { limit } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;
            let limit = limit.unwrap_or(cfg.server.recent_runs);
            let runs = runlog::list_pipeline_runs(&pool, limit).await?;
            pool.close().await;

            if runs.is_empty() {
                println!("No pipeline runs recorded.");
            }
            for run in &runs {
                print_run_line(run);
            }
        }
        Commands::Status { id } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;
            let run = runlog::get_pipeline_run(&pool, id).await?;
            pool.close().await;

            match run {
                Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                None => bail!("run {} not found", id),
            }
        }
        Commands::Analytics { json } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;
            let summary = compute_summary(&pool, cfg.analytics.top_posts).await?;
            pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Reports { action } => match action {
            ReportsAction::List => {
                let reports = report::list_reports(&cfg.storage.reports_dir)?;
                if reports.is_empty() {
                    println!("No reports in {}", cfg.storage.reports_dir.display());
                }
                for r in reports {
                    println!(
                        "{:<40} {:>8} bytes  {}",
                        r.filename,
                        r.size,
                        r.modified.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            ReportsAction::Delete { name } => {
                report::delete_report(&cfg.storage.reports_dir, &name)?;
                println!("Deleted {}", name);
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Schedule { max_runs } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;
            let pipeline = Pipeline::from_config(Arc::new(cfg.clone()))?;
            schedule::run_schedule(&pipeline, &pool, &cfg.schedule, max_runs).await?;
            pool.close().await;
        }
    }

    Ok(())
}

async fn run_once(cfg: &Config) -> Result<RunReport> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    let pipeline = Pipeline::from_config(Arc::new(cfg.clone()))?;
    let report = pipeline
        .run(&pool)
        .await
        .context("pipeline run could not be recorded")?;
    pool.close().await;
    Ok(report)
}

fn print_run_line(run: &PipelineRun) {
    println!(
        "#{:<5} {:<8} started {}  records {:>5}{}",
        run.id,
        run.status,
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.records_processed,
        run.error_message
            .as_deref()
            .map(|e| format!("  error: {}", e))
            .unwrap_or_default()
    );
}

fn print_run_report(report: &RunReport) {
    print_run_line(&report.run);
    for (kind, s) in &report.stats {
        println!(
            "  {:<9} extracted {:>4}  accepted {:>4}  rejected {:>3}  inserted {:>4}  updated {:>4}",
            kind, s.extracted, s.accepted, s.rejected, s.inserted, s.updated
        );
    }
    for path in &report.report_paths {
        println!("  report: {}", path.display());
    }
    if let Some(e) = &report.analytics_error {
        println!("  analytics failed: {}", e);
    }
    if let Some(e) = &report.report_error {
        println!("  report generation failed: {}", e);
    }
}

fn print_summary(s: &AnalyticsSummary) {
    println!("Users:    {}", s.total_users);
    println!("Posts:    {}", s.total_posts);
    println!("Comments: {}", s.total_comments);
    println!("Average posts per user: {:.2}", s.average_posts_per_user);
    match &s.most_active_user {
        Some(u) => println!(
            "Most active user: {} ({}) with {} posts",
            u.name.as_deref().unwrap_or("?"),
            u.user_id,
            u.post_count
        ),
        None => println!("Most active user: none"),
    }
    println!("Top posts by comments:");
    for p in &s.top_posts {
        println!(
            "  #{:<4} {:>3} comments  {}  ({})",
            p.post_id,
            p.comment_count,
            p.title.as_deref().unwrap_or(""),
            p.author.as_deref().unwrap_or("?")
        );
    }
}
