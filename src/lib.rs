//! # rest-etl
//!
//! A small ETL pipeline over a JSONPlaceholder-style REST API.
//!
//! Each run pulls the `users`, `posts` and `comments` collections, keeps the
//! raw payloads in date-partitioned JSON files, normalizes and validates the
//! records, writes them to date-partitioned Parquet files, upserts them into
//! SQLite in one transaction, and finally computes an analytics summary that
//! is written as JSON and CSV reports. Every run is tracked in the
//! `pipeline_runs` table.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ REST API │──▶│ raw JSON  │──▶│ transform │──▶│ Parquet  │
//! └──────────┘   └───────────┘   └─────┬─────┘   └──────────┘
//!                                      ▼
//!                               ┌────────────┐   ┌───────────┐
//!                               │   SQLite   │──▶│ analytics │──▶ reports
//!                               │  (upsert)  │   └───────────┘
//!                               └─────┬──────┘
//!                      ┌──────────────┤
//!                      ▼              ▼
//!                 ┌─────────┐   ┌──────────┐
//!                 │   CLI   │   │   HTTP   │
//!                 └─────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rest-etl init                 # create database
//! rest-etl run                  # one pipeline run
//! rest-etl runs                 # recent runs
//! rest-etl analytics            # print the summary
//! rest-etl serve                # HTTP control surface + dashboard
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Error types per stage |
//! | [`models`] | Core data types |
//! | [`extract`] | Extraction from the REST API |
//! | [`transform`] | Record normalization and validation |
//! | [`columnar`] | Arrow schemas for processed files |
//! | [`storage`] | Raw and processed partition files |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`repository`] | Upserts |
//! | [`runlog`] | Pipeline run log |
//! | [`analytics`] | Aggregate queries |
//! | [`report`] | JSON/CSV report files |
//! | [`pipeline`] | Run orchestration |
//! | [`browse`] | Stored record lookups |
//! | [`schedule`] | Periodic runs |
//! | [`server`] | HTTP server |

pub mod analytics;
pub mod browse;
pub mod columnar;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod repository;
pub mod runlog;
pub mod schedule;
pub mod server;
pub mod storage;
pub mod transform;
