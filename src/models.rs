//! Core data models.
//!
//! Normalized records are flat: nested source objects (a user's address and
//! company) are spread into prefixed fields so the same value can be handed
//! to the Parquet writer and to the SQL mapper without further shaping.
//! Optional source fields are `Option`s; only ids and foreign keys are
//! mandatory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::transform::Rejection;

/// The three collections pulled from the source API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Users,
    Posts,
    Comments,
}

impl EntityKind {
    /// In dependency order: parents before children.
    pub const ALL: [EntityKind; 3] = [EntityKind::Users, EntityKind::Posts, EntityKind::Comments];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Posts => "posts",
            EntityKind::Comments => "comments",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address_street: Option<String>,
    pub address_suite: Option<String>,
    pub address_city: Option<String>,
    pub address_zipcode: Option<String>,
    pub geo_lat: Option<f64>,
    pub geo_lng: Option<f64>,
    pub company_name: Option<String>,
    pub company_catch_phrase: Option<String>,
    pub company_bs: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A normalized record of any entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    User(User),
    Post(Post),
    Comment(Comment),
}

/// Lifecycle of one pipeline execution: `pending → running → success | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Row of the `pipeline_runs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub records_processed: i64,
    pub metadata: serde_json::Value,
}

/// Per-entity bookkeeping for one run, stored in the run's metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStats {
    pub extracted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub inserted: u64,
    pub updated: u64,
}

/// Outcome of one upsert batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
    /// Records skipped because their parent row is not stored.
    pub rejections: Vec<Rejection>,
}

impl UpsertCounts {
    /// Rows written (inserted or updated).
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn rejected(&self) -> u64 {
        self.rejections.len() as u64
    }
}
