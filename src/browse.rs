//! Read-only lookups of stored records, used by the dashboard endpoints.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::models::{Comment, PipelineRun, Post, User};
use crate::runlog;

/// Runs included in [`DashboardStats`].
pub const DASHBOARD_RECENT_RUNS: i64 = 5;

const USER_COLUMNS: &str = "id, name, username, email, phone, website, address_street, \
    address_suite, address_city, address_zipcode, geo_lat, geo_lng, company_name, \
    company_catch_phrase, company_bs, created_at";

fn from_secs(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        username: row.get("username"),
        email: row.get("email"),
        phone: row.get("phone"),
        website: row.get("website"),
        address_street: row.get("address_street"),
        address_suite: row.get("address_suite"),
        address_city: row.get("address_city"),
        address_zipcode: row.get("address_zipcode"),
        geo_lat: row.get("geo_lat"),
        geo_lng: row.get("geo_lng"),
        company_name: row.get("company_name"),
        company_catch_phrase: row.get("company_catch_phrase"),
        company_bs: row.get("company_bs"),
        created_at: from_secs(row.get("created_at")),
    }
}

fn post_from_row(row: &SqliteRow) -> Post {
    Post {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        body: row.get("body"),
        created_at: from_secs(row.get("created_at")),
    }
}

fn comment_from_row(row: &SqliteRow) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        name: row.get("name"),
        email: row.get("email"),
        body: row.get("body"),
        created_at: from_secs(row.get("created_at")),
    }
}

pub async fn list_users(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM users ORDER BY id LIMIT ? OFFSET ?",
        USER_COLUMNS
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(user_from_row).collect())
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(user_from_row))
}

pub async fn list_posts(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<Post>> {
    let rows = sqlx::query(
        "SELECT id, user_id, title, body, created_at FROM posts ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(post_from_row).collect())
}

pub async fn posts_by_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Post>> {
    let rows = sqlx::query(
        "SELECT id, user_id, title, body, created_at FROM posts WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(post_from_row).collect())
}

pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query("SELECT id, user_id, title, body, created_at FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(post_from_row))
}

pub async fn comments_by_post(pool: &SqlitePool, post_id: i64) -> Result<Vec<Comment>> {
    let rows = sqlx::query(
        "SELECT id, post_id, name, email, body, created_at FROM comments WHERE post_id = ? ORDER BY id",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(comment_from_row).collect())
}

pub async fn list_comments(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<Comment>> {
    let rows = sqlx::query(
        "SELECT id, post_id, name, email, body, created_at FROM comments ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(comment_from_row).collect())
}

/// Stored totals plus the latest runs, for the dashboard header.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_posts: i64,
    pub total_comments: i64,
    pub recent_pipeline_runs: Vec<PipelineRun>,
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats> {
    let (total_users, total_posts, total_comments): (i64, i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM users), (SELECT COUNT(*) FROM posts), \
         (SELECT COUNT(*) FROM comments)",
    )
    .fetch_one(pool)
    .await?;

    Ok(DashboardStats {
        total_users,
        total_posts,
        total_comments,
        recent_pipeline_runs: runlog::list_pipeline_runs(pool, DASHBOARD_RECENT_RUNS).await?,
    })
}
