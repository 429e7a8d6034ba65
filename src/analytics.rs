//! Aggregate queries over committed data.
//!
//! Every query runs against the pool, never against an open load
//! transaction, so a summary only reflects committed runs. Ties are broken
//! by the lower id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::error::AnalyticsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUser {
    pub user_id: i64,
    pub name: Option<String>,
    pub post_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEngagement {
    pub post_id: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub comment_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub generated_at: DateTime<Utc>,
    pub total_users: i64,
    pub total_posts: i64,
    pub total_comments: i64,
    /// `total_posts / total_users`; users without posts count in the denominator.
    pub average_posts_per_user: f64,
    pub most_active_user: Option<ActiveUser>,
    pub top_posts: Vec<PostEngagement>,
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64, AnalyticsError> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn most_active_user(pool: &SqlitePool) -> Result<Option<ActiveUser>, AnalyticsError> {
    let row = sqlx::query(
        r#"
        SELECT u.id, u.name, COUNT(p.id) AS post_count
        FROM users u
        JOIN posts p ON p.user_id = u.id
        GROUP BY u.id, u.name
        ORDER BY post_count DESC, u.id ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok::<_, AnalyticsError>(ActiveUser {
            user_id: r.try_get("id")?,
            name: r.try_get("name")?,
            post_count: r.try_get("post_count")?,
        })
    })
    .transpose()
}

/// Posts ranked by comment count; posts without comments are included.
pub async fn top_posts(pool: &SqlitePool, limit: i64) -> Result<Vec<PostEngagement>, AnalyticsError> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.title, u.name AS author, COUNT(c.id) AS comment_count
        FROM posts p
        LEFT JOIN users u ON u.id = p.user_id
        LEFT JOIN comments c ON c.post_id = p.id
        GROUP BY p.id, p.title, u.name
        ORDER BY comment_count DESC, p.id ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            Ok::<_, AnalyticsError>(PostEngagement {
                post_id: r.try_get("id")?,
                title: r.try_get("title")?,
                author: r.try_get("author")?,
                comment_count: r.try_get("comment_count")?,
            })
        })
        .collect()
}

pub async fn compute_summary(
    pool: &SqlitePool,
    top_n: i64,
) -> Result<AnalyticsSummary, AnalyticsError> {
    let total_users = count(pool, "users").await?;
    let total_posts = count(pool, "posts").await?;
    let total_comments = count(pool, "comments").await?;

    let average_posts_per_user = if total_users == 0 {
        0.0
    } else {
        total_posts as f64 / total_users as f64
    };

    Ok(AnalyticsSummary {
        generated_at: Utc::now(),
        total_users,
        total_posts,
        total_comments,
        average_posts_per_user,
        most_active_user: most_active_user(pool).await?,
        top_posts: top_posts(pool, top_n).await?,
    })
}
