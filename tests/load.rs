//! Repository upserts and analytics queries against a real SQLite file.

use chrono::{Duration, TimeZone, Utc};
use rest_etl::analytics::compute_summary;
use rest_etl::config::Config;
use rest_etl::db;
use rest_etl::error::AnalyticsError;
use rest_etl::migrate;
use rest_etl::models::{Comment, EntityKind, Post, User};
use rest_etl::repository::{upsert_comments, upsert_posts, upsert_users};
use rest_etl::transform::{RejectReason, Rejection};
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::with_db_path(tmp.path().join("etl.sqlite"));
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    (tmp, pool)
}

fn user(id: i64, name: &str) -> User {
    User {
        id,
        name: Some(name.to_string()),
        username: Some(format!("user{}", id)),
        email: Some(format!("user{}@example.com", id)),
        phone: None,
        website: None,
        address_street: None,
        address_suite: None,
        address_city: None,
        address_zipcode: None,
        geo_lat: None,
        geo_lng: None,
        company_name: None,
        company_catch_phrase: None,
        company_bs: None,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    }
}

fn post(id: i64, user_id: i64) -> Post {
    Post {
        id,
        user_id,
        title: Some(format!("post {}", id)),
        body: Some("body".to_string()),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    }
}

fn comment(id: i64, post_id: i64) -> Comment {
    Comment {
        id,
        post_id,
        name: Some(format!("comment {}", id)),
        email: Some("c@example.com".to_string()),
        body: Some("body".to_string()),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    }
}

async fn load(pool: &SqlitePool, users: &[User], posts: &[Post], comments: &[Comment]) {
    let mut tx = pool.begin().await.unwrap();
    upsert_users(&mut *tx, users).await.unwrap();
    upsert_posts(&mut *tx, posts).await.unwrap();
    upsert_comments(&mut *tx, comments).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_upsert_counts_inserts_then_updates() {
    let (_tmp, pool) = setup().await;
    let users = vec![user(1, "Leanne Graham"), user(2, "Ervin Howell")];

    let mut tx = pool.begin().await.unwrap();
    let first = upsert_users(&mut *tx, &users).await.unwrap();
    assert_eq!((first.inserted, first.updated, first.rejected()), (2, 0, 0));

    let mut renamed = users.clone();
    renamed[0].name = Some("Leanne G.".to_string());
    let second = upsert_users(&mut *tx, &renamed).await.unwrap();
    assert_eq!((second.inserted, second.updated), (0, 2));
    tx.commit().await.unwrap();

    let name: String = sqlx::query_scalar("SELECT name FROM users WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "Leanne G.");
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_update_keeps_original_created_at() {
    let (_tmp, pool) = setup().await;
    let original = user(1, "Leanne Graham");

    let mut later = original.clone();
    later.created_at = original.created_at + Duration::days(3);

    let mut tx = pool.begin().await.unwrap();
    upsert_users(&mut *tx, &[original.clone()]).await.unwrap();
    upsert_users(&mut *tx, &[later]).await.unwrap();
    tx.commit().await.unwrap();

    let created_at: i64 = sqlx::query_scalar("SELECT created_at FROM users WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(created_at, original.created_at.timestamp());
}

#[tokio::test]
async fn test_missing_parent_is_rejected_not_fatal() {
    let (_tmp, pool) = setup().await;

    let mut tx = pool.begin().await.unwrap();
    upsert_users(&mut *tx, &[user(1, "Leanne Graham")]).await.unwrap();
    let posts = upsert_posts(&mut *tx, &[post(1, 1), post(2, 42)]).await.unwrap();
    assert_eq!((posts.inserted, posts.rejected()), (1, 1));
    let comments = upsert_comments(&mut *tx, &[comment(1, 1), comment(2, 2)])
        .await
        .unwrap();
    assert_eq!((comments.inserted, comments.rejected()), (1, 1));
    tx.commit().await.unwrap();

    assert_eq!(
        posts.rejections,
        vec![Rejection {
            kind: EntityKind::Posts,
            id: Some(2),
            reason: RejectReason::ParentNotStored {
                field: "user_id",
                value: 42,
            },
        }]
    );
    assert_eq!(comments.rejections[0].id, Some(2));
    assert_eq!(
        comments.rejections[0].to_string(),
        "comments 2: post_id 2 is not stored"
    );

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_rolled_back_transaction_leaves_no_rows() {
    let (_tmp, pool) = setup().await;

    let mut tx = pool.begin().await.unwrap();
    upsert_users(&mut *tx, &[user(1, "Leanne Graham")]).await.unwrap();
    let mut dup = user(2, "Ervin Howell");
    dup.username = Some("user1".to_string());
    let err = upsert_users(&mut *tx, &[dup]).await.unwrap_err();
    assert!(err.to_string().contains("UNIQUE constraint failed"));
    tx.rollback().await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_average_counts_users_without_posts() {
    let (_tmp, pool) = setup().await;
    load(
        &pool,
        &[user(1, "A"), user(2, "B"), user(3, "C")],
        &[post(1, 1), post(2, 1), post(3, 2), post(4, 2)],
        &[],
    )
    .await;

    let summary = compute_summary(&pool, 10).await.unwrap();
    assert_eq!(summary.total_users, 3);
    assert_eq!(summary.total_posts, 4);
    assert!((summary.average_posts_per_user - 4.0 / 3.0).abs() < 1e-9);

    // Users 1 and 2 tie on two posts
    let active = summary.most_active_user.unwrap();
    assert_eq!(active.user_id, 1);
    assert_eq!(active.name.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_top_posts_tie_break_and_zero_comments() {
    let (_tmp, pool) = setup().await;
    load(
        &pool,
        &[user(1, "A"), user(2, "B")],
        &[post(1, 2), post(2, 1), post(3, 1), post(4, 1)],
        &[
            comment(1, 3),
            comment(2, 3),
            comment(3, 2),
            comment(4, 2),
            comment(5, 4),
        ],
    )
    .await;

    let summary = compute_summary(&pool, 3).await.unwrap();
    let ranked: Vec<(i64, i64)> = summary
        .top_posts
        .iter()
        .map(|p| (p.post_id, p.comment_count))
        .collect();
    assert_eq!(ranked, vec![(2, 2), (3, 2), (4, 1)]);
    assert_eq!(summary.top_posts[0].author.as_deref(), Some("A"));

    let all = compute_summary(&pool, 10).await.unwrap();
    assert_eq!(all.top_posts.last().map(|p| (p.post_id, p.comment_count)), Some((1, 0)));
    assert_eq!(all.top_posts[3].author.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_empty_store_summary() {
    let (_tmp, pool) = setup().await;

    let summary = compute_summary(&pool, 10).await.unwrap();
    assert_eq!(summary.total_users, 0);
    assert_eq!(summary.average_posts_per_user, 0.0);
    assert!(summary.most_active_user.is_none());
    assert!(summary.top_posts.is_empty());
}

#[tokio::test]
async fn test_query_failure_is_an_analytics_error() {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::with_db_path(tmp.path().join("empty.sqlite"));
    let pool = db::connect(&cfg).await.unwrap();

    let err = compute_summary(&pool, 10).await.unwrap_err();
    assert!(matches!(err, AnalyticsError::Query(_)));
    assert!(err.to_string().contains("no such table"));
}
