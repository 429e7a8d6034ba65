//! Insert-or-update of normalized records, keyed by natural id.
//!
//! Every function takes an open connection, normally `&mut *tx` of the run's
//! load transaction, so the caller owns commit and rollback. A record whose
//! parent row is missing is skipped and returned as a [`Rejection`]; any
//! other constraint violation is returned as an error and aborts the batch.
//!
//! `created_at` is written on insert only.

use sqlx::SqliteConnection;
use tracing::warn;

use crate::models::{Comment, EntityKind, Post, UpsertCounts, User};
use crate::transform::{RejectReason, Rejection};

async fn exists(conn: &mut SqliteConnection, table: &str, id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(&format!("SELECT 1 FROM {} WHERE id = ?", table))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

pub async fn upsert_users(
    conn: &mut SqliteConnection,
    users: &[User],
) -> Result<UpsertCounts, sqlx::Error> {
    let mut counts = UpsertCounts::default();

    for user in users {
        let existed = exists(conn, "users", user.id).await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, name, username, email, phone, website,
                address_street, address_suite, address_city, address_zipcode,
                geo_lat, geo_lng, company_name, company_catch_phrase, company_bs, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                username = excluded.username,
                email = excluded.email,
                phone = excluded.phone,
                website = excluded.website,
                address_street = excluded.address_street,
                address_suite = excluded.address_suite,
                address_city = excluded.address_city,
                address_zipcode = excluded.address_zipcode,
                geo_lat = excluded.geo_lat,
                geo_lng = excluded.geo_lng,
                company_name = excluded.company_name,
                company_catch_phrase = excluded.company_catch_phrase,
                company_bs = excluded.company_bs
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.website)
        .bind(&user.address_street)
        .bind(&user.address_suite)
        .bind(&user.address_city)
        .bind(&user.address_zipcode)
        .bind(user.geo_lat)
        .bind(user.geo_lng)
        .bind(&user.company_name)
        .bind(&user.company_catch_phrase)
        .bind(&user.company_bs)
        .bind(user.created_at.timestamp())
        .execute(&mut *conn)
        .await?;

        if existed {
            counts.updated += 1;
        } else {
            counts.inserted += 1;
        }
    }

    Ok(counts)
}

pub async fn upsert_posts(
    conn: &mut SqliteConnection,
    posts: &[Post],
) -> Result<UpsertCounts, sqlx::Error> {
    let mut counts = UpsertCounts::default();

    for post in posts {
        if !exists(conn, "users", post.user_id).await? {
            warn!(post_id = post.id, user_id = post.user_id, "skipping post: user not stored");
            counts.rejections.push(Rejection {
                kind: EntityKind::Posts,
                id: Some(post.id),
                reason: RejectReason::ParentNotStored {
                    field: "user_id",
                    value: post.user_id,
                },
            });
            continue;
        }
        let existed = exists(conn, "posts", post.id).await?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, title, body, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                body = excluded.body
            "#,
        )
        .bind(post.id)
        .bind(post.user_id)
        .bind(&post.title)
        .bind(&post.body)
        .bind(post.created_at.timestamp())
        .execute(&mut *conn)
        .await?;

        if existed {
            counts.updated += 1;
        } else {
            counts.inserted += 1;
        }
    }

    Ok(counts)
}

pub async fn upsert_comments(
    conn: &mut SqliteConnection,
    comments: &[Comment],
) -> Result<UpsertCounts, sqlx::Error> {
    let mut counts = UpsertCounts::default();

    for comment in comments {
        if !exists(conn, "posts", comment.post_id).await? {
            warn!(
                comment_id = comment.id,
                post_id = comment.post_id,
                "skipping comment: post not stored"
            );
            counts.rejections.push(Rejection {
                kind: EntityKind::Comments,
                id: Some(comment.id),
                reason: RejectReason::ParentNotStored {
                    field: "post_id",
                    value: comment.post_id,
                },
            });
            continue;
        }
        let existed = exists(conn, "comments", comment.id).await?;

        sqlx::query(
            r#"
            INSERT INTO comments (id, post_id, name, email, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                post_id = excluded.post_id,
                name = excluded.name,
                email = excluded.email,
                body = excluded.body
            "#,
        )
        .bind(comment.id)
        .bind(comment.post_id)
        .bind(&comment.name)
        .bind(&comment.email)
        .bind(&comment.body)
        .bind(comment.created_at.timestamp())
        .execute(&mut *conn)
        .await?;

        if existed {
            counts.updated += 1;
        } else {
            counts.inserted += 1;
        }
    }

    Ok(counts)
}
