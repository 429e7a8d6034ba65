//! Raw record → normalized record transformation.
//!
//! [`transform_record`] is a pure function of a raw JSON value, its entity
//! type and the ingestion timestamp. Malformed input yields a [`Rejection`],
//! never an error or a panic. Field rules, applied per field and skipped
//! when the source field is absent:
//!
//! 1. rename (`userId` → `user_id`, `postId` → `post_id`, `catchPhrase` →
//!    `company_catch_phrase`, nested address/company/geo flattened)
//! 2. coerce coordinates to `f64` (unparseable → omitted)
//! 3. normalize strings: collapse whitespace, lower-case emails, digits-only
//!    phones, `http://` prefix on bare websites
//! 4. require `id` and the immediate foreign key as JSON integers
//! 5. attach `created_at`
//!
//! [`transform_run`] applies this to a whole extraction and then drops
//! posts whose user and comments whose post are not among the run's
//! accepted records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::extract::RawExtract;
use crate::models::{Comment, EntityKind, EntityStats, Post, Record, User};

/// Why a raw record was not accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    NotAnObject,
    MissingId,
    InvalidId,
    MissingForeignKey { field: &'static str },
    InvalidForeignKey { field: &'static str },
    /// The referenced parent is not among this run's accepted records.
    OrphanedReference { field: &'static str, value: i64 },
    /// The referenced parent row is absent from the database at load time.
    ParentNotStored { field: &'static str, value: i64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotAnObject => write!(f, "record is not a JSON object"),
            RejectReason::MissingId => write!(f, "missing id"),
            RejectReason::InvalidId => write!(f, "id is not an integer"),
            RejectReason::MissingForeignKey { field } => write!(f, "missing {}", field),
            RejectReason::InvalidForeignKey { field } => {
                write!(f, "{} is not an integer", field)
            }
            RejectReason::OrphanedReference { field, value } => {
                write!(f, "{} {} does not reference an accepted record", field, value)
            }
            RejectReason::ParentNotStored { field, value } => {
                write!(f, "{} {} is not stored", field, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub kind: EntityKind,
    /// Source id when one could be read.
    pub id: Option<i64>,
    #[serde(flatten)]
    pub reason: RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} {}: {}", self.kind, id, self.reason),
            None => write!(f, "{} (no id): {}", self.kind, self.reason),
        }
    }
}

/// Transform one raw record of the given entity type.
pub fn transform_record(
    kind: EntityKind,
    raw: &Value,
    ingested_at: DateTime<Utc>,
) -> Result<Record, Rejection> {
    let reject = |id: Option<i64>, reason: RejectReason| Rejection { kind, id, reason };

    let obj = raw
        .as_object()
        .ok_or_else(|| reject(None, RejectReason::NotAnObject))?;

    let id = match obj.get("id") {
        None | Some(Value::Null) => return Err(reject(None, RejectReason::MissingId)),
        Some(v) => v.as_i64().ok_or_else(|| reject(None, RejectReason::InvalidId))?,
    };

    match kind {
        EntityKind::Users => Ok(Record::User(user_from(id, obj, ingested_at))),
        EntityKind::Posts => {
            let user_id = foreign_key(obj, &["userId", "user_id"], "user_id")
                .map_err(|reason| reject(Some(id), reason))?;
            Ok(Record::Post(Post {
                id,
                user_id,
                title: text(obj.get("title")),
                body: text(obj.get("body")),
                created_at: ingested_at,
            }))
        }
        EntityKind::Comments => {
            let post_id = foreign_key(obj, &["postId", "post_id"], "post_id")
                .map_err(|reason| reject(Some(id), reason))?;
            Ok(Record::Comment(Comment {
                id,
                post_id,
                name: text(obj.get("name")),
                email: obj.get("email").and_then(normalize_email),
                body: text(obj.get("body")),
                created_at: ingested_at,
            }))
        }
    }
}

fn user_from(id: i64, obj: &Map<String, Value>, ingested_at: DateTime<Utc>) -> User {
    let address = obj.get("address").and_then(Value::as_object);
    let geo = address
        .and_then(|a| a.get("geo"))
        .and_then(Value::as_object);
    let company = obj.get("company").and_then(Value::as_object);

    let nested = |parent: Option<&Map<String, Value>>, key: &str| {
        parent.and_then(|p| text(p.get(key)))
    };

    User {
        id,
        name: text(obj.get("name")),
        username: text(obj.get("username")),
        email: obj.get("email").and_then(normalize_email),
        phone: obj.get("phone").and_then(Value::as_str).map(normalize_phone),
        website: obj
            .get("website")
            .and_then(Value::as_str)
            .and_then(normalize_website),
        address_street: nested(address, "street"),
        address_suite: nested(address, "suite"),
        address_city: nested(address, "city"),
        address_zipcode: nested(address, "zipcode"),
        geo_lat: geo.and_then(|g| g.get("lat")).and_then(coordinate),
        geo_lng: geo.and_then(|g| g.get("lng")).and_then(coordinate),
        company_name: nested(company, "name"),
        company_catch_phrase: company.and_then(|c| {
            text(c.get("catchPhrase")).or_else(|| text(c.get("catch_phrase")))
        }),
        company_bs: nested(company, "bs"),
        created_at: ingested_at,
    }
}

/// Reads the first present key among `keys` as an integer foreign key.
fn foreign_key(
    obj: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<i64, RejectReason> {
    let value = keys
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
        .ok_or(RejectReason::MissingForeignKey { field })?;

    value
        .as_i64()
        .ok_or(RejectReason::InvalidForeignKey { field })
}

/// Free text: trimmed, internal whitespace collapsed. Non-strings are absent.
fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(clean_text)
}

pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_email(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.trim().to_lowercase())
}

/// Keeps ASCII digits only.
pub fn normalize_phone(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lower-cased, `http://`-prefixed when no scheme is given. Blank → absent.
pub fn normalize_website(s: &str) -> Option<String> {
    let site = s.trim().to_lowercase();
    if site.is_empty() {
        return None;
    }
    if site.starts_with("http://") || site.starts_with("https://") {
        Some(site)
    } else {
        Some(format!("http://{}", site))
    }
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Accepted records and rejections of one entity type.
#[derive(Debug, Clone, Default)]
pub struct TransformBatch<T> {
    pub records: Vec<T>,
    pub rejections: Vec<Rejection>,
}

/// Output of the transform stage for a whole run.
#[derive(Debug, Clone, Default)]
pub struct TransformedRun {
    pub users: Vec<User>,
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
    pub rejections: Vec<Rejection>,
    pub stats: BTreeMap<EntityKind, EntityStats>,
}

impl TransformedRun {
    pub fn accepted(&self) -> usize {
        self.users.len() + self.posts.len() + self.comments.len()
    }
}

fn transform_kind<T>(
    kind: EntityKind,
    raws: &[Value],
    ingested_at: DateTime<Utc>,
    select: impl Fn(Record) -> Option<T>,
) -> TransformBatch<T> {
    let mut batch = TransformBatch {
        records: Vec::with_capacity(raws.len()),
        rejections: Vec::new(),
    };
    for raw in raws {
        match transform_record(kind, raw, ingested_at) {
            Ok(record) => {
                if let Some(r) = select(record) {
                    batch.records.push(r);
                }
            }
            Err(rejection) => batch.rejections.push(rejection),
        }
    }
    batch
}

pub fn transform_users(raws: &[Value], ingested_at: DateTime<Utc>) -> TransformBatch<User> {
    transform_kind(EntityKind::Users, raws, ingested_at, |r| match r {
        Record::User(u) => Some(u),
        _ => None,
    })
}

pub fn transform_posts(raws: &[Value], ingested_at: DateTime<Utc>) -> TransformBatch<Post> {
    transform_kind(EntityKind::Posts, raws, ingested_at, |r| match r {
        Record::Post(p) => Some(p),
        _ => None,
    })
}

pub fn transform_comments(raws: &[Value], ingested_at: DateTime<Utc>) -> TransformBatch<Comment> {
    transform_kind(EntityKind::Comments, raws, ingested_at, |r| match r {
        Record::Comment(c) => Some(c),
        _ => None,
    })
}

/// Transform every collection and enforce in-run referential integrity.
///
/// For every entity type, `accepted + rejected == extracted`.
pub fn transform_run(raw: &RawExtract, ingested_at: DateTime<Utc>) -> TransformedRun {
    let users = transform_users(&raw.users, ingested_at);
    let mut posts = transform_posts(&raw.posts, ingested_at);
    let mut comments = transform_comments(&raw.comments, ingested_at);

    let user_ids: HashSet<i64> = users.records.iter().map(|u| u.id).collect();
    let (kept, orphans): (Vec<Post>, Vec<Post>) = posts
        .records
        .drain(..)
        .partition(|p| user_ids.contains(&p.user_id));
    posts.records = kept;
    posts
        .rejections
        .extend(orphans.into_iter().map(|p| Rejection {
            kind: EntityKind::Posts,
            id: Some(p.id),
            reason: RejectReason::OrphanedReference {
                field: "user_id",
                value: p.user_id,
            },
        }));

    let post_ids: HashSet<i64> = posts.records.iter().map(|p| p.id).collect();
    let (kept, orphans): (Vec<Comment>, Vec<Comment>) = comments
        .records
        .drain(..)
        .partition(|c| post_ids.contains(&c.post_id));
    comments.records = kept;
    comments
        .rejections
        .extend(orphans.into_iter().map(|c| Rejection {
            kind: EntityKind::Comments,
            id: Some(c.id),
            reason: RejectReason::OrphanedReference {
                field: "post_id",
                value: c.post_id,
            },
        }));

    let mut stats = BTreeMap::new();
    let mut record_stats = |kind: EntityKind, accepted: usize, rejected: usize| {
        stats.insert(
            kind,
            EntityStats {
                extracted: raw.get(kind).len() as u64,
                accepted: accepted as u64,
                rejected: rejected as u64,
                ..EntityStats::default()
            },
        );
    };
    record_stats(EntityKind::Users, users.records.len(), users.rejections.len());
    record_stats(EntityKind::Posts, posts.records.len(), posts.rejections.len());
    record_stats(
        EntityKind::Comments,
        comments.records.len(),
        comments.rejections.len(),
    );

    let mut rejections = users.rejections;
    rejections.extend(posts.rejections);
    rejections.extend(comments.rejections);

    TransformedRun {
        users: users.records,
        posts: posts.records,
        comments: comments.records,
        rejections,
        stats,
    }
}
