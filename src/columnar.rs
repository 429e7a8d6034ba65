//! Arrow schemas and record batches for processed partitions.
//!
//! One flat schema per entity; columns mirror the normalized record fields
//! one-to-one. `created_at` is stored as an RFC 3339 string.

use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

use crate::models::{Comment, EntityKind, Post, User};

/// A normalized record type that can be written as a Parquet partition file.
pub trait Columnar: Sized {
    const KIND: EntityKind;

    fn schema() -> SchemaRef;

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError>;
}

fn strings<'a, T: 'a>(rows: &'a [T], f: impl Fn(&'a T) -> Option<&'a str>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn ints<T>(rows: &[T], f: impl Fn(&T) -> i64) -> ArrayRef {
    Arc::new(Int64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn floats<T>(rows: &[T], f: impl Fn(&T) -> Option<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn timestamps<T>(rows: &[T], f: impl Fn(&T) -> String) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

impl Columnar for User {
    const KIND: EntityKind = EntityKind::Users;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("username", DataType::Utf8, true),
            Field::new("email", DataType::Utf8, true),
            Field::new("phone", DataType::Utf8, true),
            Field::new("website", DataType::Utf8, true),
            Field::new("address_street", DataType::Utf8, true),
            Field::new("address_suite", DataType::Utf8, true),
            Field::new("address_city", DataType::Utf8, true),
            Field::new("address_zipcode", DataType::Utf8, true),
            Field::new("geo_lat", DataType::Float64, true),
            Field::new("geo_lng", DataType::Float64, true),
            Field::new("company_name", DataType::Utf8, true),
            Field::new("company_catch_phrase", DataType::Utf8, true),
            Field::new("company_bs", DataType::Utf8, true),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                ints(rows, |u| u.id),
                strings(rows, |u| u.name.as_deref()),
                strings(rows, |u| u.username.as_deref()),
                strings(rows, |u| u.email.as_deref()),
                strings(rows, |u| u.phone.as_deref()),
                strings(rows, |u| u.website.as_deref()),
                strings(rows, |u| u.address_street.as_deref()),
                strings(rows, |u| u.address_suite.as_deref()),
                strings(rows, |u| u.address_city.as_deref()),
                strings(rows, |u| u.address_zipcode.as_deref()),
                floats(rows, |u| u.geo_lat),
                floats(rows, |u| u.geo_lng),
                strings(rows, |u| u.company_name.as_deref()),
                strings(rows, |u| u.company_catch_phrase.as_deref()),
                strings(rows, |u| u.company_bs.as_deref()),
                timestamps(rows, |u| u.created_at.to_rfc3339()),
            ],
        )
    }
}

impl Columnar for Post {
    const KIND: EntityKind = EntityKind::Posts;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("user_id", DataType::Int64, false),
            Field::new("title", DataType::Utf8, true),
            Field::new("body", DataType::Utf8, true),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                ints(rows, |p| p.id),
                ints(rows, |p| p.user_id),
                strings(rows, |p| p.title.as_deref()),
                strings(rows, |p| p.body.as_deref()),
                timestamps(rows, |p| p.created_at.to_rfc3339()),
            ],
        )
    }
}

impl Columnar for Comment {
    const KIND: EntityKind = EntityKind::Comments;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("post_id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("email", DataType::Utf8, true),
            Field::new("body", DataType::Utf8, true),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                ints(rows, |c| c.id),
                ints(rows, |c| c.post_id),
                strings(rows, |c| c.name.as_deref()),
                strings(rows, |c| c.email.as_deref()),
                strings(rows, |c| c.body.as_deref()),
                timestamps(rows, |c| c.created_at.to_rfc3339()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_post_batch_shape() {
        let now = Utc::now();
        let posts = vec![
            Post {
                id: 1,
                user_id: 1,
                title: Some("a".into()),
                body: None,
                created_at: now,
            },
            Post {
                id: 2,
                user_id: 1,
                title: None,
                body: Some("b".into()),
                created_at: now,
            },
        ];
        let batch = Post::to_batch(&posts).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 5);
        assert_eq!(batch.column(2).null_count(), 1);
    }

    #[test]
    fn test_empty_batch() {
        let batch = User::to_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), User::schema());
    }
}
