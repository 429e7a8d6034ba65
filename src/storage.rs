//! Date-partitioned file stores.
//!
//! ```text
//! <data_dir>/raw/2024-05-01/users.json
//! <data_dir>/processed/2024-05-01/users.parquet
//! ```
//!
//! Both stores overwrite the file for a given kind and partition, so a re-run
//! on the same UTC date replaces the previous output instead of appending to it.
//! A failed write may leave a partial file behind.

use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::columnar::Columnar;
use crate::error::StorageError;
use crate::models::EntityKind;

/// Partition name for a run timestamp: its UTC date as `YYYY-MM-DD`.
pub fn partition_for(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Raw API payloads, one pretty-printed JSON array per entity type.
#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("raw"),
        }
    }

    pub fn path(&self, kind: EntityKind, partition: &str) -> PathBuf {
        self.root.join(partition).join(format!("{}.json", kind))
    }

    pub fn write(
        &self,
        kind: EntityKind,
        partition: &str,
        records: &[Value],
    ) -> Result<PathBuf, StorageError> {
        let path = self.path(kind, partition);
        ensure_dir(&self.root.join(partition))?;

        let json = serde_json::to_vec_pretty(records).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }

    pub fn read(&self, kind: EntityKind, partition: &str) -> Result<Vec<Value>, StorageError> {
        let path = self.path(kind, partition);
        let bytes = std::fs::read(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Json { path, source })
    }
}

/// Normalized records, one Parquet file per entity type.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    root: PathBuf,
}

impl ProcessedStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("processed"),
        }
    }

    pub fn path(&self, kind: EntityKind, partition: &str) -> PathBuf {
        self.root.join(partition).join(format!("{}.parquet", kind))
    }

    pub fn write<T: Columnar>(&self, partition: &str, rows: &[T]) -> Result<PathBuf, StorageError> {
        let path = self.path(T::KIND, partition);
        ensure_dir(&self.root.join(partition))?;

        let batch = T::to_batch(rows).map_err(|source| StorageError::Arrow {
            kind: T::KIND,
            source,
        })?;

        let parquet_err = |source| StorageError::Parquet {
            path: path.clone(),
            source,
        };

        let file = File::create(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer =
            ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(parquet_err)?;
        writer.write(&batch).map_err(parquet_err)?;
        writer.close().map_err(parquet_err)?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, User};
    use chrono::TimeZone;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn partition_uses_utc_date() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap();
        assert_eq!(partition_for(ts), "2024-05-01");
    }

    #[test]
    fn raw_write_overwrites_same_partition() {
        let tmp = TempDir::new().unwrap();
        let store = RawStore::new(tmp.path());

        store
            .write(EntityKind::Users, "2024-05-01", &[json!({"id": 1}), json!({"id": 2})])
            .unwrap();
        let path = store
            .write(EntityKind::Users, "2024-05-01", &[json!({"id": 3})])
            .unwrap();

        assert_eq!(path, tmp.path().join("raw/2024-05-01/users.json"));
        let back = store.read(EntityKind::Users, "2024-05-01").unwrap();
        assert_eq!(back, vec![json!({"id": 3})]);
    }

    #[test]
    fn processed_write_is_readable_parquet() {
        let tmp = TempDir::new().unwrap();
        let store = ProcessedStore::new(tmp.path());
        let now = Utc::now();
        let users = vec![User {
            id: 7,
            name: Some("Kurtis Weissnat".into()),
            username: Some("Elwyn.Skiles".into()),
            email: Some("telly.hoeger@billy.biz".into()),
            phone: Some("2100676132".into()),
            website: Some("http://elvis.io".into()),
            address_street: None,
            address_suite: None,
            address_city: Some("Howemouth".into()),
            address_zipcode: None,
            geo_lat: Some(24.8918),
            geo_lng: Some(21.8984),
            company_name: None,
            company_catch_phrase: None,
            company_bs: None,
            created_at: now,
        }];

        let path = store.write("2024-05-01", &users).unwrap();
        assert_eq!(path, tmp.path().join("processed/2024-05-01/users.parquet"));

        let file = File::open(&path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        let column = builder.metadata().row_group(0).column(0);
        assert_eq!(column.compression(), Compression::SNAPPY);
        let reader = builder.build().unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 1);
    }

    #[test]
    fn processed_write_accepts_empty_batch() {
        let tmp = TempDir::new().unwrap();
        let store = ProcessedStore::new(tmp.path());
        let path = store.write::<Comment>("2024-05-01", &[]).unwrap();
        assert!(path.exists());
    }
}
