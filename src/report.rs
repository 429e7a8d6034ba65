//! Report files.
//!
//! Each successful run writes its summary twice, as
//! `analytics_YYYY-MM-DD_HH-MM-SS.json` and `.csv`, into the reports
//! directory. The CSV file holds two `#`-headed sections:
//!
//! ```text
//! # Analytics Report Summary
//! metric,value
//! total_users,10
//! ...
//!
//! # Top Posts by Engagement
//! post_id,title,author,comment_count
//! 1,sunt aut facere,Leanne Graham,5
//! ```
//!
//! File names served over HTTP go through [`report_path`], which only
//! resolves plain names inside the reports directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::analytics::AnalyticsSummary;
use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Csv,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 2] = [ReportFormat::Json, ReportFormat::Csv];

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One file in the reports directory.
#[derive(Debug, Clone, Serialize)]
pub struct ReportInfo {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub format: ReportFormat,
}

/// Totals parsed back out of a CSV report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportTotals {
    pub total_users: i64,
    pub total_posts: i64,
    pub total_comments: i64,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn filename(format: ReportFormat, generated_at: DateTime<Utc>) -> String {
        format!(
            "analytics_{}.{}",
            generated_at.format("%Y-%m-%d_%H-%M-%S"),
            format.extension()
        )
    }

    pub fn write(
        &self,
        format: ReportFormat,
        summary: &AnalyticsSummary,
    ) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self
            .dir
            .join(Self::filename(format, summary.generated_at));

        let bytes = match format {
            ReportFormat::Json => serde_json::to_vec_pretty(summary)?,
            ReportFormat::Csv => csv_bytes(summary, &path)?,
        };
        std::fs::write(&path, bytes).map_err(io_err(&path))?;

        Ok(path)
    }

    /// Writes one file per format, stamped with the summary's timestamp.
    pub fn write_all(&self, summary: &AnalyticsSummary) -> Result<Vec<PathBuf>, ReportError> {
        ReportFormat::ALL
            .iter()
            .map(|format| self.write(*format, summary))
            .collect()
    }
}

fn csv_section(path: &Path, rows: Vec<Vec<String>>) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| io_err(path)(e.into_error()))
}

fn csv_bytes(summary: &AnalyticsSummary, path: &Path) -> Result<Vec<u8>, ReportError> {
    let (active_id, active_name, active_posts) = match &summary.most_active_user {
        Some(u) => (
            u.user_id.to_string(),
            u.name.clone().unwrap_or_default(),
            u.post_count.to_string(),
        ),
        None => Default::default(),
    };

    let metrics = vec![
        vec!["metric".to_string(), "value".to_string()],
        vec!["generated_at".into(), summary.generated_at.to_rfc3339()],
        vec!["total_users".into(), summary.total_users.to_string()],
        vec!["total_posts".into(), summary.total_posts.to_string()],
        vec!["total_comments".into(), summary.total_comments.to_string()],
        vec![
            "average_posts_per_user".into(),
            format!("{:.2}", summary.average_posts_per_user),
        ],
        vec!["most_active_user_id".into(), active_id],
        vec!["most_active_user_name".into(), active_name],
        vec!["most_active_user_posts".into(), active_posts],
    ];

    let mut top = vec![vec![
        "post_id".to_string(),
        "title".to_string(),
        "author".to_string(),
        "comment_count".to_string(),
    ]];
    top.extend(summary.top_posts.iter().map(|p| {
        vec![
            p.post_id.to_string(),
            p.title.clone().unwrap_or_default(),
            p.author.clone().unwrap_or_default(),
            p.comment_count.to_string(),
        ]
    }));

    let mut out = b"# Analytics Report Summary\n".to_vec();
    out.extend(csv_section(path, metrics)?);
    out.extend_from_slice(b"\n# Top Posts by Engagement\n");
    out.extend(csv_section(path, top)?);
    Ok(out)
}

pub fn read_json_report(path: &Path) -> Result<AnalyticsSummary, ReportError> {
    let bytes = std::fs::read(path).map_err(io_err(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn read_csv_totals(path: &Path) -> Result<ReportTotals, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?;

    let (mut users, mut posts, mut comments) = (None, None, None);
    for record in reader.records() {
        let record = record?;
        let (Some(key), Some(value)) = (record.get(0), record.get(1)) else {
            continue;
        };
        let slot = match key {
            "total_users" => &mut users,
            "total_posts" => &mut posts,
            "total_comments" => &mut comments,
            _ => continue,
        };
        let n = value.parse::<i64>().map_err(|e| ReportError::Malformed {
            path: path.to_path_buf(),
            message: format!("{}: {}", key, e),
        })?;
        *slot = Some(n);
    }

    let missing = |name: &str| ReportError::Malformed {
        path: path.to_path_buf(),
        message: format!("missing {}", name),
    };

    Ok(ReportTotals {
        total_users: users.ok_or_else(|| missing("total_users"))?,
        total_posts: posts.ok_or_else(|| missing("total_posts"))?,
        total_comments: comments.ok_or_else(|| missing("total_comments"))?,
    })
}

/// Report files in `dir`, newest first. A missing directory lists as empty.
pub fn list_reports(dir: &Path) -> Result<Vec<ReportInfo>, ReportError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };

    let mut reports = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        let Some(format) = ReportFormat::from_path(&path) else {
            continue;
        };
        let meta = entry.metadata().map_err(io_err(&path))?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        reports.push(ReportInfo {
            filename: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            modified,
            format,
        });
    }

    reports.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.filename.cmp(&a.filename))
    });
    Ok(reports)
}

/// Resolves a plain report file name inside `dir`.
///
/// Names with path separators or `..`, and names of files that do not
/// exist, are `NotFound`.
pub fn report_path(dir: &Path, filename: &str) -> Result<PathBuf, ReportError> {
    let not_found = || ReportError::NotFound(filename.to_string());

    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(not_found());
    }

    let path = dir.join(filename);
    if ReportFormat::from_path(&path).is_none() || !path.is_file() {
        return Err(not_found());
    }
    Ok(path)
}

pub fn delete_report(dir: &Path, filename: &str) -> Result<(), ReportError> {
    let path = report_path(dir, filename)?;
    std::fs::remove_file(&path).map_err(io_err(&path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{ActiveUser, PostEngagement};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn summary() -> AnalyticsSummary {
        AnalyticsSummary {
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            total_users: 3,
            total_posts: 3,
            total_comments: 2,
            average_posts_per_user: 1.5,
            most_active_user: Some(ActiveUser {
                user_id: 1,
                name: Some("Leanne Graham".into()),
                post_count: 2,
            }),
            top_posts: vec![PostEngagement {
                post_id: 1,
                title: Some("a title, with a comma".into()),
                author: Some("Leanne Graham".into()),
                comment_count: 2,
            }],
        }
    }

    #[test]
    fn writes_timestamped_files() {
        let tmp = TempDir::new().unwrap();
        let paths = ReportWriter::new(tmp.path()).write_all(&summary()).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "analytics_2024-05-01_12-30-00.json",
                "analytics_2024-05-01_12-30-00.csv"
            ]
        );
    }

    #[test]
    fn json_and_csv_round_trip_totals() {
        let tmp = TempDir::new().unwrap();
        let writer = ReportWriter::new(tmp.path());
        let original = summary();

        let json = writer.write(ReportFormat::Json, &original).unwrap();
        assert_eq!(read_json_report(&json).unwrap(), original);

        let csv = writer.write(ReportFormat::Csv, &original).unwrap();
        let totals = read_csv_totals(&csv).unwrap();
        assert_eq!(
            totals,
            ReportTotals {
                total_users: 3,
                total_posts: 3,
                total_comments: 2
            }
        );

        let text = std::fs::read_to_string(&csv).unwrap();
        assert!(text.starts_with("# Analytics Report Summary\n"));
        assert!(text.contains("\n\n# Top Posts by Engagement\n"));
        assert!(text.contains("\"a title, with a comma\""));
    }

    #[test]
    fn csv_without_totals_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("analytics_x.csv");
        std::fs::write(&path, "# nothing\nmetric,value\n").unwrap();
        assert!(matches!(
            read_csv_totals(&path),
            Err(ReportError::Malformed { .. })
        ));
    }

    #[test]
    fn report_path_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("analytics_a.json"), "{}").unwrap();

        assert!(report_path(tmp.path(), "analytics_a.json").is_ok());
        for name in ["../etl.sqlite", "sub/analytics_a.json", "..", "", "analytics_b.json"] {
            assert!(
                matches!(report_path(tmp.path(), name), Err(ReportError::NotFound(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn list_and_delete() {
        let tmp = TempDir::new().unwrap();
        assert!(list_reports(&tmp.path().join("missing")).unwrap().is_empty());

        ReportWriter::new(tmp.path()).write_all(&summary()).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let reports = list_reports(tmp.path()).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.size > 0));

        delete_report(tmp.path(), "analytics_2024-05-01_12-30-00.csv").unwrap();
        let reports = list_reports(tmp.path()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].format, ReportFormat::Json);
        assert!(matches!(
            delete_report(tmp.path(), "analytics_2024-05-01_12-30-00.csv"),
            Err(ReportError::NotFound(_))
        ));
    }
}
