//! Import status as presented to callers.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::broadcast::Severity;
use crate::db::import_repo::ImportRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Nothing processed yet.
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
}

impl ImportStatus {
    pub fn of(record: &ImportRow) -> Self {
        match (&record.completed_at, record.failed_rows) {
            (Some(_), 0) => ImportStatus::Completed,
            (Some(_), _) => ImportStatus::CompletedWithErrors,
            (None, _) if record.processed_rows > 0 => ImportStatus::Processing,
            (None, _) => ImportStatus::Pending,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::CompletedWithErrors
        )
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportStatus::Pending => write!(f, "Pending"),
            ImportStatus::Processing => write!(f, "Processing"),
            ImportStatus::Completed => write!(f, "Completed"),
            ImportStatus::CompletedWithErrors => write!(f, "Completed with errors"),
        }
    }
}

/// An import record with its derived status.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub id: i64,
    pub file_name: String,
    pub importer: String,
    pub owner: Option<String>,
    pub status: ImportStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub imported_rows: i64,
    pub failed_rows: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<&ImportRow> for ImportSummary {
    fn from(record: &ImportRow) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name.clone(),
            importer: record.importer.clone(),
            owner: record.user_id.clone(),
            status: ImportStatus::of(record),
            total_rows: record.total_rows,
            processed_rows: record.processed_rows,
            imported_rows: record.imported_rows,
            failed_rows: record.failed_rows,
            created_at: record.created_at.clone(),
            completed_at: record.completed_at.clone(),
        }
    }
}

impl ImportSummary {
    /// Imported rows as a percentage of the total, 0 when there were none.
    pub fn success_rate(&self) -> f64 {
        if self.total_rows <= 0 {
            return 0.0;
        }
        (self.imported_rows as f64 / self.total_rows as f64 * 100.0 * 100.0).round() / 100.0
    }

    /// Time from creation to completion.
    pub fn duration(&self) -> Option<Duration> {
        let completed = parse_timestamp(self.completed_at.as_deref()?)?;
        let created = parse_timestamp(&self.created_at)?;
        Some(completed - created)
    }

    pub fn severity(&self) -> Severity {
        Severity::from_counts(self.failed_rows, self.total_rows)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
