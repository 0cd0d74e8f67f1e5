//! Import progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::import_repo::ImportRow;

/// Point in an import's life an event reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    /// Chunks were dispatched.
    Started,
    /// A chunk finished and its counts were applied.
    Progress,
    /// Every row has been processed; addressed to the import's owner.
    Processed,
    /// The batch settled and the import was stamped complete.
    Completed,
    /// Something the caller should see that did not stop the import.
    Warning,
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportPhase::Started => write!(f, "Started"),
            ImportPhase::Progress => write!(f, "Progress"),
            ImportPhase::Processed => write!(f, "Processed"),
            ImportPhase::Completed => write!(f, "Completed"),
            ImportPhase::Warning => write!(f, "Warning"),
        }
    }
}

/// How a finished import should be presented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Danger,
}

impl Severity {
    /// No failures is a success, every row failing is danger, anything
    /// in between a warning.
    pub fn from_counts(failed_rows: i64, total_rows: i64) -> Self {
        if failed_rows <= 0 {
            Severity::Success
        } else if failed_rows >= total_rows {
            Severity::Danger
        } else {
            Severity::Warning
        }
    }
}

/// Progress event for an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEvent {
    pub import_id: i64,
    pub phase: ImportPhase,
    /// Principal that started the import, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub imported_rows: i64,
    pub failed_rows: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub timestamp: DateTime<Utc>,
}

impl ImportEvent {
    /// Creates an event carrying the record's current counts.
    pub fn from_record(record: &ImportRow, phase: ImportPhase, message: &str) -> Self {
        let severity = match phase {
            ImportPhase::Processed | ImportPhase::Completed => Some(Severity::from_counts(
                record.failed_rows,
                record.total_rows,
            )),
            ImportPhase::Warning => Some(Severity::Warning),
            ImportPhase::Started | ImportPhase::Progress => None,
        };

        Self {
            import_id: record.id,
            phase,
            owner: record.user_id.clone(),
            total_rows: record.total_rows,
            processed_rows: record.processed_rows,
            imported_rows: record.imported_rows,
            failed_rows: record.failed_rows,
            message: message.to_string(),
            severity,
            timestamp: Utc::now(),
        }
    }
}

/// Receives import events. Delivery and formatting are up to the sink.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &ImportEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _event: &ImportEvent) {}
}

/// Broadcasts import events to any number of subscribers.
#[derive(Clone)]
pub struct ImportProgressBroadcaster {
    sender: Arc<broadcast::Sender<ImportEvent>>,
}

impl ImportProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: ImportEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for import events.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.sender.subscribe()
    }
}

impl Default for ImportProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for ImportProgressBroadcaster {
    fn notify(&self, event: &ImportEvent) {
        self.send(event.clone());
    }
}
