//! Import progress events and the sinks that receive them.

pub mod import_progress;

pub use import_progress::{
    ImportEvent, ImportPhase, ImportProgressBroadcaster, NoopNotifier, NotificationSink, Severity,
};
