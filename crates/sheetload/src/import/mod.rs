//! Importer capability, column mapping and per-import options.

pub mod failure;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rusqlite::Transaction;
use serde::{Deserialize, Serialize};

use crate::reader::RawRow;

pub use failure::{describe, FieldError, RowError, GENERIC_ROW_FAILURE};

/// A row after column remapping, keyed by target field.
pub type ProcessedRow = BTreeMap<String, Option<String>>;

/// Target field → source column header. Immutable once an import starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMap(BTreeMap<String, String>);

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.insert(field, column);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, column: impl Into<String>) {
        self.0.insert(field.into(), column.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Projects a raw row onto the mapped fields. Fields mapped to a blank
    /// column are left out, and a mapped column missing from the row gives
    /// `None`.
    pub fn remap(&self, row: &RawRow) -> ProcessedRow {
        self.0
            .iter()
            .filter(|(_, column)| !column.trim().is_empty())
            .map(|(field, column)| (field.clone(), row.get(column).cloned().flatten()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ColumnMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Options carried by every chunk of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub active_sheet: usize,
    pub header_offset: u64,
    /// Importer-specific settings.
    pub settings: HashMap<String, serde_json::Value>,
    /// Extra values supplied by the caller alongside the file.
    pub extra: HashMap<String, serde_json::Value>,
}

impl ImportOptions {
    pub fn extra_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn has_extra(&self, key: &str) -> bool {
        self.extra.contains_key(key)
    }

    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }
}

/// A column an importer can fill, with header spellings to recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportColumn {
    pub name: String,
    pub label: String,
    pub guesses: Vec<String>,
}

impl ImportColumn {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            guesses: Vec::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn guesses<I, S>(mut self, guesses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guesses = guesses.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a detected header refers to this column.
    pub fn matches(&self, header: &str) -> bool {
        let header = normalize(header);
        normalize(&self.name) == header
            || normalize(&self.label) == header
            || self.guesses.iter().any(|g| normalize(g) == header)
    }
}

fn normalize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

/// Transform-and-load logic for one kind of import.
///
/// `import` runs inside a transaction of its own; returning an error rolls
/// back everything the row wrote and records the row as failed. A panic in
/// `import` is treated the same way.
pub trait Importer: Send + Sync {
    fn name(&self) -> &str;

    fn columns(&self) -> Vec<ImportColumn> {
        Vec::new()
    }

    /// Bulk pre-processing of a chunk's rows before they are imported.
    fn transform(&self, rows: Vec<ProcessedRow>) -> Vec<ProcessedRow> {
        rows
    }

    fn import(
        &self,
        tx: &Transaction<'_>,
        row: &ProcessedRow,
        column_map: &ColumnMap,
        options: &ImportOptions,
    ) -> Result<(), RowError>;
}

/// Importers available to the engine, by name.
#[derive(Clone, Default)]
pub struct ImporterRegistry {
    importers: HashMap<String, Arc<dyn Importer>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, importer: Arc<dyn Importer>) {
        self.importers.insert(importer.name().to_string(), importer);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.importers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
