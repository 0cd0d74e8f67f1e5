//! Importers and fixture data shared by the integration tests.

#![allow(dead_code)]

use std::sync::{LazyLock, Mutex};

use regex::Regex;
use rusqlite::Transaction;

use sheetload::{
    ColumnMap, FieldError, ImportColumn, ImportEvent, ImportOptions, Importer, NotificationSink,
    ProcessedRow, RowError,
};

pub const USERS_HEADER: &[&str] = &["Full Name", "E-mail", "Password"];

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$").unwrap());

/// Inserts users, validating email format and password length first.
/// Missing names are left to the table's NOT NULL constraint.
pub struct UsersImporter;

impl Importer for UsersImporter {
    fn name(&self) -> &str {
        "users"
    }

    fn columns(&self) -> Vec<ImportColumn> {
        vec![
            ImportColumn::new("name").guesses(["full name", "user name"]),
            ImportColumn::new("email")
                .label("Email address")
                .guesses(["e-mail", "mail"]),
            ImportColumn::new("password"),
        ]
    }

    fn import(
        &self,
        tx: &Transaction<'_>,
        row: &ProcessedRow,
        _column_map: &ColumnMap,
        options: &ImportOptions,
    ) -> Result<(), RowError> {
        let field = |name: &str| row.get(name).cloned().flatten();
        let name = field("name");
        let email = field("email");
        let password = field("password");

        let mut errors = Vec::new();
        if let Some(email) = email.as_deref() {
            if !EMAIL.is_match(email) {
                errors.push(FieldError::new("email", "must be a valid email address"));
            }
        }
        if password.as_deref().is_some_and(|p| p.chars().count() < 8) {
            errors.push(FieldError::new("password", "must be at least 8 characters"));
        }
        if !errors.is_empty() {
            return Err(RowError::Validation(errors));
        }

        let email = match (email, options.setting("lowercase_email")) {
            (Some(e), Some(serde_json::Value::Bool(true))) => Some(e.to_lowercase()),
            (email, _) => email,
        };
        tx.execute(
            "INSERT INTO users (name, email, password) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, email, password],
        )?;
        Ok(())
    }
}

/// Delegates to [`UsersImporter`] but panics on one email address.
pub struct FragileUsersImporter {
    pub panic_on: &'static str,
}

impl Importer for FragileUsersImporter {
    fn name(&self) -> &str {
        "fragile_users"
    }

    fn import(
        &self,
        tx: &Transaction<'_>,
        row: &ProcessedRow,
        column_map: &ColumnMap,
        options: &ImportOptions,
    ) -> Result<(), RowError> {
        if row.get("email").cloned().flatten().as_deref() == Some(self.panic_on) {
            panic!("cannot handle {}", self.panic_on);
        }
        UsersImporter.import(tx, row, column_map, options)
    }
}

/// The column map matching [`USERS_HEADER`].
pub fn users_map() -> ColumnMap {
    ColumnMap::new()
        .with("name", "Full Name")
        .with("email", "E-mail")
        .with("password", "Password")
}

/// Header plus `count` valid users named `User <n>`.
pub fn valid_users(count: usize) -> Vec<Vec<String>> {
    let mut rows = vec![USERS_HEADER.iter().map(|s| s.to_string()).collect()];
    for i in 1..=count {
        rows.push(vec![
            format!("User {}", i),
            format!("user{}@example.com", i),
            format!("secret-{:04}", i),
        ]);
    }
    rows
}

/// Collects every event it is sent.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ImportEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<ImportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, event: &ImportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
