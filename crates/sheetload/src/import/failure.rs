//! Per-row failures and the readable messages stored for them.
//!
//! Storage engine text never reaches a failed row: constraint violations
//! are matched into short templates and everything else unrecognised
//! collapses to [`GENERIC_ROW_FAILURE`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::db::DatabaseError;

pub const GENERIC_ROW_FAILURE: &str = "Failed to import row due to data validation error";

/// Longest free-form message kept as is.
const MAX_MESSAGE_LEN: usize = 255;

/// A validation problem with one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Why a single row could not be imported.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("storage error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Message(String),
}

impl RowError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        RowError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<DatabaseError> for RowError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Sqlite(inner) => RowError::Database(inner),
            other => RowError::Message(other.to_string()),
        }
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

static NOT_NULL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"NOT NULL constraint failed: (?:\w+\.)?(\w+)").unwrap(),
        Regex::new(r#"null value in column "(\w+)""#).unwrap(),
        Regex::new(r"Column '(\w+)' cannot be null").unwrap(),
        Regex::new(r"Field '(\w+)' doesn't have a default value").unwrap(),
    ]
});

static UNIQUE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"UNIQUE constraint failed: (?:\w+\.)?(\w+)").unwrap(),
        Regex::new(r"(?s)duplicate key value violates unique constraint.*Key \((\w+)\)").unwrap(),
        Regex::new(r"Duplicate entry '.*' for key '(?:\w+\.)?(\w+)'").unwrap(),
    ]
});

static FOREIGN_KEY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"(?s)violates foreign key constraint.*is not present in table "(\w+)""#)
            .unwrap(),
        Regex::new(r"(?s)foreign key constraint fails.*REFERENCES `(\w+)`").unwrap(),
    ]
});

static CHECK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"CHECK constraint failed: (\w+)").unwrap(),
        Regex::new(r#"violates check constraint "(\w+)""#).unwrap(),
        Regex::new(r"Check constraint '(\w+)' is violated").unwrap(),
    ]
});

/// Markers of raw engine text that must not be shown.
static DIALECT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)SQLSTATE|\bsqlite|\bSQL\b|syntax error|\bINSERT INTO\b|\bUPDATE\s+\w+\s+SET\b|\bconstraint\b")
        .unwrap()
});

fn first_capture(patterns: &[Regex], message: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Maps a storage constraint violation to a readable message.
fn constraint_message(message: &str) -> Option<String> {
    if let Some(field) = first_capture(&NOT_NULL, message) {
        return Some(format!("{} is required and cannot be empty", field));
    }
    if let Some(field) = first_capture(&UNIQUE, message) {
        return Some(format!("{} already exists", field));
    }
    if let Some(table) = first_capture(&FOREIGN_KEY, message) {
        return Some(format!("invalid reference to {}", table));
    }
    if message.contains("FOREIGN KEY constraint failed") {
        return Some("invalid reference to related record".to_string());
    }
    if let Some(constraint) = first_capture(&CHECK, message) {
        return Some(format!("invalid value: {} constraint failed", constraint));
    }
    None
}

/// The message stored on a failed row.
pub fn describe(error: &RowError) -> String {
    match error {
        RowError::Validation(fields) if !fields.is_empty() => join_fields(fields),
        RowError::Validation(_) => GENERIC_ROW_FAILURE.to_string(),
        RowError::Database(e) => {
            constraint_message(&e.to_string()).unwrap_or_else(|| GENERIC_ROW_FAILURE.to_string())
        }
        RowError::Message(message) => {
            if let Some(readable) = constraint_message(message) {
                return readable;
            }
            let message = message.trim();
            if message.is_empty()
                || message.len() > MAX_MESSAGE_LEN
                || DIALECT_MARKERS.is_match(message)
            {
                GENERIC_ROW_FAILURE.to_string()
            } else {
                message.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn sqlite_error(setup: &str, statement: &str) -> RowError {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn.execute_batch(setup).unwrap();
        RowError::Database(conn.execute_batch(statement).unwrap_err())
    }

    #[test]
    fn test_validation_fields_are_joined() {
        let error = RowError::Validation(vec![
            FieldError::new("email", "must be a valid email address"),
            FieldError::new("password", "must be at least 8 characters"),
        ]);
        assert_eq!(
            describe(&error),
            "email: must be a valid email address; password: must be at least 8 characters"
        );
    }

    #[test]
    fn test_sqlite_not_null() {
        let error = sqlite_error(
            "CREATE TABLE users (email TEXT NOT NULL)",
            "INSERT INTO users (email) VALUES (NULL)",
        );
        assert_eq!(describe(&error), "email is required and cannot be empty");
    }

    #[test]
    fn test_sqlite_unique() {
        let error = sqlite_error(
            "CREATE TABLE users (email TEXT UNIQUE); INSERT INTO users VALUES ('a@b.io');",
            "INSERT INTO users (email) VALUES ('a@b.io')",
        );
        assert_eq!(describe(&error), "email already exists");
    }

    #[test]
    fn test_sqlite_foreign_key() {
        let error = sqlite_error(
            "CREATE TABLE teams (id INTEGER PRIMARY KEY);
             CREATE TABLE users (team_id INTEGER REFERENCES teams(id));",
            "INSERT INTO users (team_id) VALUES (9)",
        );
        assert_eq!(describe(&error), "invalid reference to related record");
    }

    #[test]
    fn test_sqlite_check() {
        let error = sqlite_error(
            "CREATE TABLE items (qty INTEGER CONSTRAINT positive_qty CHECK (qty > 0))",
            "INSERT INTO items (qty) VALUES (0)",
        );
        assert_eq!(describe(&error), "invalid value: positive_qty constraint failed");
    }

    #[test]
    fn test_other_dialects() {
        let cases = [
            (
                r#"ERROR: null value in column "email" of relation "users" violates not-null constraint"#,
                "email is required and cannot be empty",
            ),
            (
                "ERROR: duplicate key value violates unique constraint \"users_email_key\"\nDETAIL: Key (email)=(a@b.io) already exists.",
                "email already exists",
            ),
            (
                "ERROR: insert or update on table \"users\" violates foreign key constraint \"users_team_fk\"\nDETAIL: Key (team_id)=(9) is not present in table \"teams\".",
                "invalid reference to teams",
            ),
            (
                r#"ERROR: new row for relation "items" violates check constraint "positive_qty""#,
                "invalid value: positive_qty constraint failed",
            ),
            (
                "SQLSTATE[23000]: Integrity constraint violation: 1048 Column 'name' cannot be null",
                "name is required and cannot be empty",
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(describe(&RowError::Message(raw.to_string())), expected, "{raw}");
        }
    }

    #[test]
    fn test_raw_engine_text_is_replaced() {
        let raw = format!(
            "SQLSTATE[HY000]: General error: 1 near \"VALUES\": syntax error (SQL: insert into users {})",
            "x".repeat(300)
        );
        assert_eq!(describe(&RowError::Message(raw)), GENERIC_ROW_FAILURE);

        let short = "SQLSTATE[42S02]: Base table or view not found";
        assert_eq!(
            describe(&RowError::Message(short.to_string())),
            GENERIC_ROW_FAILURE
        );
    }

    #[test]
    fn test_plain_message_is_kept() {
        assert_eq!(
            describe(&RowError::Message("Team is archived".to_string())),
            "Team is archived"
        );
        assert_eq!(
            describe(&RowError::Message("x".repeat(256))),
            GENERIC_ROW_FAILURE
        );
    }

    #[test]
    fn test_unrecognised_database_error_is_generic() {
        let error = sqlite_error("CREATE TABLE t (a TEXT)", "INSERT INTO missing VALUES (1)");
        assert_eq!(describe(&error), GENERIC_ROW_FAILURE);
    }

    #[test]
    fn test_database_error_conversion() {
        let row_error: RowError = DatabaseError::Migration {
            version: 1,
            reason: "broken".to_string(),
        }
        .into();
        assert!(matches!(row_error, RowError::Message(_)));
    }
}
