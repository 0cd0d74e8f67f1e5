//! Import repository: persistence for the `imports` table.
//!
//! Counters are only ever changed with `col = col + ?` statements so that
//! concurrently finishing chunks never lose each other's updates.

use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A raw import row from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRow {
    pub id: i64,
    pub file_name: String,
    pub file_path: Option<String>,
    pub importer: String,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub imported_rows: i64,
    pub failed_rows: i64,
    pub completed_at: Option<String>,
    pub user_id: Option<String>,
    pub column_map: String,
    pub options: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ImportRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_name: row.get("file_name")?,
            file_path: row.get("file_path")?,
            importer: row.get("importer")?,
            total_rows: row.get("total_rows")?,
            processed_rows: row.get("processed_rows")?,
            imported_rows: row.get("imported_rows")?,
            failed_rows: row.get("failed_rows")?,
            completed_at: row.get("completed_at")?,
            user_id: row.get("user_id")?,
            column_map: row.get("column_map")?,
            options: row.get("options")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields supplied when an import is accepted.
#[derive(Debug, Clone)]
pub struct NewImport {
    pub file_name: String,
    pub file_path: Option<String>,
    pub importer: String,
    pub total_rows: i64,
    pub user_id: Option<String>,
    pub column_map: String,
    pub options: String,
}

/// One of the three running counters on an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Processed,
    Imported,
    Failed,
}

impl Counter {
    pub const ALL: [Counter; 3] = [Counter::Processed, Counter::Imported, Counter::Failed];

    fn column(self) -> &'static str {
        match self {
            Counter::Processed => "processed_rows",
            Counter::Imported => "imported_rows",
            Counter::Failed => "failed_rows",
        }
    }
}

/// Amounts a finished chunk adds to the running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub processed: i64,
    pub imported: i64,
    pub failed: i64,
}

impl CounterDelta {
    pub fn get(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Processed => self.processed,
            Counter::Imported => self.imported,
            Counter::Failed => self.failed,
        }
    }
}

/// Query filter parameters for import listing.
#[derive(Debug, Default, Clone)]
pub struct ImportFilter {
    /// Only imports with `completed_at` set.
    pub completed: bool,
    /// Only imports still running with at least one processed row.
    pub processing: bool,
    /// Only imports where fewer rows were imported than expected.
    pub has_failures: bool,
    pub importer: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new import and returns its id.
pub fn insert(db: &Database, import: &NewImport, now: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO imports (file_name, file_path, importer, total_rows, user_id,
             column_map, options, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                import.file_name,
                import.file_path,
                import.importer,
                import.total_rows,
                import.user_id,
                import.column_map,
                import.options,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds an import by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ImportRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM imports WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ImportRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Applies all three counter deltas in one statement.
pub fn increment_counters(
    db: &Database,
    id: i64,
    delta: CounterDelta,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE imports SET processed_rows = processed_rows + ?2,
             imported_rows = imported_rows + ?3,
             failed_rows = failed_rows + ?4,
             updated_at = ?5
             WHERE id = ?1",
            params![id, delta.processed, delta.imported, delta.failed, now],
        )?;
        Ok(())
    })
}

/// Increments a single counter.
pub fn increment(
    db: &Database,
    id: i64,
    counter: Counter,
    by: i64,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE imports SET {col} = {col} + ?2, updated_at = ?3 WHERE id = ?1",
            col = counter.column()
        );
        conn.execute(&sql, params![id, by, now])?;
        Ok(())
    })
}

/// Stamps `completed_at`. Returns false if the import does not exist.
pub fn mark_completed(db: &Database, id: i64, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE imports SET completed_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Clears counters, completion and previously recorded failed rows.
pub fn reset_for_retry(db: &Database, id: i64, now: &str) -> Result<(), DatabaseError> {
    db.transaction(|tx| -> Result<(), DatabaseError> {
        tx.execute(
            "DELETE FROM failed_import_rows WHERE import_id = ?1",
            params![id],
        )?;
        tx.execute(
            "UPDATE imports SET processed_rows = 0, imported_rows = 0, failed_rows = 0,
             completed_at = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

/// Updates the stored source location.
pub fn update_file_path(
    db: &Database,
    id: i64,
    file_path: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE imports SET file_path = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, file_path, now],
        )?;
        Ok(())
    })
}

/// Queries imports with filters, newest first.
pub fn query(db: &Database, filter: &ImportFilter) -> Result<Vec<ImportRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if filter.completed {
            conditions.push("completed_at IS NOT NULL".to_string());
        }
        if filter.processing {
            conditions.push("completed_at IS NULL AND processed_rows > 0".to_string());
        }
        if filter.has_failures {
            conditions.push("total_rows > imported_rows".to_string());
        }
        if let Some(ref importer) = filter.importer {
            conditions.push(format!("importer = ?{}", param_values.len() + 1));
            param_values.push(Box::new(importer.clone()));
        }
        if let Some(ref user_id) = filter.user_id {
            conditions.push(format!("user_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(user_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let sql = format!(
            "SELECT * FROM imports {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<ImportRow> = stmt
            .query_map(params_ref.as_slice(), ImportRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
}

/// Deletes completed imports whose `completed_at` is before `cutoff`.
/// Failed rows go with them through the cascade.
pub fn delete_completed_before(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM imports WHERE completed_at IS NOT NULL AND completed_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-01-01T00:00:00Z";

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_import(importer: &str, total: i64) -> NewImport {
        NewImport {
            file_name: "users.csv".to_string(),
            file_path: Some("/tmp/import_users.csv".to_string()),
            importer: importer.to_string(),
            total_rows: total,
            user_id: Some("admin".to_string()),
            column_map: r#"{"email":"Email"}"#.to_string(),
            options: "{}".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, &sample_import("users", 3), T0).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.file_name, "users.csv");
        assert_eq!(found.total_rows, 3);
        assert_eq!(found.processed_rows, 0);
        assert_eq!(found.user_id.as_deref(), Some("admin"));
        assert!(found.completed_at.is_none());
        assert_eq!(found.column_map, r#"{"email":"Email"}"#);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 42).unwrap().is_none());
    }

    #[test]
    fn test_increment_counters_accumulates() {
        let db = test_db();
        let id = insert(&db, &sample_import("users", 10), T0).unwrap();

        let delta = CounterDelta {
            processed: 4,
            imported: 3,
            failed: 1,
        };
        increment_counters(&db, id, delta, T0).unwrap();
        increment_counters(&db, id, delta, T0).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.processed_rows, 8);
        assert_eq!(found.imported_rows, 6);
        assert_eq!(found.failed_rows, 2);
    }

    #[test]
    fn test_increment_single_counter() {
        let db = test_db();
        let id = insert(&db, &sample_import("users", 10), T0).unwrap();

        for counter in Counter::ALL {
            increment(&db, id, counter, 2, T0).unwrap();
        }
        increment(&db, id, Counter::Failed, 1, T0).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.processed_rows, 2);
        assert_eq!(found.imported_rows, 2);
        assert_eq!(found.failed_rows, 3);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let db = test_db();
        let id = insert(&db, &sample_import("users", 800), T0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        increment_counters(
                            &db,
                            id,
                            CounterDelta {
                                processed: 1,
                                imported: 1,
                                failed: 0,
                            },
                            T0,
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.processed_rows, 800);
        assert_eq!(found.imported_rows, 800);
    }

    #[test]
    fn test_mark_completed() {
        let db = test_db();
        let id = insert(&db, &sample_import("users", 1), T0).unwrap();

        assert!(mark_completed(&db, id, "2026-01-01T01:00:00Z").unwrap());
        assert!(!mark_completed(&db, id + 1, T0).unwrap());

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.completed_at.as_deref(), Some("2026-01-01T01:00:00Z"));
    }

    #[test]
    fn test_reset_for_retry_clears_state() {
        let db = test_db();
        let id = insert(&db, &sample_import("users", 2), T0).unwrap();
        increment_counters(
            &db,
            id,
            CounterDelta {
                processed: 2,
                imported: 1,
                failed: 1,
            },
            T0,
        )
        .unwrap();
        super::super::failed_row_repo::insert(&db, id, &Default::default(), Some("boom"), T0)
            .unwrap();
        mark_completed(&db, id, T0).unwrap();

        reset_for_retry(&db, id, T0).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.processed_rows, 0);
        assert_eq!(found.imported_rows, 0);
        assert_eq!(found.failed_rows, 0);
        assert!(found.completed_at.is_none());
        assert_eq!(
            super::super::failed_row_repo::count_by_import(&db, id).unwrap(),
            0
        );
    }

    #[test]
    fn test_query_filters() {
        let db = test_db();
        let done = insert(&db, &sample_import("users", 2), T0).unwrap();
        let running = insert(&db, &sample_import("products", 5), T0).unwrap();
        let _pending = insert(&db, &sample_import("users", 5), T0).unwrap();

        increment_counters(
            &db,
            done,
            CounterDelta {
                processed: 2,
                imported: 1,
                failed: 1,
            },
            T0,
        )
        .unwrap();
        mark_completed(&db, done, T0).unwrap();
        increment(&db, running, Counter::Processed, 1, T0).unwrap();

        let all = query(&db, &ImportFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let completed = query(
            &db,
            &ImportFilter {
                completed: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);

        let processing = query(
            &db,
            &ImportFilter {
                processing: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, running);

        let users = query(
            &db,
            &ImportFilter {
                importer: Some("users".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(users.len(), 2);

        let paged = query(
            &db,
            &ImportFilter {
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[test]
    fn test_delete_completed_before() {
        let db = test_db();
        let old = insert(&db, &sample_import("users", 1), T0).unwrap();
        let recent = insert(&db, &sample_import("users", 1), T0).unwrap();
        let open = insert(&db, &sample_import("users", 1), T0).unwrap();

        mark_completed(&db, old, "2026-01-01T00:00:00Z").unwrap();
        mark_completed(&db, recent, "2026-03-01T00:00:00Z").unwrap();

        let deleted = delete_completed_before(&db, "2026-02-01T00:00:00Z").unwrap();
        assert_eq!(deleted, 1);
        assert!(find_by_id(&db, old).unwrap().is_none());
        assert!(find_by_id(&db, recent).unwrap().is_some());
        assert!(find_by_id(&db, open).unwrap().is_some());
    }
}
