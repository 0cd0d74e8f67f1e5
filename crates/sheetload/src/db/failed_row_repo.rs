//! Failed row repository: rows that could not be imported, kept with
//! their original cell values and a readable reason.

use std::collections::BTreeMap;

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// Original cell values keyed by header, as read from the source.
pub type RowData = BTreeMap<String, Option<String>>;

/// A persisted failed row.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRow {
    pub id: i64,
    pub import_id: i64,
    pub data: RowData,
    pub validation_error: Option<String>,
    pub created_at: String,
}

struct RawFailedRow {
    id: i64,
    import_id: i64,
    data: String,
    validation_error: Option<String>,
    created_at: String,
}

impl RawFailedRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            import_id: row.get("import_id")?,
            data: row.get("data")?,
            validation_error: row.get("validation_error")?,
            created_at: row.get("created_at")?,
        })
    }

    fn decode(self) -> Result<FailedRow, DatabaseError> {
        let data = serde_json::from_str(&self.data).map_err(|e| DatabaseError::Json {
            column: "data",
            source: e,
        })?;
        Ok(FailedRow {
            id: self.id,
            import_id: self.import_id,
            data,
            validation_error: self.validation_error,
            created_at: self.created_at,
        })
    }
}

/// Records a failed row and returns its id.
pub fn insert(
    db: &Database,
    import_id: i64,
    data: &RowData,
    validation_error: Option<&str>,
    now: &str,
) -> Result<i64, DatabaseError> {
    let data_json = serde_json::to_string(data).map_err(|e| DatabaseError::Json {
        column: "data",
        source: e,
    })?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO failed_import_rows (import_id, data, validation_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![import_id, data_json, validation_error, now],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists the failed rows of an import in insertion order.
pub fn list_by_import(db: &Database, import_id: i64) -> Result<Vec<FailedRow>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, import_id, data, validation_error, created_at
             FROM failed_import_rows WHERE import_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![import_id], RawFailedRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    raw.into_iter().map(RawFailedRow::decode).collect()
}

/// Counts the failed rows of an import.
pub fn count_by_import(db: &Database, import_id: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM failed_import_rows WHERE import_id = ?1",
            params![import_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    })
}

/// Deletes every failed row of an import.
pub fn delete_by_import(db: &Database, import_id: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM failed_import_rows WHERE import_id = ?1",
            params![import_id],
        )?;
        Ok(deleted)
    })
}
