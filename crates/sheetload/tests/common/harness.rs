//! Test harness for isolated import runs.
//!
//! Each `TestHarness` owns a temporary directory with an `input` folder for
//! fixtures and a `staging` folder the engine copies accepted uploads into,
//! plus an in-memory database holding the import tables and a `users` table.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use sheetload::{Database, ImportConfig, ImportEngine};

use super::builders::UsersImporter;

pub const USERS_TABLE: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL
)";

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let staging_dir = temp_dir.path().join("staging");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        create_users_table(&db);

        Self {
            temp_dir,
            input_dir,
            staging_dir,
            db,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Test defaults: two workers, staging inside the temp directory.
    pub fn config(&self) -> ImportConfig {
        ImportConfig {
            worker_count: 2,
            staging_directory: Some(self.staging_dir.clone()),
            ..ImportConfig::default()
        }
    }

    pub fn engine(&self) -> ImportEngine {
        self.engine_with(self.config())
    }

    pub fn engine_with(&self, config: ImportConfig) -> ImportEngine {
        ImportEngine::new(config, self.db.clone())
            .expect("Failed to create engine")
            .with_importer(Arc::new(UsersImporter))
    }

    /// Writes a CSV fixture. The first row is the header.
    pub fn write_csv<R, S>(&self, filename: &str, rows: &[R]) -> PathBuf
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let path = self.input_dir.join(filename);
        let mut writer = csv::Writer::from_path(&path).expect("Failed to create CSV");
        for row in rows {
            writer
                .write_record(row.as_ref().iter().map(|cell| cell.as_ref()))
                .expect("Failed to write CSV row");
        }
        writer.flush().expect("Failed to flush CSV");
        path
    }

    pub fn write_text(&self, filename: &str, content: &str) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Writes an XLSX fixture with one worksheet per `(name, rows)` entry.
    pub fn write_xlsx<R, S>(&self, filename: &str, sheets: &[(&str, &[R])]) -> PathBuf
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let path = self.input_dir.join(filename);
        let mut workbook = rust_xlsxwriter::Workbook::new();
        for (name, rows) in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(*name).expect("Failed to name worksheet");
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.as_ref().iter().enumerate() {
                    let value = value.as_ref();
                    if value.is_empty() {
                        continue;
                    }
                    worksheet
                        .write_string(r as u32, c as u16, value)
                        .expect("Failed to write cell");
                }
            }
        }
        workbook.save(&path).expect("Failed to save workbook");
        path
    }

    /// Writes a single-sheet XLSB fixture.
    pub fn write_xlsb<R, S>(&self, filename: &str, sheet: &str, rows: &[R]) -> PathBuf
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, super::xlsb::xlsb_bytes(sheet, rows))
            .expect("Failed to write workbook");
        path
    }

    /// Files currently in the staging directory.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn user_count(&self) -> i64 {
        user_count(&self.db)
    }

    pub fn user_emails(&self) -> Vec<String> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT email FROM users ORDER BY email")?;
                let emails = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(emails)
            })
            .expect("Failed to list users")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_users_table(db: &Database) {
    db.with_conn(|conn| {
        conn.execute_batch(USERS_TABLE)?;
        Ok(())
    })
    .expect("Failed to create users table");
}

pub fn user_count(db: &Database) -> i64 {
    db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
        .expect("Failed to count users")
}
