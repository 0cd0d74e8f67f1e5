//! Shared test utilities for sheetload integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with temp directories and a database
//! - A validating users importer and fixture builders
//! - A small XLSB encoder, since no writer for the format is available

pub mod builders;
pub mod harness;
pub mod xlsb;

pub use builders::*;
pub use harness::TestHarness;
