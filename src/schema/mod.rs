//! Raw session log schema
//!
//! This module defines the textual row format written by the NavCity task
//! logger and the parsing rules that turn it into numeric rows.

pub mod raw_row;

pub use raw_row::{read_raw_rows, ParsedRow, RawRow, REQUIRED_COLUMNS};
