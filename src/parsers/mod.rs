//! Input parsers
//!
//! Each parser turns one input shape into canonical [`RaceGroup`]s.
//!
//! [`RaceGroup`]: crate::record::RaceGroup

pub mod structured;
pub mod tabular;

pub use structured::{extract_block, parse_structured, BlockError, STRUCTURED_BLOCK_END, STRUCTURED_BLOCK_START};
pub use tabular::{parse_tabular, read_csv, TabularRow, REQUIRED_COLUMNS};

use chrono::NaiveDate;
use thiserror::Error;

/// Date forms accepted in race data
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Parse a race date written as `YYYY-MM-DD` or `YYYY/MM/DD`
pub(crate) fn parse_race_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Malformed input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("row {row}, column '{column}': {reason} (value: {value:?})")]
    Cell {
        row: usize,
        column: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("failed to read CSV: {0}")]
    Csv(String),

    #[error("structured data block is empty")]
    EmptyBlock,

    #[error("structured payload is malformed: {0}")]
    Payload(String),

    #[error("race #{index} in structured payload is malformed: {message}")]
    PayloadRace { index: usize, message: String },
}
