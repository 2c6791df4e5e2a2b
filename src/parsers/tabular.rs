//! Flat-row (CSV) race data
//!
//! Every row carries the race-level fields redundantly plus one runner.
//! Rows are grouped by `race_id` in first-seen order; race-level fields are
//! taken from the first row of each group.

use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use super::{parse_race_date, ParseError};
use crate::record::{Entry, Race, RaceGroup};

/// Columns every tabular file must provide
pub const REQUIRED_COLUMNS: [&str; 16] = [
    "race_id",
    "date",
    "racecourse",
    "distance",
    "track_condition",
    "num_runners",
    "track_direction",
    "weather",
    "horse_number",
    "horse_name",
    "popularity",
    "finish_position",
    "odds_win",
    "odds_place",
    "return_win",
    "return_place",
];

/// One raw record, cell values still untyped
#[derive(Debug, Clone, Default)]
pub struct TabularRow {
    /// 1-based data row number (header excluded)
    pub row: usize,
    values: HashMap<String, String>,
}

impl TabularRow {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            values: HashMap::new(),
        }
    }

    /// Builder-style cell setter
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    /// Trimmed cell value; absent cells read as empty
    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(|v| v.trim()).unwrap_or("")
    }

    fn cell_error(&self, column: &'static str, reason: impl Into<String>) -> ParseError {
        ParseError::Cell {
            row: self.row,
            column,
            value: self.get(column).to_string(),
            reason: reason.into(),
        }
    }

    fn text(&self, column: &'static str) -> String {
        self.get(column).to_string()
    }

    fn required_text(&self, column: &'static str) -> Result<String, ParseError> {
        let value = self.get(column);
        if value.is_empty() {
            return Err(self.cell_error(column, "value is required"));
        }
        Ok(value.to_string())
    }

    fn integer(&self, column: &'static str) -> Result<u32, ParseError> {
        self.get(column)
            .parse::<u32>()
            .map_err(|e| self.cell_error(column, format!("expected a non-negative integer: {}", e)))
    }

    fn optional_integer(&self, column: &'static str) -> Result<Option<u32>, ParseError> {
        if self.get(column).is_empty() {
            return Ok(None);
        }
        self.integer(column).map(Some)
    }

    fn decimal(&self, column: &'static str) -> Result<f64, ParseError> {
        self.get(column)
            .parse::<f64>()
            .map_err(|e| self.cell_error(column, format!("expected a number: {}", e)))
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, ParseError> {
        parse_race_date(self.get(column))
            .ok_or_else(|| self.cell_error(column, "expected a date (YYYY-MM-DD)"))
    }
}

/// Read a CSV file into raw rows.
///
/// All columns are read as strings; typing happens in [`parse_tabular`] so
/// that errors point at the offending row and column.
pub fn read_csv(path: &Path) -> Result<Vec<TabularRow>, ParseError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| ParseError::Csv(e.to_string()))?;

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|name| df.column(name).is_err())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingColumns(missing));
    }

    let columns = REQUIRED_COLUMNS
        .iter()
        .map(|&name| Ok((name, df.column(name)?.str()?)))
        .collect::<PolarsResult<Vec<_>>>()
        .map_err(|e| ParseError::Csv(e.to_string()))?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut row = TabularRow::new(i + 1);
        for (name, values) in &columns {
            if let Some(value) = values.get(i) {
                row.values.insert(name.to_string(), value.to_string());
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Decode rows into race groups.
///
/// Groups come out in first-seen `race_id` order. Grouping happens on the
/// first call to `next`, since a race's rows need not be contiguous. A cell
/// that fails to coerce turns its whole group into an error item; the other
/// groups are unaffected.
pub fn parse_tabular<I>(rows: I) -> TabularGroups<I::IntoIter>
where
    I: IntoIterator<Item = TabularRow>,
{
    TabularGroups {
        rows: Some(rows.into_iter()),
        ready: Vec::new().into_iter(),
    }
}

/// Iterator returned by [`parse_tabular`]
pub struct TabularGroups<I> {
    rows: Option<I>,
    ready: std::vec::IntoIter<Result<RaceGroup, ParseError>>,
}

impl<I> Iterator for TabularGroups<I>
where
    I: Iterator<Item = TabularRow>,
{
    type Item = Result<RaceGroup, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rows) = self.rows.take() {
            self.ready = group_rows(rows).into_iter();
        }
        self.ready.next()
    }
}

enum Pending {
    Building(RaceGroup),
    Failed(ParseError),
}

fn group_rows(rows: impl Iterator<Item = TabularRow>) -> Vec<Result<RaceGroup, ParseError>> {
    let mut order: Vec<Pending> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let race_id = match row.required_text("race_id") {
            Ok(id) => id,
            Err(e) => {
                order.push(Pending::Failed(e));
                continue;
            }
        };

        let entry = parse_entry(&row);

        if let Some(&slot) = index.get(&race_id) {
            let failed = match (&mut order[slot], entry) {
                (Pending::Building(group), Ok(entry)) => {
                    group.entries.push(entry);
                    None
                }
                (Pending::Building(_), Err(e)) => Some(e),
                (Pending::Failed(_), _) => None,
            };
            if let Some(e) = failed {
                order[slot] = Pending::Failed(e);
            }
            continue;
        }

        let pending = match (parse_race(&row, &race_id), entry) {
            (Ok(race), Ok(entry)) => Pending::Building(RaceGroup::new(race, vec![entry])),
            (Err(e), _) | (_, Err(e)) => Pending::Failed(e),
        };
        index.insert(race_id, order.len());
        order.push(pending);
    }

    order
        .into_iter()
        .map(|pending| match pending {
            Pending::Building(group) => Ok(group),
            Pending::Failed(e) => Err(e),
        })
        .collect()
}

fn parse_race(row: &TabularRow, race_id: &str) -> Result<Race, ParseError> {
    Ok(Race {
        race_id: race_id.to_string(),
        date: row.date("date")?,
        racecourse: row.text("racecourse"),
        distance: row.integer("distance")?,
        track_condition: row.text("track_condition"),
        num_runners: row.integer("num_runners")?,
        track_direction: row.text("track_direction"),
        weather: row.text("weather"),
    })
}

fn parse_entry(row: &TabularRow) -> Result<Entry, ParseError> {
    Ok(Entry {
        horse_number: row.integer("horse_number")?,
        horse_name: row.text("horse_name"),
        popularity: row.integer("popularity")?,
        finish_position: row.optional_integer("finish_position")?,
        odds_win: row.decimal("odds_win")?,
        odds_place: row.decimal("odds_place")?,
        return_win: row.decimal("return_win")?,
        return_place: row.decimal("return_place")?,
    })
}
