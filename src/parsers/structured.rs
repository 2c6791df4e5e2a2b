//! Structured data blocks embedded in free-form text
//!
//! A text file may carry one JSON document between two marker lines:
//!
//! ```text
//! ### structured-data:start
//! {"races": [{"race_id": "...", ..., "entries": [{...}, ...]}]}
//! ### structured-data:end
//! ```
//!
//! Files without the markers are plain notes and yield no races.

use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::{parse_race_date, ParseError};
use crate::record::{Entry, Race, RaceGroup};

pub const STRUCTURED_BLOCK_START: &str = "### structured-data:start";
pub const STRUCTURED_BLOCK_END: &str = "### structured-data:end";

/// Why a block could not be extracted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockError {
    /// No marker pair; the text is not a race document
    #[error("no structured block found")]
    NotFound,

    #[error(transparent)]
    Malformed(#[from] ParseError),
}

#[derive(Debug, Deserialize)]
struct Document {
    races: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StructuredRace {
    #[serde(deserialize_with = "string_or_number")]
    race_id: String,
    #[serde(deserialize_with = "race_date")]
    date: NaiveDate,
    racecourse: String,
    distance: u32,
    track_condition: String,
    num_runners: u32,
    track_direction: String,
    weather: String,
    entries: Vec<StructuredEntry>,
}

#[derive(Debug, Deserialize)]
struct StructuredEntry {
    horse_number: u32,
    horse_name: String,
    popularity: u32,
    #[serde(default)]
    finish_position: Option<u32>,
    odds_win: f64,
    odds_place: f64,
    return_win: f64,
    return_place: f64,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    let id = match Id::deserialize(deserializer)? {
        Id::Text(s) => s.trim().to_string(),
        Id::Number(n) => n.to_string(),
    };
    if id.is_empty() {
        return Err(D::Error::custom("race_id must not be empty"));
    }
    Ok(id)
}

fn race_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_race_date(&value)
        .ok_or_else(|| D::Error::custom(format!("invalid date {:?}, expected YYYY-MM-DD", value)))
}

impl From<StructuredRace> for RaceGroup {
    fn from(raw: StructuredRace) -> Self {
        let race = Race {
            race_id: raw.race_id,
            date: raw.date,
            racecourse: raw.racecourse.trim().to_string(),
            distance: raw.distance,
            track_condition: raw.track_condition.trim().to_string(),
            num_runners: raw.num_runners,
            track_direction: raw.track_direction.trim().to_string(),
            weather: raw.weather.trim().to_string(),
        };
        let entries = raw
            .entries
            .into_iter()
            .map(|e| Entry {
                horse_number: e.horse_number,
                horse_name: e.horse_name.trim().to_string(),
                popularity: e.popularity,
                finish_position: e.finish_position,
                odds_win: e.odds_win,
                odds_place: e.odds_place,
                return_win: e.return_win,
                return_place: e.return_place,
            })
            .collect();
        RaceGroup::new(race, entries)
    }
}

/// Locate the payload between the first start marker and the first end
/// marker after it.
pub fn extract_block(text: &str) -> Result<&str, BlockError> {
    let start = text
        .find(STRUCTURED_BLOCK_START)
        .ok_or(BlockError::NotFound)?
        + STRUCTURED_BLOCK_START.len();
    let end = text[start..]
        .find(STRUCTURED_BLOCK_END)
        .ok_or(BlockError::NotFound)?
        + start;

    let block = text[start..end].trim();
    if block.is_empty() {
        return Err(ParseError::EmptyBlock.into());
    }
    Ok(block)
}

/// Decode the embedded block into race groups, in document order.
///
/// Text without a block yields no groups. A block that is not a `races`
/// document fails as a whole; a single malformed `races` element only fails
/// its own item.
pub fn parse_structured(text: &str) -> Result<StructuredGroups, ParseError> {
    let block = match extract_block(text) {
        Ok(block) => block,
        Err(BlockError::NotFound) => return Ok(StructuredGroups::empty()),
        Err(BlockError::Malformed(e)) => return Err(e),
    };

    let document: Document =
        serde_json::from_str(block).map_err(|e| ParseError::Payload(e.to_string()))?;

    Ok(StructuredGroups {
        races: document.races.into_iter().enumerate(),
    })
}

/// Iterator returned by [`parse_structured`]
pub struct StructuredGroups {
    races: std::iter::Enumerate<std::vec::IntoIter<serde_json::Value>>,
}

impl StructuredGroups {
    fn empty() -> Self {
        Self {
            races: Vec::new().into_iter().enumerate(),
        }
    }
}

impl Iterator for StructuredGroups {
    type Item = Result<RaceGroup, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, value) = self.races.next()?;
        Some(
            serde_json::from_value::<StructuredRace>(value)
                .map(RaceGroup::from)
                .map_err(|e| ParseError::PayloadRace {
                    index,
                    message: e.to_string(),
                }),
        )
    }
}
