//! Canonical race and entry records shared by every parser.
//!
//! Both input shapes decode into [`RaceGroup`]s. A group is validated as a
//! whole before it is written, see [`validate`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// One contested race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub race_id: String,
    pub date: NaiveDate,
    pub racecourse: String,
    /// Distance in meters
    pub distance: u32,
    pub track_condition: String,
    pub num_runners: u32,
    pub track_direction: String,
    pub weather: String,
}

impl Race {
    /// Condition profile this race belongs to
    pub fn profile(&self) -> ConditionProfile {
        ConditionProfile {
            racecourse: self.racecourse.clone(),
            distance: self.distance,
            track_condition: self.track_condition.clone(),
            num_runners: self.num_runners,
            track_direction: self.track_direction.clone(),
            weather: self.weather.clone(),
        }
    }
}

/// One runner's participation in a race, with outcome and payouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub horse_number: u32,
    pub horse_name: String,
    /// 1 = most favored
    pub popularity: u32,
    /// `None` while the race is unsettled
    pub finish_position: Option<u32>,
    pub odds_win: f64,
    pub odds_place: f64,
    /// Payout per 100 stake, 0 when the ticket lost
    pub return_win: f64,
    pub return_place: f64,
}

/// A race together with its full roster, the unit of ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct RaceGroup {
    pub race: Race,
    pub entries: Vec<Entry>,
}

impl RaceGroup {
    pub fn new(race: Race, entries: Vec<Entry>) -> Self {
        Self { race, entries }
    }
}

/// Race attributes used to find comparable history
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionProfile {
    pub racecourse: String,
    pub distance: u32,
    pub track_condition: String,
    pub num_runners: u32,
    pub track_direction: String,
    pub weather: String,
}

/// Rule violated by a race group
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("race {race_id}: expected {expected} entries, got {actual}")]
    RunnerCountMismatch {
        race_id: String,
        expected: u32,
        actual: usize,
    },

    #[error("race {race_id}: popularity ranks {found:?} are not a permutation of 1..={num_runners}")]
    PopularityNotPermutation {
        race_id: String,
        num_runners: u32,
        found: Vec<u32>,
    },

    #[error("race {race_id}: horse number {horse_number} appears more than once")]
    DuplicateHorseNumber { race_id: String, horse_number: u32 },

    #[error("race {race_id}: field '{field}' has invalid value {value}")]
    InvalidValue {
        race_id: String,
        field: &'static str,
        value: String,
    },
}

impl ValidationError {
    /// Identifier of the race that failed
    pub fn race_id(&self) -> &str {
        match self {
            ValidationError::RunnerCountMismatch { race_id, .. }
            | ValidationError::PopularityNotPermutation { race_id, .. }
            | ValidationError::DuplicateHorseNumber { race_id, .. }
            | ValidationError::InvalidValue { race_id, .. } => race_id,
        }
    }
}

/// Validate a race group. Stops at the first failing rule.
///
/// Rules, in order:
/// 1. entry count equals `num_runners`
/// 2. popularity values are exactly `1..=num_runners`
/// 3. horse numbers are pairwise distinct
/// 4. numeric fields have valid signs (positive ids, non-negative finite money)
pub fn validate(race: &Race, entries: &[Entry]) -> Result<(), ValidationError> {
    if entries.len() != race.num_runners as usize {
        return Err(ValidationError::RunnerCountMismatch {
            race_id: race.race_id.clone(),
            expected: race.num_runners,
            actual: entries.len(),
        });
    }

    let mut popularities: Vec<u32> = entries.iter().map(|e| e.popularity).collect();
    popularities.sort_unstable();
    if !popularities.iter().copied().eq(1..=race.num_runners) {
        return Err(ValidationError::PopularityNotPermutation {
            race_id: race.race_id.clone(),
            num_runners: race.num_runners,
            found: popularities,
        });
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.horse_number) {
            return Err(ValidationError::DuplicateHorseNumber {
                race_id: race.race_id.clone(),
                horse_number: entry.horse_number,
            });
        }
    }

    check_signs(race, entries)
}

fn check_signs(race: &Race, entries: &[Entry]) -> Result<(), ValidationError> {
    let invalid = |field: &'static str, value: String| ValidationError::InvalidValue {
        race_id: race.race_id.clone(),
        field,
        value,
    };

    if race.distance == 0 {
        return Err(invalid("distance", race.distance.to_string()));
    }
    if race.num_runners == 0 {
        return Err(invalid("num_runners", race.num_runners.to_string()));
    }

    for entry in entries {
        if entry.horse_number == 0 {
            return Err(invalid("horse_number", entry.horse_number.to_string()));
        }
        if entry.finish_position == Some(0) {
            return Err(invalid("finish_position", "0".to_string()));
        }
        let money = [
            ("odds_win", entry.odds_win),
            ("odds_place", entry.odds_place),
            ("return_win", entry.return_win),
            ("return_place", entry.return_place),
        ];
        for (field, value) in money {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, value.to_string()));
            }
        }
    }

    Ok(())
}
