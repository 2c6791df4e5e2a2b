//! Historical aggregates over comparable races.
//!
//! Comparable races are selected by a [`ConditionProfile`] and a
//! [`MatchPolicy`]; their entries are then summarized per popularity rank
//! (single-runner bets) or per unordered top-three popularity triple (trio).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::record::{ConditionProfile, Entry, Race};
use crate::storage::{RaceFilter, RaceRepository};

/// A field of the condition profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Racecourse,
    Distance,
    TrackCondition,
    NumRunners,
    TrackDirection,
    Weather,
}

impl ProfileField {
    pub fn name(&self) -> &'static str {
        match self {
            ProfileField::Racecourse => "racecourse",
            ProfileField::Distance => "distance",
            ProfileField::TrackCondition => "track_condition",
            ProfileField::NumRunners => "num_runners",
            ProfileField::TrackDirection => "track_direction",
            ProfileField::Weather => "weather",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProfileField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "racecourse" => Ok(ProfileField::Racecourse),
            "distance" => Ok(ProfileField::Distance),
            "track_condition" => Ok(ProfileField::TrackCondition),
            "num_runners" => Ok(ProfileField::NumRunners),
            "track_direction" => Ok(ProfileField::TrackDirection),
            "weather" => Ok(ProfileField::Weather),
            other => Err(format!("unknown profile field: {}", other)),
        }
    }
}

/// Which stored races count as comparable history.
///
/// The default matches all six profile fields exactly; relaxed fields are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPolicy {
    relaxed: BTreeSet<ProfileField>,
}

impl MatchPolicy {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn relaxing(fields: impl IntoIterator<Item = ProfileField>) -> Self {
        Self {
            relaxed: fields.into_iter().collect(),
        }
    }

    pub fn is_relaxed(&self, field: ProfileField) -> bool {
        self.relaxed.contains(&field)
    }

    /// Storage filter for `profile` under this policy
    pub fn filter(&self, profile: &ConditionProfile) -> RaceFilter {
        let keep = |field: ProfileField| !self.is_relaxed(field);
        RaceFilter {
            racecourse: keep(ProfileField::Racecourse).then(|| profile.racecourse.clone()),
            distance: keep(ProfileField::Distance).then_some(profile.distance),
            track_condition: keep(ProfileField::TrackCondition)
                .then(|| profile.track_condition.clone()),
            num_runners: keep(ProfileField::NumRunners).then_some(profile.num_runners),
            track_direction: keep(ProfileField::TrackDirection)
                .then(|| profile.track_direction.clone()),
            weather: keep(ProfileField::Weather).then(|| profile.weather.clone()),
        }
    }
}

/// Empirical statistics for one popularity rank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularityStats {
    pub sample_size: usize,
    pub win_rate: f64,
    pub place_rate: f64,
    /// Mean win payout per 100 stake, losers counted as 0
    pub mean_return_win: f64,
    pub mean_return_place: f64,
}

#[derive(Default)]
struct RankAccumulator {
    samples: usize,
    wins: usize,
    places: usize,
    total_return_win: f64,
    total_return_place: f64,
}

/// Summarize entries per popularity rank.
///
/// Unsettled entries (no finish position) count toward `sample_size` and the
/// return means but never as a win or a place. Ranks without samples are
/// absent from the result.
pub fn aggregate_entries<'a>(
    entries: impl IntoIterator<Item = &'a Entry>,
    place_cutoff: u32,
) -> BTreeMap<u32, PopularityStats> {
    let mut ranks: BTreeMap<u32, RankAccumulator> = BTreeMap::new();

    for entry in entries {
        let acc = ranks.entry(entry.popularity).or_default();
        acc.samples += 1;
        if let Some(position) = entry.finish_position {
            if position == 1 {
                acc.wins += 1;
            }
            if position <= place_cutoff {
                acc.places += 1;
            }
        }
        acc.total_return_win += entry.return_win;
        acc.total_return_place += entry.return_place;
    }

    ranks
        .into_iter()
        .map(|(rank, acc)| {
            let n = acc.samples as f64;
            (
                rank,
                PopularityStats {
                    sample_size: acc.samples,
                    win_rate: acc.wins as f64 / n,
                    place_rate: acc.places as f64 / n,
                    mean_return_win: acc.total_return_win / n,
                    mean_return_place: acc.total_return_place / n,
                },
            )
        })
        .collect()
}

/// Per-rank statistics of stored races comparable to `profile`
pub fn aggregate_by_popularity(
    repo: &RaceRepository,
    profile: &ConditionProfile,
    policy: &MatchPolicy,
    place_cutoff: u32,
) -> Result<BTreeMap<u32, PopularityStats>> {
    let rows = repo.query_entries(&policy.filter(profile))?;
    let stats = aggregate_entries(rows.iter().map(|(_, entry)| entry), place_cutoff);

    tracing::debug!(
        "Aggregated {} entries into {} popularity ranks",
        rows.len(),
        stats.len()
    );
    Ok(stats)
}

/// Observed outcomes for one unordered popularity triple
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrioStats {
    pub hits: usize,
    pub total_return: f64,
}

impl TrioStats {
    pub fn mean_return(&self) -> f64 {
        if self.hits > 0 {
            self.total_return / self.hits as f64
        } else {
            0.0
        }
    }
}

/// Top-three outcomes of comparable races
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrioHistory {
    /// Races whose first three finishers are all known
    pub complete_races: usize,
    pub combinations: BTreeMap<[u32; 3], TrioStats>,
}

/// Collect top-three popularity triples per race.
///
/// A race counts only when exactly three entries finished in the top three.
/// The stored data carries no trio payout, so the payout is approximated by
/// the three place returns plus the winner's win return.
pub fn trio_history(rows: &[(Race, Entry)]) -> TrioHistory {
    let mut by_race: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
    for (race, entry) in rows {
        let top = by_race.entry(race.race_id.as_str()).or_default();
        if matches!(entry.finish_position, Some(p) if (1..=3).contains(&p)) {
            top.push(entry);
        }
    }

    let mut history = TrioHistory::default();
    for top in by_race.values() {
        if top.len() != 3 {
            continue;
        }

        let mut combination = [top[0].popularity, top[1].popularity, top[2].popularity];
        combination.sort_unstable();

        let total_return: f64 = top
            .iter()
            .map(|e| {
                let win = if e.finish_position == Some(1) { e.return_win } else { 0.0 };
                e.return_place + win
            })
            .sum();

        let stats = history.combinations.entry(combination).or_default();
        stats.hits += 1;
        stats.total_return += total_return;
        history.complete_races += 1;
    }

    history
}

/// Trio history of stored races comparable to `profile`
pub fn trio_history_for(
    repo: &RaceRepository,
    profile: &ConditionProfile,
    policy: &MatchPolicy,
) -> Result<TrioHistory> {
    let rows = repo.query_entries(&policy.filter(profile))?;
    Ok(trio_history(&rows))
}
