//! Betting logic: rank popularity candidates by historical expected value and
//! split a budget across the chosen tickets.
//!
//! Payout figures are per 100 yen stake (Japanese convention), so the
//! expected value of a stake is `stake * mean_return / 100`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::config::BettingConfig;
use crate::history::{
    aggregate_by_popularity, trio_history_for, MatchPolicy, PopularityStats, TrioHistory,
};
use crate::record::ConditionProfile;
use crate::storage::RaceRepository;

/// Suggestion failures
#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no historical races match the requested conditions; ingest more data or relax the profile")]
    NoHistory,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A suggestion request for an upcoming race
#[derive(Debug, Clone)]
pub struct SuggestRequest {
    pub profile: ConditionProfile,
    /// Popularity ranks of the runners actually starting
    pub runner_popularities: Vec<u32>,
    pub budget: u64,
    pub num_tickets: usize,
}

impl SuggestRequest {
    fn check(&self) -> Result<(), SuggestError> {
        if self.budget == 0 {
            return Err(SuggestError::InvalidRequest("budget must be positive".to_string()));
        }
        if self.num_tickets == 0 {
            return Err(SuggestError::InvalidRequest(
                "num_tickets must be positive".to_string(),
            ));
        }
        if self.runner_popularities.is_empty() {
            return Err(SuggestError::InvalidRequest(
                "at least one runner popularity is required".to_string(),
            ));
        }
        if self.runner_popularities.contains(&0) {
            return Err(SuggestError::InvalidRequest(
                "popularity ranks start at 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fewer ranks had history than tickets were requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsufficientHistory {
    pub requested: usize,
    pub available: usize,
}

impl fmt::Display for InsufficientHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "only {} of {} requested tickets have historical samples",
            self.available, self.requested
        )
    }
}

/// Stake placed on one popularity rank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub popularity: u32,
    pub stake: u64,
    pub sample_size: usize,
    pub win_rate: f64,
    pub mean_return_win: f64,
    /// `stake * mean_return_win / 100`
    pub expected_value: f64,
}

/// Ranked single-win portfolio
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub allocations: Vec<Allocation>,
    pub total_expected_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insufficient_history: Option<InsufficientHistory>,
}

/// Split `budget` into `count` stakes of whole `bet_unit`s.
///
/// Stakes differ by at most one unit; leftover units go to the last
/// positions. The sum never exceeds the budget.
pub fn split_budget(budget: u64, count: usize, bet_unit: u64) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }
    let unit = bet_unit.max(1);
    let units = budget / unit;
    let count_u = count as u64;
    let base = units / count_u;
    let extra = (units % count_u) as usize;

    (0..count)
        .map(|i| {
            let bonus = if i >= count - extra { 1 } else { 0 };
            (base + bonus) * unit
        })
        .collect()
}

/// Candidate ranks with history, best first.
///
/// Ordered by `mean_return_win` descending; equal values put the smaller
/// (more favored) popularity first.
pub fn rank_candidates<'a>(
    stats: &'a BTreeMap<u32, PopularityStats>,
    runner_popularities: &[u32],
) -> Vec<(u32, &'a PopularityStats)> {
    let runners: BTreeSet<u32> = runner_popularities.iter().copied().collect();
    let mut candidates: Vec<_> = runners
        .into_iter()
        .filter_map(|rank| stats.get(&rank).map(|s| (rank, s)))
        .collect();

    candidates.sort_by(|a, b| {
        b.1.mean_return_win
            .total_cmp(&a.1.mean_return_win)
            .then(a.0.cmp(&b.0))
    });
    candidates
}

/// Select and fund the best ranks from precomputed statistics
pub fn build_suggestion(
    stats: &BTreeMap<u32, PopularityStats>,
    request: &SuggestRequest,
    bet_unit: u64,
) -> Result<Suggestion, SuggestError> {
    request.check()?;

    let candidates = rank_candidates(stats, &request.runner_popularities);
    let selected: Vec<_> = candidates.into_iter().take(request.num_tickets).collect();
    let stakes = split_budget(request.budget, selected.len(), bet_unit);

    let allocations: Vec<Allocation> = selected
        .into_iter()
        .zip(stakes)
        .map(|((popularity, s), stake)| Allocation {
            popularity,
            stake,
            sample_size: s.sample_size,
            win_rate: s.win_rate,
            mean_return_win: s.mean_return_win,
            expected_value: stake as f64 * s.mean_return_win / 100.0,
        })
        .collect();

    let insufficient_history = (allocations.len() < request.num_tickets).then(|| InsufficientHistory {
        requested: request.num_tickets,
        available: allocations.len(),
    });

    Ok(Suggestion {
        total_expected_value: allocations.iter().map(|a| a.expected_value).sum(),
        allocations,
        insufficient_history,
    })
}

/// Suggest single-win tickets for an upcoming race from stored history
pub fn suggest(
    repo: &RaceRepository,
    request: &SuggestRequest,
    policy: &MatchPolicy,
    place_cutoff: u32,
    config: &BettingConfig,
) -> Result<Suggestion, SuggestError> {
    request.check()?;

    let stats = aggregate_by_popularity(repo, &request.profile, policy, place_cutoff)?;
    let suggestion = build_suggestion(&stats, request, config.bet_unit)?;

    if let Some(shortfall) = &suggestion.insufficient_history {
        tracing::warn!("{}", shortfall);
    }
    tracing::info!(
        "Suggested {} tickets, expected value {:.0}",
        suggestion.allocations.len(),
        suggestion.total_expected_value
    );
    Ok(suggestion)
}

/// One trio (三連複) ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrioTicket {
    pub combination: [u32; 3],
    /// Laplace-smoothed hit rate
    pub hit_rate: f64,
    pub estimated_average_payout: f64,
    pub stake: u64,
    pub expected_return: f64,
}

impl TrioTicket {
    /// Human readable label such as `1-2-4`
    pub fn label(&self) -> String {
        let [a, b, c] = self.combination;
        format!("{}-{}-{}", a, b, c)
    }
}

/// Ranked trio portfolio
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrioSuggestion {
    pub tickets: Vec<TrioTicket>,
    pub total_expected_return: f64,
    pub complete_races: usize,
}

/// Rank every 3-subset of the runners' popularities against trio history.
///
/// Unseen triples borrow the mean payout of the observed ones (100 when
/// nothing was observed) and get the smoothed hit rate
/// `(hits + 1) / (races + candidates)`.
pub fn build_trio_suggestion(
    history: &TrioHistory,
    request: &SuggestRequest,
    bet_unit: u64,
) -> Result<TrioSuggestion, SuggestError> {
    request.check()?;

    let runners: Vec<u32> = request
        .runner_popularities
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if runners.len() < 3 {
        return Err(SuggestError::InvalidRequest(
            "trio suggestions need at least 3 distinct popularities".to_string(),
        ));
    }
    if history.complete_races == 0 {
        return Err(SuggestError::NoHistory);
    }

    let mut candidates = Vec::new();
    for i in 0..runners.len() {
        for j in (i + 1)..runners.len() {
            for k in (j + 1)..runners.len() {
                candidates.push([runners[i], runners[j], runners[k]]);
            }
        }
    }

    let observed: Vec<f64> = history
        .combinations
        .values()
        .filter(|s| s.hits > 0)
        .map(|s| s.mean_return())
        .collect();
    let fallback_payout = if observed.is_empty() {
        100.0
    } else {
        observed.iter().sum::<f64>() / observed.len() as f64
    };

    let denominator = (history.complete_races + candidates.len()) as f64;
    let mut scored: Vec<([u32; 3], f64, f64)> = candidates
        .into_iter()
        .map(|combination| {
            let stats = history.combinations.get(&combination);
            let hits = stats.map(|s| s.hits).unwrap_or(0);
            let hit_rate = (hits as f64 + 1.0) / denominator;
            let payout = match stats {
                Some(s) if s.hits > 0 => s.mean_return(),
                _ => fallback_payout,
            };
            (combination, hit_rate, payout)
        })
        .collect();

    // Expected return per yen staked, best first; ties keep the smaller triple first
    scored.sort_by(|a, b| {
        (b.1 * b.2)
            .total_cmp(&(a.1 * a.2))
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(request.num_tickets);

    let stakes = split_budget(request.budget, scored.len(), bet_unit);
    let tickets: Vec<TrioTicket> = scored
        .into_iter()
        .zip(stakes)
        .map(|((combination, hit_rate, payout), stake)| TrioTicket {
            combination,
            hit_rate,
            estimated_average_payout: payout,
            stake,
            expected_return: stake as f64 * payout / 100.0 * hit_rate,
        })
        .collect();

    Ok(TrioSuggestion {
        total_expected_return: tickets.iter().map(|t| t.expected_return).sum(),
        complete_races: history.complete_races,
        tickets,
    })
}

/// Suggest trio tickets for an upcoming race from stored history
pub fn suggest_trio(
    repo: &RaceRepository,
    request: &SuggestRequest,
    policy: &MatchPolicy,
    config: &BettingConfig,
) -> Result<TrioSuggestion, SuggestError> {
    request.check()?;
    let history = trio_history_for(repo, &request.profile, policy)?;
    build_trio_suggestion(&history, request, config.bet_unit)
}
