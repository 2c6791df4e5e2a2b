//! CLI commands for keiba.
//!
//! Database setup, data ingestion, historical statistics and bet suggestions.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use keiba_history::betting::{suggest, suggest_trio, SuggestRequest, Suggestion, TrioSuggestion};
use keiba_history::config::AppConfig;
use keiba_history::history::{aggregate_by_popularity, MatchPolicy, PopularityStats, ProfileField};
use keiba_history::ingest::{ingest_path, IngestReport};
use keiba_history::record::ConditionProfile;
use keiba_history::storage::RaceRepository;

#[derive(Parser)]
#[command(name = "keiba")]
#[command(version, about = "Keiba: historical race data and popularity-based bet suggestions", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./config.* when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialise the race database
    InitDb {
        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Load race data files (CSV or text with a structured block)
    Ingest {
        /// File or directory to ingest
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show historical statistics per popularity rank
    Stats {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Profile fields to ignore when matching history
        #[arg(long, value_delimiter = ',')]
        relax: Vec<ProfileField>,

        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Suggest tickets for an upcoming race
    Suggest {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Popularity ranks of the runners in the upcoming race
        #[arg(long, num_args = 1.., required = true)]
        horse_popularities: Vec<u32>,

        /// Total budget in yen
        #[arg(long)]
        budget: Option<u64>,

        /// Number of tickets to buy
        #[arg(long)]
        num_tickets: Option<usize>,

        /// Ticket type
        #[arg(long, value_enum, default_value_t = BetType::Win)]
        bet_type: BetType,

        /// Profile fields to ignore when matching history
        #[arg(long, value_delimiter = ',')]
        relax: Vec<ProfileField>,

        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

/// Condition profile of the target race
#[derive(Args)]
pub struct ProfileArgs {
    #[arg(long)]
    pub racecourse: String,
    /// Distance in meters
    #[arg(long)]
    pub distance: u32,
    #[arg(long)]
    pub track_condition: String,
    #[arg(long)]
    pub num_runners: u32,
    #[arg(long)]
    pub track_direction: String,
    #[arg(long)]
    pub weather: String,
}

impl From<ProfileArgs> for ConditionProfile {
    fn from(args: ProfileArgs) -> Self {
        ConditionProfile {
            racecourse: args.racecourse,
            distance: args.distance,
            track_condition: args.track_condition,
            num_runners: args.num_runners,
            track_direction: args.track_direction,
            weather: args.weather,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BetType {
    /// 単勝: one ticket per popularity rank
    Win,
    /// 三連複: unordered top-three popularity triples
    Trio,
}

fn open_repository(config: &AppConfig, db_path: Option<PathBuf>) -> anyhow::Result<RaceRepository> {
    let path = db_path.unwrap_or_else(|| config.storage.db_path.clone());
    RaceRepository::open(&path)
}

fn match_policy(config: &AppConfig, relax: Vec<ProfileField>) -> MatchPolicy {
    if relax.is_empty() {
        config.history.match_policy()
    } else {
        MatchPolicy::relaxing(relax)
    }
}

/// Create the database schema.
pub fn run_init_db(config_path: Option<&Path>, db_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::load_from(config_path)?;
    let path = db_path.unwrap_or_else(|| config.storage.db_path.clone());
    RaceRepository::open(&path)?;
    println!("Database initialised at {}", path.display());
    Ok(())
}

/// Ingest a file or directory. Returns `false` when any unit failed.
pub fn run_ingest(
    config_path: Option<&Path>,
    path: PathBuf,
    recursive: bool,
    db_path: Option<PathBuf>,
    format: String,
) -> anyhow::Result<bool> {
    let config = AppConfig::load_from(config_path)?;
    let mut repo = open_repository(&config, db_path)?;

    let recursive = recursive || config.ingest.recursive;
    let report = ingest_path(&mut repo, &path, recursive)
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "table" => print_ingest_report(&report),
        _ => {
            eprintln!("Unknown format: {}. Using table.", format);
            print_ingest_report(&report);
        }
    }

    Ok(!report.has_errors())
}

fn print_ingest_report(report: &IngestReport) {
    println!("=== Ingestion Report ===");
    println!("  Files:          {}", report.files_seen);
    println!("  Races written:  {}", report.races_written);
    println!("  Races replaced: {}", report.races_replaced);
    println!("  Skipped:        {}", report.skipped.len());
    println!("  Errors:         {}", report.errors.len());

    if !report.errors.is_empty() {
        println!();
        for error in &report.errors {
            println!("  [{}] {}: {}", error.error.kind(), error.locator, error.error);
        }
    }
}

/// Print per-rank statistics for a profile.
pub fn run_stats(
    config_path: Option<&Path>,
    profile: ProfileArgs,
    relax: Vec<ProfileField>,
    db_path: Option<PathBuf>,
    format: String,
) -> anyhow::Result<()> {
    let config = AppConfig::load_from(config_path)?;
    let repo = open_repository(&config, db_path)?;
    let policy = match_policy(&config, relax);
    let profile = ConditionProfile::from(profile);

    let stats = aggregate_by_popularity(&repo, &profile, &policy, config.history.place_cutoff)?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        _ => print_stats_table(&stats),
    }
    Ok(())
}

fn print_stats_table(stats: &BTreeMap<u32, PopularityStats>) {
    if stats.is_empty() {
        println!("No historical entries match the requested conditions.");
        return;
    }

    println!(
        "  {:>4} {:>8} {:>8} {:>8} {:>10} {:>10}",
        "Pop", "Samples", "Win%", "Place%", "Ret(Win)", "Ret(Place)"
    );
    println!("  {}", "-".repeat(53));
    for (rank, s) in stats {
        println!(
            "  {:>4} {:>8} {:>7.1}% {:>7.1}% {:>10.1} {:>10.1}",
            rank,
            s.sample_size,
            s.win_rate * 100.0,
            s.place_rate * 100.0,
            s.mean_return_win,
            s.mean_return_place
        );
    }
}

/// Suggest tickets for an upcoming race.
#[allow(clippy::too_many_arguments)]
pub fn run_suggest(
    config_path: Option<&Path>,
    profile: ProfileArgs,
    horse_popularities: Vec<u32>,
    budget: Option<u64>,
    num_tickets: Option<usize>,
    bet_type: BetType,
    relax: Vec<ProfileField>,
    db_path: Option<PathBuf>,
    format: String,
) -> anyhow::Result<()> {
    let config = AppConfig::load_from(config_path)?;
    let repo = open_repository(&config, db_path)?;
    let policy = match_policy(&config, relax);

    let request = SuggestRequest {
        profile: profile.into(),
        runner_popularities: horse_popularities,
        budget: budget.unwrap_or(config.betting.default_budget),
        num_tickets: num_tickets.unwrap_or(config.betting.default_num_tickets),
    };

    match bet_type {
        BetType::Win => {
            let suggestion = suggest(
                &repo,
                &request,
                &policy,
                config.history.place_cutoff,
                &config.betting,
            )?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&suggestion)?),
                _ => print_suggestion(&suggestion),
            }
        }
        BetType::Trio => {
            let suggestion = suggest_trio(&repo, &request, &policy, &config.betting)?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&suggestion)?),
                _ => print_trio_suggestion(&suggestion),
            }
        }
    }

    Ok(())
}

fn print_suggestion(suggestion: &Suggestion) {
    println!("=== Win Tickets ===");
    if suggestion.allocations.is_empty() {
        println!("  No popularity rank in this field has historical samples.");
    }
    for (i, a) in suggestion.allocations.iter().enumerate() {
        println!(
            "  {:2}. popularity {:>2}: bet ¥{:>6} -> expected return ¥{:.0} (mean return {:.1}, n={})",
            i + 1,
            a.popularity,
            a.stake,
            a.expected_value,
            a.mean_return_win,
            a.sample_size
        );
    }
    println!();
    println!("  Total expected return: ¥{:.0}", suggestion.total_expected_value);

    if let Some(shortfall) = &suggestion.insufficient_history {
        println!();
        println!("  Note: {}", shortfall);
    }
}

fn print_trio_suggestion(suggestion: &TrioSuggestion) {
    println!("=== Trio Tickets ({} comparable races) ===", suggestion.complete_races);
    for (i, t) in suggestion.tickets.iter().enumerate() {
        println!(
            "  {:2}. {:>8}: bet ¥{:>6} -> expected return ¥{:.0} (hit {:.2}%, payout {:.0})",
            i + 1,
            t.label(),
            t.stake,
            t.expected_return,
            t.hit_rate * 100.0,
            t.estimated_average_payout
        );
    }
    println!();
    println!("  Total expected return: ¥{:.0}", suggestion.total_expected_return);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_suggest() {
        let cli = Cli::try_parse_from([
            "keiba",
            "suggest",
            "--racecourse",
            "中山",
            "--distance",
            "1600",
            "--track-condition",
            "良",
            "--num-runners",
            "16",
            "--track-direction",
            "右",
            "--weather",
            "晴",
            "--horse-popularities",
            "1",
            "2",
            "3",
            "--relax",
            "weather,track_direction",
            "--bet-type",
            "trio",
        ])
        .unwrap();

        match cli.command {
            Commands::Suggest {
                profile,
                horse_popularities,
                bet_type,
                relax,
                budget,
                ..
            } => {
                assert_eq!(profile.distance, 1600);
                assert_eq!(horse_popularities, vec![1, 2, 3]);
                assert_eq!(bet_type, BetType::Trio);
                assert_eq!(relax, vec![ProfileField::Weather, ProfileField::TrackDirection]);
                assert_eq!(budget, None);
            }
            _ => panic!("expected suggest"),
        }
    }
}
