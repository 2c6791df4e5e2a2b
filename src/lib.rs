//! Keiba history - historical race data and bet suggestions
//!
//! This library provides:
//! - Parsers for CSV race rows and text files with an embedded structured block
//! - An ingestion pipeline that validates races and replaces them wholesale in SQLite
//! - Per-popularity historical statistics for a race condition profile
//! - Budget-constrained ticket suggestions ranked by historical expected value
//!
//! # Example
//!
//! ```no_run
//! use keiba_history::betting::{suggest, SuggestRequest};
//! use keiba_history::config::AppConfig;
//! use keiba_history::history::MatchPolicy;
//! use keiba_history::ingest::ingest_path;
//! use keiba_history::record::ConditionProfile;
//! use keiba_history::storage::RaceRepository;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let mut repo = RaceRepository::open(&config.storage.db_path)?;
//! let report = ingest_path(&mut repo, Path::new("data/raw"), true)?;
//! println!("{} races written", report.races_written);
//!
//! let request = SuggestRequest {
//!     profile: ConditionProfile {
//!         racecourse: "中山".to_string(),
//!         distance: 1600,
//!         track_condition: "良".to_string(),
//!         num_runners: 16,
//!         track_direction: "右".to_string(),
//!         weather: "晴".to_string(),
//!     },
//!     runner_popularities: (1..=16).collect(),
//!     budget: 10_000,
//!     num_tickets: 3,
//! };
//! let suggestion = suggest(&repo, &request, &MatchPolicy::exact(), 3, &config.betting)?;
//! for a in &suggestion.allocations {
//!     println!("popularity {}: ¥{}", a.popularity, a.stake);
//! }
//! # Ok(())
//! # }
//! ```

pub mod betting;
pub mod config;
pub mod history;
pub mod ingest;
pub mod parsers;
pub mod record;
pub mod storage;

// Re-export commonly used types
pub use betting::{suggest, SuggestRequest, Suggestion};
pub use history::{aggregate_by_popularity, MatchPolicy, PopularityStats};
pub use ingest::{ingest_path, IngestReport};
pub use record::{validate, ConditionProfile, Entry, Race, RaceGroup, ValidationError};
pub use storage::RaceRepository;
