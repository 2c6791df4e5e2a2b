//! Configuration for the keiba tool.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::history::{MatchPolicy, ProfileField};

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/keiba.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Descend into subdirectories when ingesting a directory
    #[serde(default)]
    pub recursive: bool,
}

/// Historical matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Finishing positions up to this one pay a place ticket
    #[serde(default = "default_place_cutoff")]
    pub place_cutoff: u32,
    /// Profile fields ignored when matching history
    #[serde(default)]
    pub relax: Vec<ProfileField>,
}

fn default_place_cutoff() -> u32 {
    3
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            place_cutoff: default_place_cutoff(),
            relax: Vec::new(),
        }
    }
}

impl HistoryConfig {
    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy::relaxing(self.relax.iter().copied())
    }
}

/// Betting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingConfig {
    /// Smallest purchasable stake
    #[serde(default = "default_bet_unit")]
    pub bet_unit: u64,
    #[serde(default = "default_budget")]
    pub default_budget: u64,
    #[serde(default = "default_num_tickets")]
    pub default_num_tickets: usize,
}

fn default_bet_unit() -> u64 {
    100
}

fn default_budget() -> u64 {
    10_000
}

fn default_num_tickets() -> usize {
    10
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            bet_unit: default_bet_unit(),
            default_budget: default_budget(),
            default_num_tickets: default_num_tickets(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub betting: BettingConfig,
}

impl AppConfig {
    /// Load configuration from `config.*` in the working directory and the environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, optionally from an explicit file
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            // Override with environment variables (KEIBA_STORAGE__DB_PATH, etc.)
            .add_source(
                config::Environment::with_prefix("KEIBA")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("history.relax")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.storage.db_path, PathBuf::from("data/keiba.db"));
        assert!(!config.ingest.recursive);
        assert_eq!(config.history.place_cutoff, 3);
        assert_eq!(config.betting.bet_unit, 100);
        assert_eq!(config.betting.default_budget, 10_000);
        assert_eq!(config.betting.default_num_tickets, 10);
        assert_eq!(config.history.match_policy(), MatchPolicy::exact());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[storage]
db_path = "/tmp/races.db"

[history]
place_cutoff = 2
relax = ["weather"]

[betting]
bet_unit = 1
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = AppConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/races.db"));
        assert_eq!(config.history.place_cutoff, 2);
        assert!(config.history.match_policy().is_relaxed(ProfileField::Weather));
        assert_eq!(config.betting.bet_unit, 1);
        // Untouched sections keep their defaults
        assert_eq!(config.betting.default_budget, 10_000);
    }

    #[test]
    fn test_relax_from_environment() {
        std::env::set_var("KEIBA_HISTORY__RELAX", "weather,track_direction");
        let loaded = AppConfig::load_from(None);
        std::env::remove_var("KEIBA_HISTORY__RELAX");

        let policy = loaded.unwrap().history.match_policy();
        assert!(policy.is_relaxed(ProfileField::Weather));
        assert!(policy.is_relaxed(ProfileField::TrackDirection));
        assert!(!policy.is_relaxed(ProfileField::Racecourse));
    }
}
