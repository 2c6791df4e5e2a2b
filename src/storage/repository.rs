//! SQLite repository for historical race data

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

use super::schema::create_tables;
use crate::record::{Entry, Race, RaceGroup};

/// Result of writing a race group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Optional equality constraints over race fields.
///
/// `None` leaves a field unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaceFilter {
    pub racecourse: Option<String>,
    pub distance: Option<u32>,
    pub track_condition: Option<String>,
    pub num_runners: Option<u32>,
    pub track_direction: Option<String>,
    pub weather: Option<String>,
}

impl RaceFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = vec!["WHERE 1=1".to_string()];
        let mut values = Vec::new();

        let mut add = |column: &str, value: Option<Value>| {
            if let Some(value) = value {
                values.push(value);
                clauses.push(format!("AND r.{} = ?{}", column, values.len()));
            }
        };

        add("racecourse", self.racecourse.clone().map(Value::Text));
        add("distance", self.distance.map(|d| Value::Integer(d.into())));
        add("track_condition", self.track_condition.clone().map(Value::Text));
        add("num_runners", self.num_runners.map(|n| Value::Integer(n.into())));
        add("track_direction", self.track_direction.clone().map(Value::Text));
        add("weather", self.weather.clone().map(Value::Text));

        (clauses.join("\n"), values)
    }
}

const RACE_COLUMNS: &str = "r.race_id, r.race_date, r.racecourse, r.distance, r.track_condition, \
                            r.num_runners, r.track_direction, r.weather";
const ENTRY_COLUMNS: &str = "e.horse_number, e.horse_name, e.popularity, e.finish_position, \
                             e.odds_win, e.odds_place, e.return_win, e.return_place";

fn race_from_row(row: &Row<'_>) -> rusqlite::Result<Race> {
    Ok(Race {
        race_id: row.get(0)?,
        date: row.get(1)?,
        racecourse: row.get(2)?,
        distance: row.get(3)?,
        track_condition: row.get(4)?,
        num_runners: row.get(5)?,
        track_direction: row.get(6)?,
        weather: row.get(7)?,
    })
}

fn entry_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Entry> {
    Ok(Entry {
        horse_number: row.get(offset)?,
        horse_name: row.get(offset + 1)?,
        popularity: row.get(offset + 2)?,
        finish_position: row.get(offset + 3)?,
        odds_win: row.get(offset + 4)?,
        odds_place: row.get(offset + 5)?,
        return_win: row.get(offset + 6)?,
        return_place: row.get(offset + 7)?,
    })
}

/// Repository for historical race data.
///
/// The connection is closed when the repository is dropped.
pub struct RaceRepository {
    conn: Connection,
}

impl RaceRepository {
    /// Open a repository, initializing the database if needed
    pub fn open(db_path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn).context("Failed to create tables")?;

        tracing::debug!("Opened race database at {}", db_path.display());
        Ok(Self { conn })
    }

    /// Create an in-memory repository (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Write Operations ====================

    /// Replace a race and its whole entry set in one transaction.
    ///
    /// Any entries previously stored for the race are removed first, so the
    /// stored roster is exactly `group.entries` afterwards.
    pub fn upsert_race(&mut self, group: &RaceGroup) -> Result<UpsertOutcome> {
        let race = &group.race;
        let tx = self.conn.transaction()?;

        let existed: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM races WHERE race_id = ?1)",
            [&race.race_id],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM race_entries WHERE race_id = ?1", [&race.race_id])?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO races
            (race_id, race_date, racecourse, distance, track_condition,
             num_runners, track_direction, weather)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                race.race_id,
                race.date,
                race.racecourse,
                race.distance,
                race.track_condition,
                race.num_runners,
                race.track_direction,
                race.weather,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO race_entries
                (race_id, horse_number, horse_name, popularity, finish_position,
                 odds_win, odds_place, return_win, return_place)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for entry in &group.entries {
                stmt.execute(params![
                    race.race_id,
                    entry.horse_number,
                    entry.horse_name,
                    entry.popularity,
                    entry.finish_position,
                    entry.odds_win,
                    entry.odds_place,
                    entry.return_win,
                    entry.return_place,
                ])?;
            }
        }

        tx.commit()
            .with_context(|| format!("Failed to commit race {}", race.race_id))?;

        Ok(if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    // ==================== Query Operations ====================

    /// Check if a race exists
    pub fn race_exists(&self, race_id: &str) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM races WHERE race_id = ?1",
            [race_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Load a stored race with its entries ordered by horse number
    pub fn get_race(&self, race_id: &str) -> Result<Option<RaceGroup>> {
        let race = self
            .conn
            .query_row(
                &format!("SELECT {} FROM races r WHERE r.race_id = ?1", RACE_COLUMNS),
                [race_id],
                race_from_row,
            )
            .optional()?;

        let Some(race) = race else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM race_entries e WHERE e.race_id = ?1 ORDER BY e.horse_number",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map([race_id], |row| entry_from_row(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(RaceGroup::new(race, entries)))
    }

    /// All entries of races matching `filter`, each paired with its race
    pub fn query_entries(&self, filter: &RaceFilter) -> Result<Vec<(Race, Entry)>> {
        let (where_clause, values) = filter.where_clause();
        let sql = format!(
            r#"
            SELECT {}, {}
            FROM race_entries e
            JOIN races r ON r.race_id = e.race_id
            {}
            ORDER BY r.race_date, r.race_id, e.popularity
            "#,
            RACE_COLUMNS, ENTRY_COLUMNS, where_clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((race_from_row(row)?, entry_from_row(row, 8)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Get race count
    pub fn race_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM races", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get total entry count
    pub fn entry_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM race_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{sample_entries, sample_race};

    fn sample_group(race_id: &str, num_runners: u32) -> RaceGroup {
        RaceGroup::new(sample_race(race_id, num_runners), sample_entries(num_runners))
    }

    #[test]
    fn test_insert_and_get_race() {
        let mut repo = RaceRepository::in_memory().unwrap();
        let group = sample_group("202401060101", 5);

        let outcome = repo.upsert_race(&group).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert!(repo.race_exists("202401060101").unwrap());

        let stored = repo.get_race("202401060101").unwrap().unwrap();
        assert_eq!(stored, group);
    }

    #[test]
    fn test_get_missing_race() {
        let repo = RaceRepository::in_memory().unwrap();
        assert!(repo.get_race("nope").unwrap().is_none());
    }

    #[test]
    fn test_unsettled_finish_round_trips() {
        let mut repo = RaceRepository::in_memory().unwrap();
        let mut group = sample_group("R1", 3);
        group.entries[2].finish_position = None;
        repo.upsert_race(&group).unwrap();

        let stored = repo.get_race("R1").unwrap().unwrap();
        assert_eq!(stored.entries[2].finish_position, None);
    }

    #[test]
    fn test_upsert_replaces_entry_set() {
        let mut repo = RaceRepository::in_memory().unwrap();
        repo.upsert_race(&sample_group("R1", 5)).unwrap();

        let mut smaller = sample_group("R1", 3);
        smaller.race.weather = "雨".to_string();
        let outcome = repo.upsert_race(&smaller).unwrap();

        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert_eq!(repo.race_count().unwrap(), 1);
        assert_eq!(repo.entry_count().unwrap(), 3);
        assert_eq!(repo.get_race("R1").unwrap().unwrap(), smaller);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut repo = RaceRepository::in_memory().unwrap();
        let group = sample_group("R1", 4);
        repo.upsert_race(&group).unwrap();
        repo.upsert_race(&group).unwrap();

        assert_eq!(repo.race_count().unwrap(), 1);
        assert_eq!(repo.entry_count().unwrap(), 4);
    }

    #[test]
    fn test_failed_upsert_leaves_previous_state() {
        let mut repo = RaceRepository::in_memory().unwrap();
        let original = sample_group("R1", 3);
        repo.upsert_race(&original).unwrap();

        // Duplicate horse numbers violate the unique index mid-transaction
        let mut broken = sample_group("R1", 3);
        broken.entries[2].horse_number = 1;
        assert!(repo.upsert_race(&broken).is_err());

        assert_eq!(repo.get_race("R1").unwrap().unwrap(), original);
    }

    #[test]
    fn test_query_entries_with_filter() {
        let mut repo = RaceRepository::in_memory().unwrap();
        repo.upsert_race(&sample_group("R1", 3)).unwrap();

        let mut other = sample_group("R2", 2);
        other.race.racecourse = "東京".to_string();
        repo.upsert_race(&other).unwrap();

        let all = repo.query_entries(&RaceFilter::default()).unwrap();
        assert_eq!(all.len(), 5);

        let filter = RaceFilter {
            racecourse: Some("東京".to_string()),
            num_runners: Some(2),
            ..Default::default()
        };
        let tokyo = repo.query_entries(&filter).unwrap();
        assert_eq!(tokyo.len(), 2);
        assert!(tokyo.iter().all(|(race, _)| race.race_id == "R2"));
        assert_eq!(tokyo[0].1.popularity, 1);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keiba.db");
        {
            let mut repo = RaceRepository::open(&path).unwrap();
            repo.upsert_race(&sample_group("R1", 2)).unwrap();
        }

        let reopened = RaceRepository::open(&path).unwrap();
        assert_eq!(reopened.race_count().unwrap(), 1);
    }
}
