//! SQLite schema definitions for historical race data
//!
//! Tables:
//! - races: Race identity and condition profile
//! - race_entries: Runner entries with results and payouts

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    // Core race information
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            race_id TEXT PRIMARY KEY,
            race_date TEXT NOT NULL,
            racecourse TEXT NOT NULL,
            distance INTEGER NOT NULL,
            track_condition TEXT NOT NULL,
            num_runners INTEGER NOT NULL,
            track_direction TEXT NOT NULL,
            weather TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    // Race entries, results and payouts
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS race_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id TEXT NOT NULL REFERENCES races(race_id),
            horse_number INTEGER NOT NULL,
            horse_name TEXT NOT NULL,
            popularity INTEGER NOT NULL,
            finish_position INTEGER,
            odds_win REAL NOT NULL,
            odds_place REAL NOT NULL,
            return_win REAL NOT NULL,
            return_place REAL NOT NULL,
            UNIQUE(race_id, horse_number),
            UNIQUE(race_id, popularity)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_races_profile ON races(racecourse, distance, track_condition, num_runners)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_race_entries_race ON race_entries(race_id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_create_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('races', 'race_entries')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_create_tables_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        // Should not fail on second call
        create_tables(&conn).unwrap();
    }
}
