//! Ingestion pipeline: files in, validated races committed.
//!
//! The parsing strategy is chosen from the file's declared shape (its
//! extension), never by sniffing content. Every race group is validated and
//! committed on its own; a bad group or a bad file is recorded in the
//! [`IngestReport`] and the run carries on.

use anyhow::{bail, Result};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::parsers::{
    extract_block, parse_structured, parse_tabular, read_csv, BlockError, ParseError,
};
use crate::record::{validate, RaceGroup, ValidationError};
use crate::storage::{RaceRepository, UpsertOutcome};

/// Declared shape of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// One row per runner (`.csv`)
    Tabular,
    /// Free text with an embedded structured block (`.txt`)
    Structured,
}

impl InputShape {
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(InputShape::Tabular),
            "txt" | "text" => Some(InputShape::Structured),
            _ => None,
        }
    }
}

/// Why a unit or race group was not committed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("failed to read file: {0}")]
    Io(String),

    #[error("unsupported file type: {0}")]
    UnsupportedShape(String),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Parse(_) => "parse",
            IngestError::Validation(_) => "validation",
            IngestError::Storage(_) => "storage",
            IngestError::Io(_) => "io",
            IngestError::UnsupportedShape(_) => "unsupported",
        }
    }
}

/// An error tied to where it came from (`path` or `path#race_id`)
#[derive(Debug, Clone, PartialEq)]
pub struct UnitError {
    pub locator: String,
    pub error: IngestError,
}

impl Serialize for UnitError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("UnitError", 3)?;
        s.serialize_field("locator", &self.locator)?;
        s.serialize_field("kind", self.error.kind())?;
        s.serialize_field("message", &self.error.to_string())?;
        s.end()
    }
}

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    /// Races committed, including replacements
    pub races_written: usize,
    /// Races that replaced an already stored race
    pub races_replaced: usize,
    /// Units that carried no race data
    pub skipped: Vec<String>,
    pub errors: Vec<UnitError>,
}

impl IngestReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn record(&mut self, locator: impl Into<String>, error: impl Into<IngestError>) {
        let unit = UnitError {
            locator: locator.into(),
            error: error.into(),
        };
        warn!("{}: {}", unit.locator, unit.error);
        self.errors.push(unit);
    }
}

/// Files found under a directory
#[derive(Debug, Default)]
pub struct Discovery {
    /// Files in path order
    pub files: Vec<PathBuf>,
    /// Subdirectories that could not be listed, with the reason
    pub unreadable: Vec<(PathBuf, String)>,
}

/// List files under `dir` in path order, descending into subdirectories
/// only when `recursive` is set.
///
/// Failing to list `dir` itself is an error; an unreadable subdirectory is
/// noted in [`Discovery::unreadable`] and traversal carries on.
pub fn discover_files(dir: &Path, recursive: bool) -> std::io::Result<Discovery> {
    let mut discovery = Discovery::default();
    walk(dir, recursive, &mut discovery)?;
    Ok(discovery)
}

fn walk(dir: &Path, recursive: bool, discovery: &mut Discovery) -> std::io::Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            if !recursive {
                continue;
            }
            if let Err(e) = walk(&path, true, discovery) {
                discovery.unreadable.push((path, e.to_string()));
            }
        } else if path.is_file() {
            discovery.files.push(path);
        }
    }
    Ok(())
}

/// Ingest a file or a directory of files.
///
/// A directory is traversed (flat or recursive) and files of unknown shape
/// are skipped. A single file of unknown shape is reported as an error.
pub fn ingest_path(repo: &mut RaceRepository, path: &Path, recursive: bool) -> Result<IngestReport> {
    if path.is_dir() {
        let discovery = discover_files(path, recursive)?;
        info!(
            "Found {} files under {} ({})",
            discovery.files.len(),
            path.display(),
            if recursive { "recursive" } else { "flat" }
        );

        let mut report = IngestReport::default();
        for (dir, reason) in discovery.unreadable {
            report.record(dir.display().to_string(), IngestError::Io(reason));
        }
        ingest_into(repo, discovery.files, &mut report);
        return Ok(report);
    }

    if !path.is_file() {
        bail!("{} does not exist", path.display());
    }

    let mut report = IngestReport {
        files_seen: 1,
        ..Default::default()
    };
    match InputShape::of(path) {
        Some(shape) => ingest_unit(repo, path, shape, &mut report),
        None => report.record(
            path.display().to_string(),
            IngestError::UnsupportedShape(path.display().to_string()),
        ),
    }
    Ok(report)
}

/// Ingest an ordered sequence of files. Later files win on shared race ids.
pub fn ingest_files<I>(repo: &mut RaceRepository, files: I) -> IngestReport
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut report = IngestReport::default();
    ingest_into(repo, files, &mut report);
    report
}

fn ingest_into<I>(repo: &mut RaceRepository, files: I, report: &mut IngestReport)
where
    I: IntoIterator<Item = PathBuf>,
{
    for path in files {
        report.files_seen += 1;
        match InputShape::of(&path) {
            Some(shape) => ingest_unit(repo, &path, shape, report),
            None => {
                debug!("Skipping {} (unknown file type)", path.display());
                report.skipped.push(path.display().to_string());
            }
        }
    }

    info!(
        "Ingestion finished: {} files, {} races written ({} replaced), {} errors",
        report.files_seen,
        report.races_written,
        report.races_replaced,
        report.errors.len()
    );
}

fn ingest_unit(repo: &mut RaceRepository, path: &Path, shape: InputShape, report: &mut IngestReport) {
    let locator = path.display().to_string();
    let before = report.races_written;

    match shape {
        InputShape::Tabular => match read_csv(path) {
            Ok(rows) => commit_groups(repo, &locator, parse_tabular(rows), report),
            Err(e) => report.record(locator.clone(), e),
        },
        InputShape::Structured => {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    report.record(locator, IngestError::Io(e.to_string()));
                    return;
                }
            };
            if let Err(BlockError::NotFound) = extract_block(&text) {
                debug!("{} has no structured block", locator);
                report.skipped.push(locator);
                return;
            }
            match parse_structured(&text) {
                Ok(groups) => commit_groups(repo, &locator, groups, report),
                Err(e) => report.record(locator.clone(), e),
            }
        }
    }

    info!(
        "Ingested {} races from {}",
        report.races_written - before,
        locator
    );
}

fn commit_groups<G>(repo: &mut RaceRepository, locator: &str, groups: G, report: &mut IngestReport)
where
    G: Iterator<Item = std::result::Result<RaceGroup, ParseError>>,
{
    for item in groups {
        let group = match item {
            Ok(group) => group,
            Err(e) => {
                report.record(locator, e);
                continue;
            }
        };

        let group_locator = format!("{}#{}", locator, group.race.race_id);
        if let Err(e) = validate(&group.race, &group.entries) {
            report.record(group_locator, e);
            continue;
        }

        match repo.upsert_race(&group) {
            Ok(outcome) => {
                report.races_written += 1;
                if outcome == UpsertOutcome::Replaced {
                    debug!("Replaced race {}", group.race.race_id);
                    report.races_replaced += 1;
                }
            }
            Err(e) => report.record(group_locator, IngestError::Storage(format!("{:#}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{REQUIRED_COLUMNS, STRUCTURED_BLOCK_END, STRUCTURED_BLOCK_START};
    use std::fs;

    fn csv_line(race_id: &str, horse: u32, popularity: u32, num_runners: u32) -> String {
        let return_win = if popularity == 1 { 250 } else { 0 };
        format!(
            "{},2024-03-02,阪神,1800,良,{},右,晴,{},Horse {},{},{},2.5,1.2,{},110",
            race_id, num_runners, horse, horse, popularity, popularity, return_win
        )
    }

    fn write_csv(path: &Path, lines: &[String]) {
        let mut body = REQUIRED_COLUMNS.join(",");
        for line in lines {
            body.push('\n');
            body.push_str(line);
        }
        body.push('\n');
        fs::write(path, body).unwrap();
    }

    fn three_runner_race(race_id: &str) -> Vec<String> {
        (1..=3).map(|n| csv_line(race_id, n, n, 3)).collect()
    }

    fn structured_text(race_id: &str, num_runners: u32) -> String {
        let entries: Vec<String> = (1..=num_runners)
            .map(|n| {
                format!(
                    r#"{{"horse_number": {n}, "horse_name": "Runner {n}", "popularity": {n},
                        "finish_position": {n}, "odds_win": 3.0, "odds_place": 1.2,
                        "return_win": {w}, "return_place": 120}}"#,
                    n = n,
                    w = if n == 1 { 300 } else { 0 }
                )
            })
            .collect();
        format!(
            "Paddock notes\n{}\n{{\"races\": [{{\"race_id\": \"{}\", \"date\": \"2024-03-03\", \
             \"racecourse\": \"阪神\", \"distance\": 1800, \"track_condition\": \"良\", \
             \"num_runners\": {}, \"track_direction\": \"右\", \"weather\": \"晴\", \
             \"entries\": [{}]}}]}}\n{}\n",
            STRUCTURED_BLOCK_START,
            race_id,
            num_runners,
            entries.join(","),
            STRUCTURED_BLOCK_END
        )
    }

    #[test]
    fn test_input_shape() {
        assert_eq!(InputShape::of(Path::new("a/b.csv")), Some(InputShape::Tabular));
        assert_eq!(InputShape::of(Path::new("a/b.CSV")), Some(InputShape::Tabular));
        assert_eq!(InputShape::of(Path::new("notes.txt")), Some(InputShape::Structured));
        assert_eq!(InputShape::of(Path::new("data.json")), None);
        assert_eq!(InputShape::of(Path::new("README")), None);
    }

    #[test]
    fn test_tabular_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        write_csv(&path, &three_runner_race("R1"));

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, &path, false).unwrap();
        assert_eq!(report.races_written, 1);
        assert!(!report.has_errors());

        let rows = read_csv(&path).unwrap();
        let expected = parse_tabular(rows).next().unwrap().unwrap();
        assert_eq!(repo.get_race("R1").unwrap().unwrap(), expected);
    }

    #[test]
    fn test_ingesting_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        let mut lines = three_runner_race("R1");
        lines.extend(three_runner_race("R2"));
        write_csv(&path, &lines);

        let mut repo = RaceRepository::in_memory().unwrap();
        ingest_path(&mut repo, &path, false).unwrap();
        let first = (repo.get_race("R1").unwrap(), repo.get_race("R2").unwrap());

        let again = ingest_path(&mut repo, &path, false).unwrap();
        assert_eq!(again.races_replaced, 2);
        assert_eq!(repo.race_count().unwrap(), 2);
        assert_eq!(repo.entry_count().unwrap(), 6);
        assert_eq!((repo.get_race("R1").unwrap(), repo.get_race("R2").unwrap()), first);
    }

    #[test]
    fn test_later_file_replaces_race() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(&dir.path().join("a.csv"), &three_runner_race("R1"));
        fs::write(dir.path().join("b.txt"), structured_text("R1", 2)).unwrap();

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, dir.path(), false).unwrap();

        assert_eq!(report.files_seen, 2);
        assert_eq!(report.races_written, 2);
        assert_eq!(report.races_replaced, 1);

        let stored = repo.get_race("R1").unwrap().unwrap();
        assert_eq!(stored.race.num_runners, 2);
        assert_eq!(stored.entries.len(), 2);
        assert_eq!(stored.entries[0].horse_name, "Runner 1");
        assert_eq!(repo.entry_count().unwrap(), 2);
    }

    #[test]
    fn test_invalid_race_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        let mut lines = vec![
            csv_line("BAD", 1, 1, 3),
            csv_line("BAD", 2, 1, 3),
            csv_line("BAD", 3, 3, 3),
        ];
        lines.extend(three_runner_race("GOOD"));
        write_csv(&path, &lines);

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, &path, false).unwrap();

        assert_eq!(report.races_written, 1);
        assert_eq!(report.errors.len(), 1);
        let error = &report.errors[0];
        assert!(error.locator.ends_with("races.csv#BAD"));
        assert!(matches!(
            error.error,
            IngestError::Validation(ValidationError::PopularityNotPermutation { .. })
        ));
        assert!(!repo.race_exists("BAD").unwrap());
        assert!(repo.race_exists("GOOD").unwrap());
    }

    #[test]
    fn test_runner_count_mismatch_from_structured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.txt");
        let text = structured_text("R9", 3).replace("\"num_runners\": 3", "\"num_runners\": 4");
        fs::write(&path, text).unwrap();

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, &path, false).unwrap();

        assert_eq!(report.races_written, 0);
        assert!(matches!(
            report.errors[0].error,
            IngestError::Validation(ValidationError::RunnerCountMismatch { .. })
        ));
    }

    #[test]
    fn test_text_without_block_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diary.txt");
        fs::write(&path, "Went to the track, lost my ticket.").unwrap();

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, &path, false).unwrap();

        assert!(!report.has_errors());
        assert_eq!(report.races_written, 0);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_unparseable_block_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.txt");
        fs::write(
            &path,
            format!("{}\n{{oops\n{}\n", STRUCTURED_BLOCK_START, STRUCTURED_BLOCK_END),
        )
        .unwrap();

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, &path, false).unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0].error,
            IngestError::Parse(ParseError::Payload(_))
        ));
    }

    #[test]
    fn test_bad_file_does_not_stop_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "race_id,date\nX,2024-01-01\n").unwrap();
        write_csv(&dir.path().join("b.csv"), &three_runner_race("R1"));
        fs::write(dir.path().join("c.json"), "{}").unwrap();

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, dir.path(), false).unwrap();

        assert_eq!(report.files_seen, 3);
        assert_eq!(report.races_written, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0].error,
            IngestError::Parse(ParseError::MissingColumns(_))
        ));
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_recursive_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024").join("spring");
        fs::create_dir_all(&nested).unwrap();
        write_csv(&dir.path().join("top.csv"), &three_runner_race("TOP"));
        write_csv(&nested.join("deep.csv"), &three_runner_race("DEEP"));

        let flat = discover_files(dir.path(), false).unwrap();
        assert_eq!(flat.files.len(), 1);

        let all = discover_files(dir.path(), true).unwrap();
        assert_eq!(all.files.len(), 2);
        assert!(all.unreadable.is_empty());

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, dir.path(), true).unwrap();
        assert_eq!(report.races_written, 2);
        assert!(repo.race_exists("DEEP").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_does_not_stop_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        write_csv(&locked.join("hidden.csv"), &three_runner_race("HIDDEN"));
        write_csv(&dir.path().join("open.csv"), &three_runner_race("OPEN"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can list the directory anyway
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, dir.path(), true);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let report = report.unwrap();
        assert_eq!(report.races_written, 1);
        assert!(repo.race_exists("OPEN").unwrap());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].locator.ends_with("locked"));
        assert!(matches!(report.errors[0].error, IngestError::Io(_)));
    }

    #[test]
    fn test_unsupported_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.xlsx");
        fs::write(&path, "binary").unwrap();

        let mut repo = RaceRepository::in_memory().unwrap();
        let report = ingest_path(&mut repo, &path, false).unwrap();
        assert!(matches!(
            report.errors[0].error,
            IngestError::UnsupportedShape(_)
        ));
    }

    #[test]
    fn test_missing_path() {
        let mut repo = RaceRepository::in_memory().unwrap();
        assert!(ingest_path(&mut repo, Path::new("/definitely/not/here.csv"), false).is_err());
    }

    #[test]
    fn test_report_serializes_error_kind() {
        let mut report = IngestReport::default();
        report.record("a.csv", ParseError::EmptyBlock);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errors"][0]["kind"], "parse");
        assert_eq!(json["errors"][0]["locator"], "a.csv");
    }
}
