//! On-disk run state.
//!
//! Three append-only text files and one directory of JSON records make a run
//! resumable:
//!
//! * the progress ledger, one `lat,lng,kind,state,timestamp` line per state change;
//! * the identifier file, one entity id per line;
//! * the audit logs for refinements and near-limit searches;
//! * `detailed_place_data/<id>.json`, written once per entity.
//!
//! Nothing is ever rewritten in place. [`RunState::load`] replays the ledger and the
//! identifier file in full, last state wins.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use ahash::AHashMap;
use chrono::{SecondsFormat, Utc};
use gridsweep_places::LatLng;
use tracing::{debug, warn};

use crate::grid::{PointKey, PointKind, SearchPoint};

mod state;
mod store;

pub use error::{LedgerError, Result};
pub use state::RunState;
pub use store::EntityStore;

mod error {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum LedgerError {
        #[error("IO error on {path}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("Malformed ledger line {line_no}: '{line}' ({reason})")]
        Malformed {
            line_no: usize,
            line: String,
            reason: String,
        },
        #[error("Serialization error: {0}")]
        Serde(#[from] serde_json::Error),
    }

    impl LedgerError {
        pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
            let path = path.into();
            move |source| Self::Io { path, source }
        }
    }

    pub type Result<T> = std::result::Result<T, LedgerError>;
}

/// Processing state of a search point. Absence from the ledger means `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointState {
    #[default]
    Pending,
    Refining,
    Complete,
}

impl PointState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Refining => "refining",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for PointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "refining" => Ok(Self::Refining),
            "complete" => Ok(Self::Complete),
            other => Err(format!("unknown point state '{other}'")),
        }
    }
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub key: PointKey,
    pub state: PointState,
    pub timestamp: String,
}

impl LedgerEntry {
    pub fn now(key: PointKey, state: PointState) -> Self {
        Self {
            key,
            state,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn parse(line_no: usize, line: &str) -> Result<Self> {
        let malformed = |reason: String| LedgerError::Malformed {
            line_no,
            line: line.to_string(),
            reason,
        };

        let fields: Vec<&str> = line.trim().splitn(5, ',').map(str::trim).collect();
        let [lat, lng, kind, state, rest @ ..] = fields.as_slice() else {
            return Err(malformed(format!("expected at least 4 fields, found {}", fields.len())));
        };
        let lat: f64 = lat.parse().map_err(|e| malformed(format!("latitude: {e}")))?;
        let lng: f64 = lng.parse().map_err(|e| malformed(format!("longitude: {e}")))?;
        let kind: PointKind = kind.parse().map_err(malformed)?;
        let state: PointState = state.parse().map_err(malformed)?;

        Ok(Self {
            key: PointKey::new(lat, lng, kind),
            state,
            timestamp: rest.first().map(|t| t.to_string()).unwrap_or_default(),
        })
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.key, self.state, self.timestamp)
    }
}

/// Result of replaying a ledger file.
#[derive(Debug, Default)]
pub struct LedgerReplay {
    pub states: AHashMap<PointKey, PointState>,
    pub lines: usize,
    pub skipped: usize,
}

/// Append-only writer for point state changes. Every line is flushed as written.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    file: File,
}

impl ProgressLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Ok(Self {
            file: open_append(&path)?,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, point: &SearchPoint, state: PointState) -> Result<()> {
        let entry = LedgerEntry::now(point.key(), state);
        debug!(point = %point, state = %state, "Ledger update");
        writeln!(self.file, "{entry}")
            .and_then(|()| self.file.flush())
            .map_err(LedgerError::io(&self.path))
    }

    /// Replay `path` in full, last state per point wins. A missing file is an empty
    /// ledger; unparseable lines (e.g. one cut short by a crash) are skipped.
    pub fn replay(path: impl AsRef<Path>) -> Result<LedgerReplay> {
        let path = path.as_ref();
        let mut replay = LedgerReplay::default();
        let Some(reader) = open_existing(path)? else {
            return Ok(replay);
        };

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(LedgerError::io(path))?;
            if line.trim().is_empty() {
                continue;
            }
            replay.lines += 1;
            match LedgerEntry::parse(idx + 1, &line) {
                Ok(entry) => {
                    replay.states.insert(entry.key, entry.state);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping ledger line");
                    replay.skipped += 1;
                }
            }
        }
        Ok(replay)
    }
}

/// Append-only `lat,lng,result_count,radius` log. The file is created on first use.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, location: LatLng, result_count: usize, radius_m: f64) -> Result<()> {
        let mut file = open_append(&self.path)?;
        writeln!(
            file,
            "{},{},{},{}",
            location.lat, location.lng, result_count, radius_m
        )
        .and_then(|()| file.flush())
        .map_err(LedgerError::io(&self.path))
    }

    /// All recorded lines, oldest first.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        let Some(reader) = open_existing(&self.path)? else {
            return Ok(Vec::new());
        };
        reader
            .lines()
            .filter(|l| l.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .collect::<std::io::Result<_>>()
            .map_err(LedgerError::io(&self.path))
    }
}

pub(crate) fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(LedgerError::io(parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(LedgerError::io(path))
}

pub(crate) fn open_existing(path: &Path) -> Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(BufReader::new(file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LedgerError::io(path)(e)),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_entry_line_format() {
        let entry = LedgerEntry {
            key: SearchPoint::coarse(52.51, 13.35).key(),
            state: PointState::Refining,
            timestamp: "2024-05-01T10:00:00Z".into(),
        };
        let line = entry.to_string();
        assert_eq!(line, "52.51,13.35,standard,refining,2024-05-01T10:00:00Z");
        assert_eq!(LedgerEntry::parse(1, &line).unwrap(), entry);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        for line in [
            "52.51,13.35,standard",
            "abc,13.35,standard,complete,t",
            "52.51,13.35,huge,complete,t",
            "52.51,13.35,mini,done,t",
        ] {
            assert!(
                matches!(
                    LedgerEntry::parse(7, line),
                    Err(LedgerError::Malformed { line_no: 7, .. })
                ),
                "{line}"
            );
        }
        // A missing timestamp is tolerated.
        let entry = LedgerEntry::parse(1, "1.0,2.0,mini,complete").unwrap();
        assert_eq!(entry.state, PointState::Complete);
        assert!(entry.timestamp.is_empty());
    }

    #[test]
    fn test_replay_last_state_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("progress.txt");

        let a = SearchPoint::coarse(52.51, 13.35);
        let b = SearchPoint::fine(52.512, 13.351);
        {
            let mut ledger = ProgressLedger::open(&path).unwrap();
            ledger.record(&a, PointState::Refining).unwrap();
            ledger.record(&b, PointState::Complete).unwrap();
            ledger.record(&a, PointState::Complete).unwrap();
        }
        // Simulate a torn final write.
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"52.52,13.3")
            .unwrap();

        let replay = ProgressLedger::replay(&path).unwrap();
        assert_eq!(replay.lines, 4);
        assert_eq!(replay.skipped, 1);
        assert_eq!(replay.states[&a.key()], PointState::Complete);
        assert_eq!(replay.states[&b.key()], PointState::Complete);
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let replay = ProgressLedger::replay(dir.path().join("absent.txt")).unwrap();
        assert!(replay.states.is_empty());
        assert_eq!(replay.lines, 0);
    }

    #[test]
    fn test_ledger_appends_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.txt");
        let point = SearchPoint::coarse(1.0, 2.0);

        ProgressLedger::open(&path)
            .unwrap()
            .record(&point, PointState::Refining)
            .unwrap();
        ProgressLedger::open(&path)
            .unwrap()
            .record(&point, PointState::Complete)
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().next().unwrap().starts_with("1,2,standard,refining,"));
    }

    #[test]
    fn test_audit_log_is_lazy_and_append_only() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("refinements.txt"));
        assert!(log.read_lines().unwrap().is_empty());
        assert!(!log.path().exists());

        log.record(LatLng::new(52.51, 13.35), 50, 750.0).unwrap();
        log.record(LatLng::new(52.52, 13.36), 60, 750.0).unwrap();
        assert_eq!(
            log.read_lines().unwrap(),
            vec!["52.51,13.35,50,750", "52.52,13.36,60,750"]
        );
    }
}
