//! Journal line format and the JSONL file writer.
//!
//! One [`LogEntry`] per line, written with a single `write_all`. When a file
//! cannot be opened or written the writer moves down [`Sink`]: primary file,
//! fallback file, stderr (prefixed `[FXR-JSONL]`), then discard. Journaling
//! never fails a test run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::JournalConfig;
use crate::core::errors::{FxrError, Result};

/// Severity level for journal entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Journal event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EngineStart,
    EngineStop,
    NodeEnter,
    NodeExit,
    PlanApply,
    FixtureApply,
    SetupFailure,
    DiffRecord,
    Error,
}

/// A single journal line. Everything except `ts`, `event`, `severity` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Slash-separated path of the test node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Fixture kind name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Tables touched, comma-separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// FXR error code if something failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Structured payload (diffs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            node: None,
            fixture: None,
            storage: None,
            tables: None,
            statements: None,
            hooks: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
            payload: None,
        }
    }
}

/// Where journal lines currently go. Each failure moves one step down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Sink {
    const fn next(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Stderr,
            Self::Stderr | Self::Discard => Self::Discard,
        }
    }
}

/// File locations and rotation limits for the writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    /// Rotated generations kept next to the live file (`.1` is the newest).
    pub max_rotated_files: usize,
}

impl From<&JournalConfig> for JsonlConfig {
    fn from(config: &JournalConfig) -> Self {
        Self {
            path: config.path.clone(),
            fallback_path: config.fallback_path.clone(),
            max_size_bytes: config.max_size_bytes,
            max_rotated_files: config.max_rotated_files,
        }
    }
}

struct OpenFile {
    out: BufWriter<File>,
    path: PathBuf,
    size: u64,
}

/// Append-only JSONL writer with size rotation and a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    file: Option<OpenFile>,
}

impl JsonlWriter {
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Primary,
            file: None,
        };
        writer.settle();
        writer
    }

    /// Serialize one entry and append it as a single line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[FXR-JSONL] unserializable entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.out.flush();
        }
    }

    /// Flush and push the file's data to disk.
    pub fn sync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.out.flush();
            let _ = file.out.get_ref().sync_data();
        }
    }

    pub const fn sink(&self) -> Sink {
        self.sink
    }

    /// Size of the live file, zero when not writing to a file.
    pub fn file_size(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.size)
    }

    // ──────────────────── internals ────────────────────

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self
            .file
            .as_ref()
            .is_some_and(|f| f.size > 0 && f.size + len > self.config.max_size_bytes)
        {
            self.rotate();
        }

        while let Some(file) = self.file.as_mut() {
            if file.out.write_all(line.as_bytes()).is_ok() {
                file.size += len;
                return;
            }
            self.step_down();
        }

        if self.sink == Sink::Stderr && write!(io::stderr(), "[FXR-JSONL] {line}").is_err() {
            self.sink = Sink::Discard;
        }
    }

    /// Open the file behind the current sink, stepping down until one opens
    /// or only stderr/discard remain.
    fn settle(&mut self) {
        loop {
            let target = match self.sink {
                Sink::Primary => Some(self.config.path.clone()),
                Sink::Fallback => self.config.fallback_path.clone(),
                Sink::Stderr | Sink::Discard => return,
            };
            if let Some(path) = target {
                match open_append(&path) {
                    Ok(file) => {
                        if self.sink == Sink::Fallback {
                            let _ = writeln!(
                                io::stderr(),
                                "[FXR-JSONL] journal moved to fallback {}",
                                path.display()
                            );
                        }
                        self.file = Some(file);
                        return;
                    }
                    Err(e) => {
                        let _ = writeln!(io::stderr(), "[FXR-JSONL] {e}");
                    }
                }
            }
            self.sink = self.sink.next();
        }
    }

    fn step_down(&mut self) {
        self.file = None;
        self.sink = self.sink.next();
        self.settle();
    }

    fn rotate(&mut self) {
        let Some(mut file) = self.file.take() else {
            return;
        };
        let _ = file.out.flush();
        let base = file.path;
        drop(file.out);

        let keep = self.config.max_rotated_files;
        if keep == 0 {
            let _ = fs::remove_file(&base);
        } else {
            for generation in (1..keep).rev() {
                let _ = fs::rename(rotated_name(&base, generation), rotated_name(&base, generation + 1));
            }
            let _ = fs::rename(&base, rotated_name(&base, 1));
        }

        match open_append(&base) {
            Ok(reopened) => self.file = Some(reopened),
            Err(_) => self.step_down(),
        }
    }
}

// ──────────────────── helpers ────────────────────

fn open_append(path: &Path) -> Result<OpenFile> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| FxrError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| FxrError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok(OpenFile {
        out: BufWriter::new(file),
        path: path.to_path_buf(),
        size,
    })
}

/// `journal.jsonl` → `journal.jsonl.3`.
fn rotated_name(base: &Path, generation: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
        }
    }

    #[test]
    fn write_entry_produces_valid_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));

        let mut entry = LogEntry::new(EventType::NodeEnter, Severity::Info);
        entry.node = Some("suite/case 1".to_string());
        writer.write_entry(&entry);
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "node_enter");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["node"], "suite/case 1");
    }

    #[test]
    fn rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 100));

        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::PlanApply, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(rotated_name(&path, 3).exists());
        assert!(!rotated_name(&path, 4).exists());
        assert!(writer.file_size() <= 100);
    }

    #[test]
    fn fallback_when_primary_dir_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a dir").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut cfg = config(blocker.join("primary.jsonl"), 1024 * 1024);
        cfg.fallback_path = Some(fallback.clone());
        let mut writer = JsonlWriter::open(cfg);

        assert_eq!(writer.sink(), Sink::Fallback);
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn stderr_when_no_file_can_be_opened() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a dir").unwrap();
        let mut writer = JsonlWriter::open(config(blocker.join("j.jsonl"), 1024));
        assert_eq!(writer.sink(), Sink::Stderr);
        assert_eq!(writer.file_size(), 0);
        writer.write_entry(&LogEntry::new(EventType::NodeExit, Severity::Info));
        assert_eq!(writer.sink(), Sink::Stderr);
    }

    #[test]
    fn optional_fields_omitted_when_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::new(EventType::EngineStart, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"node\""));
        assert!(!line.contains("\"payload\""));
    }

    #[test]
    fn journal_config_converts() {
        let journal = JournalConfig::default();
        let cfg = JsonlConfig::from(&journal);
        assert_eq!(cfg.path, journal.path);
        assert_eq!(cfg.max_rotated_files, 3);
    }
}
