//! Activity journal: a dedicated writer thread fed by a bounded channel.
//!
//! The reconciler sends [`JournalEvent`]s through a [`JournalHandle`]. `send()`
//! uses `try_send()`, so a slow disk never stalls fixture application; events
//! that do not fit are counted and reported on the next successful write.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::JournalConfig;
use crate::core::errors::{FxrError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

/// Events emitted by the reconciler.
#[derive(Debug, Clone)]
pub enum JournalEvent {
    EngineStarted {
        version: String,
        config_hash: String,
        fixtures: Vec<String>,
    },
    NodeEntered {
        node: String,
        kind: String,
    },
    NodeExited {
        node: String,
    },
    PlanApplied {
        node: String,
        storage: String,
        allowed: Vec<String>,
        denied: Vec<String>,
        cleared: Vec<String>,
        loaded: Vec<String>,
        statements: usize,
        hooks: usize,
    },
    FixtureApplied {
        node: String,
        fixture: String,
        details: String,
    },
    SetupFailed {
        node: String,
        fixture: String,
        code: String,
        message: String,
    },
    DiffRecorded {
        node: String,
        diff: serde_json::Value,
    },
    /// Sentinel asking the writer thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable handle for sending journal events.
///
/// A disabled handle accepts and discards every event.
#[derive(Clone, Default)]
pub struct JournalHandle {
    tx: Option<Sender<JournalEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for JournalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalHandle")
            .field("enabled", &self.is_enabled())
            .field("dropped_events", &self.dropped_events())
            .finish()
    }
}

impl JournalHandle {
    /// A handle that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Send an event to the writer thread. Non-blocking.
    pub fn send(&self, event: JournalEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the writer thread to flush and stop.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(JournalEvent::Shutdown);
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Start the writer thread when the journal is enabled.
///
/// Returns a disabled handle and no thread when `config.enabled` is false.
pub fn spawn_journal(
    config: &JournalConfig,
) -> Result<(JournalHandle, Option<thread::JoinHandle<()>>)> {
    if !config.enabled {
        return Ok((JournalHandle::disabled(), None));
    }

    let (tx, rx) = bounded::<JournalEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);
    let jsonl_config = JsonlConfig::from(config);

    let join = thread::Builder::new()
        .name("fxr-journal".to_string())
        .spawn(move || writer_thread_main(rx, jsonl_config, dropped_clone))
        .map_err(|e| FxrError::Runtime {
            details: format!("failed to spawn journal thread: {e}"),
        })?;

    Ok((
        JournalHandle {
            tx: Some(tx),
            dropped_events: dropped,
        },
        Some(join),
    ))
}

// ──────────────────── writer thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn writer_thread_main(rx: Receiver<JournalEvent>, config: JsonlConfig, dropped: Arc<AtomicU64>) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} journal events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        let last = matches!(event, JournalEvent::Shutdown);
        jsonl.write_entry(&event_to_log_entry(event));
        if last {
            break;
        }
    }

    jsonl.sync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: JournalEvent) -> LogEntry {
    match event {
        JournalEvent::EngineStarted {
            version,
            config_hash,
            fixtures,
        } => {
            let mut e = LogEntry::new(EventType::EngineStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} fixtures={}",
                fixtures.join(",")
            ));
            e.ok = Some(true);
            e
        }
        JournalEvent::NodeEntered { node, kind } => {
            let mut e = LogEntry::new(EventType::NodeEnter, Severity::Info);
            e.node = Some(node);
            e.details = Some(kind);
            e
        }
        JournalEvent::NodeExited { node } => {
            let mut e = LogEntry::new(EventType::NodeExit, Severity::Info);
            e.node = Some(node);
            e
        }
        JournalEvent::PlanApplied {
            node,
            storage,
            allowed,
            denied,
            cleared,
            loaded,
            statements,
            hooks,
        } => {
            let mut e = LogEntry::new(EventType::PlanApply, Severity::Info);
            e.node = Some(node);
            e.fixture = Some("tables".to_string());
            e.storage = Some(storage);
            let mut touched: Vec<String> = allowed
                .iter()
                .chain(&denied)
                .chain(&cleared)
                .chain(&loaded)
                .cloned()
                .collect();
            touched.sort();
            touched.dedup();
            if !touched.is_empty() {
                e.tables = Some(touched.join(","));
            }
            e.details = Some(format!(
                "allow=[{}] deny=[{}] clear=[{}] load=[{}]",
                allowed.join(","),
                denied.join(","),
                cleared.join(","),
                loaded.join(",")
            ));
            e.statements = Some(statements);
            e.hooks = Some(hooks);
            e.ok = Some(true);
            e
        }
        JournalEvent::FixtureApplied {
            node,
            fixture,
            details,
        } => {
            let mut e = LogEntry::new(EventType::FixtureApply, Severity::Info);
            e.node = Some(node);
            e.fixture = Some(fixture);
            e.details = Some(details);
            e.ok = Some(true);
            e
        }
        JournalEvent::SetupFailed {
            node,
            fixture,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::SetupFailure, Severity::Critical);
            e.node = Some(node);
            e.fixture = Some(fixture);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e.ok = Some(false);
            e
        }
        JournalEvent::DiffRecorded { node, diff } => {
            let mut e = LogEntry::new(EventType::DiffRecord, Severity::Info);
            e.node = Some(node);
            e.payload = Some(diff);
            e
        }
        JournalEvent::Shutdown => LogEntry::new(EventType::EngineStop, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> JournalConfig {
        JournalConfig {
            enabled: true,
            path: dir.join("journal.jsonl"),
            channel_capacity: 64,
            ..JournalConfig::default()
        }
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_journal(&test_config(dir.path())).unwrap();
        handle.send(JournalEvent::EngineStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc".to_string(),
            fixtures: vec!["tables".to_string()],
        });
        handle.shutdown();
        join.unwrap().join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("journal.jsonl")).unwrap();
        assert!(contents.contains("engine_start"));
        assert!(contents.contains("config_hash=abc"));
    }

    #[test]
    fn plan_and_failure_events_logged() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_journal(&test_config(dir.path())).unwrap();
        handle.send(JournalEvent::PlanApplied {
            node: "suite/case".to_string(),
            storage: "main".to_string(),
            allowed: vec!["orders".to_string()],
            denied: vec![],
            cleared: vec!["orders".to_string()],
            loaded: vec![],
            statements: 2,
            hooks: 1,
        });
        handle.send(JournalEvent::SetupFailed {
            node: "suite/case".to_string(),
            fixture: "tables".to_string(),
            code: "FXR-2002".to_string(),
            message: "unknown table".to_string(),
        });
        let h2 = handle.clone();
        h2.send(JournalEvent::DiffRecorded {
            node: "suite/case".to_string(),
            diff: serde_json::json!({"main": {"orders": {"0": {"id": 1}}}}),
        });
        handle.shutdown();
        join.unwrap().join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("journal.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3]["event"], "engine_stop");
        assert_eq!(lines[0]["event"], "plan_apply");
        assert_eq!(lines[0]["tables"], "orders");
        assert_eq!(lines[0]["statements"], 2);
        assert_eq!(lines[1]["error_code"], "FXR-2002");
        assert_eq!(lines[1]["severity"], "critical");
        assert_eq!(lines[2]["payload"]["main"]["orders"]["0"]["id"], 1);
    }

    #[test]
    fn disabled_journal_spawns_nothing() {
        let (handle, join) = spawn_journal(&JournalConfig::default()).unwrap();
        assert!(join.is_none());
        assert!(!handle.is_enabled());
        handle.send(JournalEvent::NodeExited {
            node: "x".to_string(),
        });
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }
}
