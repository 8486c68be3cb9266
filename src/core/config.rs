//! Configuration system: TOML file + env var overrides + validation.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{FxrError, Result};
use crate::diff::container::{LevelLayout, RenderType};

/// Full reconciler configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub diff: DiffConfig,
    pub reconcile: ReconcileConfig,
    pub sql: SqlConfig,
    pub journal: JournalConfig,
}

/// Per-depth override; unset fields fall through to the next layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LevelOverride {
    pub key_type: Option<RenderType>,
    pub value_type: Option<RenderType>,
    pub sort: Option<bool>,
    pub change_type: Option<bool>,
}

/// Per-storage diff overrides, consulted before the global settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StorageDiffConfig {
    pub key_type: Option<RenderType>,
    pub value_type: Option<RenderType>,
    pub sort: Option<bool>,
    pub change_type: Option<bool>,
    pub levels: Vec<LevelOverride>,
    /// Table → columns removed from this storage's snapshots.
    pub excluded_fields: BTreeMap<String, BTreeSet<String>>,
}

/// Change-set rendering for before/after snapshot diffs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiffConfig {
    pub key_type: RenderType,
    pub value_type: RenderType,
    pub sort: bool,
    pub change_type: bool,
    pub levels: Vec<LevelOverride>,
    pub excluded_fields: BTreeMap<String, BTreeSet<String>>,
    pub storages: BTreeMap<String, StorageDiffConfig>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        let base = LevelLayout::default();
        Self {
            key_type: base.key_type,
            value_type: base.value_type,
            sort: base.sort,
            change_type: base.change_type,
            levels: Vec::new(),
            excluded_fields: BTreeMap::new(),
            storages: BTreeMap::new(),
        }
    }
}

impl DiffConfig {
    /// Effective layout at `level`. Level 0 is the storage map itself, so
    /// storage-specific settings only take effect below it.
    #[must_use]
    pub fn layout(&self, storage: Option<&str>, level: usize) -> LevelLayout {
        let scoped = storage.and_then(|name| self.storages.get(name));
        let scoped_level = scoped.and_then(|s| s.levels.get(level));
        let global_level = self.levels.get(level);

        macro_rules! resolve {
            ($field:ident) => {
                scoped_level
                    .and_then(|l| l.$field)
                    .or_else(|| scoped.and_then(|s| s.$field))
                    .or_else(|| global_level.and_then(|l| l.$field))
                    .unwrap_or(self.$field)
            };
        }

        LevelLayout {
            key_type: resolve!(key_type),
            value_type: resolve!(value_type),
            sort: resolve!(sort),
            change_type: resolve!(change_type),
        }
    }

    /// Global exclusions merged with the storage's own.
    #[must_use]
    pub fn excluded_fields(&self, storage: &str) -> BTreeMap<String, BTreeSet<String>> {
        let mut merged = self.excluded_fields.clone();
        if let Some(scoped) = self.storages.get(storage) {
            for (table, columns) in &scoped.excluded_fields {
                merged
                    .entry(table.clone())
                    .or_default()
                    .extend(columns.iter().cloned());
            }
        }
        merged
    }

    fn deepest_level(&self) -> usize {
        self.storages
            .values()
            .map(|s| s.levels.len())
            .chain(std::iter::once(self.levels.len()))
            .max()
            .unwrap_or(0)
    }
}

/// Which tables get marked dirty after a test ran.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirtyPolicy {
    /// Only tables whose snapshot changed during the test.
    #[default]
    Changed,
    /// Every table writable during the test.
    Allowed,
}

impl FromStr for DirtyPolicy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "changed" => Ok(Self::Changed),
            "allowed" => Ok(Self::Allowed),
            other => Err(format!("unknown dirty policy {other:?}")),
        }
    }
}

/// Reconciliation behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReconcileConfig {
    pub mark_dirty: DirtyPolicy,
    /// Re-check dirty tables when moving to a later sibling Part. Off by
    /// default: sibling Parts build on each other's side effects.
    pub check_dirty_on_parts: bool,
}

/// SQL backend guard settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SqlConfig {
    pub guard_table: String,
    pub bypass_table: String,
    pub restart_identity: bool,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            guard_table: "fixture_allowed_tables".to_string(),
            bypass_table: "fixture_guard_bypass".to_string(),
            restart_identity: true,
        }
    }
}

/// Activity journal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: usize,
    pub channel_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("fixture-journal.jsonl"),
            fallback_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Load config from an explicit path (or defaults), then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path).map_err(|source| FxrError::io(path, source))?;
                toml::from_str(&raw)?
            }
            Some(path) => {
                return Err(FxrError::MissingConfig {
                    path: path.to_path_buf(),
                });
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the journal.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // diff
        set_parsed(&mut lookup, "FXR_DIFF_KEY_TYPE", &mut self.diff.key_type, parse_render_type)?;
        set_parsed(&mut lookup, "FXR_DIFF_VALUE_TYPE", &mut self.diff.value_type, parse_render_type)?;
        set_parsed(&mut lookup, "FXR_DIFF_SORT", &mut self.diff.sort, parse_bool)?;
        set_parsed(&mut lookup, "FXR_DIFF_CHANGE_TYPE", &mut self.diff.change_type, parse_bool)?;

        // reconcile
        set_parsed(&mut lookup, "FXR_RECONCILE_MARK_DIRTY", &mut self.reconcile.mark_dirty, |raw| {
            raw.parse::<DirtyPolicy>()
        })?;
        set_parsed(
            &mut lookup,
            "FXR_RECONCILE_CHECK_DIRTY_ON_PARTS",
            &mut self.reconcile.check_dirty_on_parts,
            parse_bool,
        )?;

        // sql
        if let Some(raw) = lookup("FXR_SQL_GUARD_TABLE") {
            self.sql.guard_table = raw.trim().to_string();
        }
        if let Some(raw) = lookup("FXR_SQL_BYPASS_TABLE") {
            self.sql.bypass_table = raw.trim().to_string();
        }
        set_parsed(&mut lookup, "FXR_SQL_RESTART_IDENTITY", &mut self.sql.restart_identity, parse_bool)?;

        // journal
        set_parsed(&mut lookup, "FXR_JOURNAL_ENABLED", &mut self.journal.enabled, parse_bool)?;
        if let Some(raw) = lookup("FXR_JOURNAL_PATH") {
            self.journal.path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("FXR_JOURNAL_FALLBACK_PATH") {
            self.journal.fallback_path = Some(PathBuf::from(raw));
        }
        set_parsed(
            &mut lookup,
            "FXR_JOURNAL_MAX_SIZE_BYTES",
            &mut self.journal.max_size_bytes,
            |raw| raw.parse::<u64>().map_err(|e| e.to_string()),
        )?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let deepest = self.diff.deepest_level();
        for level in 0..=deepest {
            self.diff.layout(None, level).check()?;
            for name in self.diff.storages.keys() {
                self.diff.layout(Some(name), level).check().map_err(|err| {
                    FxrError::InvalidConfig {
                        details: format!("diff.storages.{name}, level {level}: {err}"),
                    }
                })?;
            }
        }

        validate_identifier("sql.guard_table", &self.sql.guard_table)?;
        validate_identifier("sql.bypass_table", &self.sql.bypass_table)?;
        if self.sql.guard_table == self.sql.bypass_table {
            return Err(FxrError::InvalidConfig {
                details: "sql.guard_table and sql.bypass_table must differ".to_string(),
            });
        }

        if self.journal.enabled && self.journal.path.as_os_str().is_empty() {
            return Err(FxrError::InvalidConfig {
                details: "journal.path must be set when the journal is enabled".to_string(),
            });
        }
        if self.journal.max_size_bytes == 0 {
            return Err(FxrError::InvalidConfig {
                details: "journal.max_size_bytes must be > 0".to_string(),
            });
        }
        if self.journal.channel_capacity == 0 {
            return Err(FxrError::InvalidConfig {
                details: "journal.channel_capacity must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_identifier(name: &str, value: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|err| FxrError::Runtime {
        details: format!("identifier pattern failed to compile: {err}"),
    })?;
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(FxrError::InvalidConfig {
            details: format!("{name} must be a plain SQL identifier, got {value:?}"),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T, P>(lookup: &mut F, name: &str, slot: &mut T, parse: P) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    P: FnOnce(&str) -> std::result::Result<T, String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse(raw.trim()).map_err(|error| FxrError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    raw.parse::<bool>().map_err(|e| e.to_string())
}

fn parse_render_type(raw: &str) -> std::result::Result<RenderType, String> {
    match raw.to_ascii_lowercase().as_str() {
        "string" => Ok(RenderType::String),
        "object" => Ok(RenderType::Object),
        other => Err(format!("expected string|object, got {other:?}")),
    }
}
