//! Durable record of completed steps: the sole source of idempotence truth.
//!
//! Records are keyed by step name. A record only counts for a run when its
//! `param_hash` matches the step's current declaration, so a changed step
//! re-runs and its new record replaces the old one.

use crate::step::Outcome;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub step_name: String,
    pub param_hash: String,
    pub completed_at_unix_ms: u64,
    pub outcome: Outcome,
}

impl ExecutionRecord {
    pub fn new(step_name: &str, param_hash: &str, outcome: Outcome) -> Self {
        Self {
            step_name: step_name.to_string(),
            param_hash: param_hash.to_string(),
            completed_at_unix_ms: now_unix_ms(),
            outcome,
        }
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Single-writer store; callers serialise runs.
pub trait StateStore {
    /// The success record for `name` if it was applied with `param_hash`.
    fn get(&self, name: &str, param_hash: &str) -> Result<Option<ExecutionRecord>>;

    /// Inserts or replaces the record for `record.step_name`.
    fn put(&mut self, record: ExecutionRecord) -> Result<()>;

    /// Latest record for `name`, whatever its hash.
    fn latest(&self, name: &str) -> Result<Option<ExecutionRecord>>;

    /// Drops the record for `name`; returns whether one existed.
    fn remove(&mut self, name: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub records: BTreeMap<String, ExecutionRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl StateFile {
    fn get(&self, name: &str, param_hash: &str) -> Option<ExecutionRecord> {
        self.records
            .get(name)
            .filter(|r| r.param_hash == param_hash && r.outcome.is_success())
            .cloned()
    }

    fn insert(&mut self, record: ExecutionRecord) -> Result<()> {
        if !record.outcome.is_success() {
            anyhow::bail!(
                "refusing to record non-success outcome for step {}",
                record.step_name
            );
        }
        self.records.insert(record.step_name.clone(), record);
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    state: StateFile,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, name: &str, param_hash: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.state.get(name, param_hash))
    }

    fn put(&mut self, record: ExecutionRecord) -> Result<()> {
        self.state.insert(record)
    }

    fn latest(&self, name: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.state.records.get(name).cloned())
    }

    fn remove(&mut self, name: &str) -> Result<bool> {
        Ok(self.state.records.remove(name).is_some())
    }
}

/// JSON file store; every write atomically replaces the whole file.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    state: StateFile,
}

impl JsonStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?.unwrap_or_default();
        if state.version != STATE_VERSION {
            anyhow::bail!(
                "Unsupported state file version {} in {}",
                state.version,
                path.display()
            );
        }
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.state.records.values()
    }
}

impl StateStore for JsonStateStore {
    fn get(&self, name: &str, param_hash: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.state.get(name, param_hash))
    }

    fn put(&mut self, record: ExecutionRecord) -> Result<()> {
        let mut next = self.state.clone();
        next.insert(record)?;
        save_state_atomic(&self.path, &next)?;
        self.state = next;
        Ok(())
    }

    fn latest(&self, name: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.state.records.get(name).cloned())
    }

    fn remove(&mut self, name: &str) -> Result<bool> {
        let mut next = self.state.clone();
        if next.records.remove(name).is_none() {
            return Ok(false);
        }
        save_state_atomic(&self.path, &next)?;
        self.state = next;
        Ok(true)
    }
}

pub fn load_state(path: &Path) -> Result<Option<StateFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    let state = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
    Ok(Some(state))
}

pub fn save_state_atomic(path: &Path, state: &StateFile) -> Result<()> {
    write_json_atomic(path, state).context("Failed to save state")
}

/// temp file + fsync + rename + directory fsync.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let tmp_path = temp_path(path);
    let payload = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
    file.write_all(payload.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to atomically replace {}", path.display()))?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all().ok();
        }
    }

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state.json");
    path.with_file_name(format!("{}.tmp", file_name))
}
