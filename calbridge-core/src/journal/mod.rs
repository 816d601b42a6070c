//! Mutation journal.
//!
//! Two newline-delimited JSON logs in the journal directory: `history.jsonl`
//! (newest entry last) and `redo.jsonl`. Each write rewrites the whole file.
//! Nothing coordinates concurrent processes; the last writer wins.

mod batch;
mod session;

pub use batch::{
    BatchReport, BatchRow, FailurePolicy, ParsedRow, RowOutcome, RowStatus, op_id, parse_rows,
};
pub use session::{MutationReport, Session, UndoReport};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::automation::SeriesRecord;
use crate::error::CalBridgeResult;
use crate::event::{Event, EventUpdatePatch};
use crate::scope::MutationScope;

const HISTORY_FILE: &str = "history.jsonl";
const REDO_FILE: &str = "redo.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            MutationKind::Add => "add",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Batch tags carried by an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryTags {
    pub txn_id: Option<String>,
    pub op_id: Option<String>,
}

/// One applied mutation and the snapshots needed to invert it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<MutationScope>,
    /// The record an add produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<Event>,
    /// The record a delete removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<Event>,
    /// Update: the record before and after.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Event>,
    /// Update: the patch as requested, replayed by redo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<EventUpdatePatch>,
    /// Update and delete: the whole series before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesRecord>,
}

impl HistoryEntry {
    pub fn new(kind: MutationKind, event_id: &str, tags: &EntryTags) -> Self {
        HistoryEntry {
            timestamp: Utc::now(),
            kind,
            txn_id: tags.txn_id.clone(),
            op_id: tags.op_id.clone(),
            event_id: event_id.to_string(),
            scope: None,
            created: None,
            deleted: None,
            prev: None,
            next: None,
            patch: None,
            series: None,
        }
    }

    pub fn tags(&self) -> EntryTags {
        EntryTags {
            txn_id: self.txn_id.clone(),
            op_id: self.op_id.clone(),
        }
    }
}

/// The history and redo logs under one directory.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: &Path) -> Self {
        Journal {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn redo_path(&self) -> PathBuf {
        self.dir.join(REDO_FILE)
    }

    pub fn history(&self) -> CalBridgeResult<Vec<HistoryEntry>> {
        read_log(&self.history_path())
    }

    pub fn redo_entries(&self) -> CalBridgeResult<Vec<HistoryEntry>> {
        read_log(&self.redo_path())
    }

    /// Record a new mutation. Redo is invalidated by new history.
    pub fn append(&self, entry: HistoryEntry) -> CalBridgeResult<()> {
        let mut history = self.history()?;
        history.push(entry);
        write_log(&self.history_path(), &history)?;
        write_log(&self.redo_path(), &[])
    }

    pub(crate) fn write_history(&self, entries: &[HistoryEntry]) -> CalBridgeResult<()> {
        write_log(&self.history_path(), entries)
    }

    pub(crate) fn write_redo(&self, entries: &[HistoryEntry]) -> CalBridgeResult<()> {
        write_log(&self.redo_path(), entries)
    }
}

/// Entries in file order. Lines that do not parse are skipped.
fn read_log(path: &Path) -> CalBridgeResult<Vec<HistoryEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                file = %path.display(),
                line = line_no + 1,
                error = %e,
                "skipping unreadable journal line"
            ),
        }
    }
    Ok(entries)
}

fn write_log(path: &Path, entries: &[HistoryEntry]) -> CalBridgeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
    }
    file.flush()?;
    Ok(())
}
