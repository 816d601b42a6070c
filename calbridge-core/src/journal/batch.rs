//! Newline-delimited JSON batches run under one transaction id.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::session::{MutationReport, Session};
use super::{EntryTags, MutationKind};
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::{EventCreateInput, EventUpdatePatch};
use crate::scope::RecurrenceScope;

/// One batch input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BatchRow {
    Add {
        event: EventCreateInput,
    },
    Update {
        id: String,
        #[serde(default)]
        scope: RecurrenceScope,
        #[serde(default)]
        patch: EventUpdatePatch,
    },
    Delete {
        id: String,
        #[serde(default)]
        scope: RecurrenceScope,
    },
}

impl BatchRow {
    pub fn kind(&self) -> MutationKind {
        match self {
            BatchRow::Add { .. } => MutationKind::Add,
            BatchRow::Update { .. } => MutationKind::Update,
            BatchRow::Delete { .. } => MutationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and move on to the next row.
    #[default]
    ContinueOnError,
    /// Stop at the first failing row.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Applied,
    Previewed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub line: usize,
    pub op_id: String,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub txn_id: String,
    pub preview: bool,
    pub applied: usize,
    pub errors: usize,
    /// Set when a strict batch gave up before the last row.
    pub stopped: bool,
    pub rows: Vec<RowOutcome>,
}

/// Operation id for the row at 1-based `position` among the non-blank
/// rows. `None` marks a row that failed to parse.
pub fn op_id(position: usize, kind: Option<MutationKind>) -> String {
    match kind {
        Some(kind) => format!("op-{position:04}-{kind}"),
        None => format!("op-{position:04}-invalid"),
    }
}

/// A non-blank input line. `position` counts rows, `line` counts physical
/// lines, both from 1.
#[derive(Debug)]
pub struct ParsedRow {
    pub position: usize,
    pub line: usize,
    pub row: CalBridgeResult<BatchRow>,
}

/// Every non-blank line of `text`. A line that does not parse is kept as a
/// validation error instead of aborting the whole input.
pub fn parse_rows(text: &str) -> Vec<ParsedRow> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .enumerate()
        .map(|(index, (line_index, line))| {
            let row = serde_json::from_str::<BatchRow>(line).map_err(|e| {
                CalBridgeError::Validation(format!("line {}: malformed row: {e}", line_index + 1))
            });
            ParsedRow {
                position: index + 1,
                line: line_index + 1,
                row,
            }
        })
        .collect()
}

fn new_txn_id() -> String {
    format!("txn-{}", Uuid::new_v4())
}

impl Session {
    async fn apply_row(&self, row: BatchRow, tags: &EntryTags) -> CalBridgeResult<MutationReport> {
        match row {
            BatchRow::Add { event } => self.add(event, tags).await,
            BatchRow::Update { id, scope, patch } => self.update(&id, scope, patch, tags).await,
            BatchRow::Delete { id, scope } => self.delete(&id, scope, tags).await,
        }
    }

    /// Run every row of `text` in order. Each applied row is journaled on
    /// its own, tagged with the batch's transaction id, so it can be undone
    /// independently.
    pub async fn run_batch(&self, text: &str, policy: FailurePolicy) -> BatchReport {
        let txn_id = new_txn_id();
        let rows = parse_rows(text);
        let total = rows.len();
        let mut report = BatchReport {
            txn_id: txn_id.clone(),
            preview: self.is_preview(),
            applied: 0,
            errors: 0,
            stopped: false,
            rows: Vec::with_capacity(total),
        };

        for ParsedRow {
            position,
            line,
            row: parsed,
        } in rows
        {
            let kind = parsed.as_ref().ok().map(BatchRow::kind);
            let op = op_id(position, kind);
            let tags = EntryTags {
                txn_id: Some(txn_id.clone()),
                op_id: Some(op.clone()),
            };

            let result = match parsed {
                Ok(row) => self.apply_row(row, &tags).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(mutation) => {
                    report.applied += 1;
                    report.rows.push(RowOutcome {
                        line,
                        op_id: op,
                        status: if mutation.preview {
                            RowStatus::Previewed
                        } else {
                            RowStatus::Applied
                        },
                        event_id: Some(mutation.event_id).filter(|id| !id.is_empty()),
                        error_kind: None,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(txn = %txn_id, op = %op, error = %e, "batch row failed");
                    report.errors += 1;
                    report.rows.push(RowOutcome {
                        line,
                        op_id: op,
                        status: RowStatus::Failed,
                        event_id: None,
                        error_kind: Some(e.kind()),
                        error: Some(e.to_string()),
                    });
                    if policy == FailurePolicy::Strict {
                        report.stopped = position < total;
                        break;
                    }
                }
            }
        }

        info!(
            txn = %txn_id,
            applied = report.applied,
            errors = report.errors,
            "batch finished"
        );
        report
    }
}
