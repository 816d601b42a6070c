//! Journaled mutations, undo and redo.
//!
//! Updates and deletes record the whole series as it stood before the
//! change. Undo puts that series back and drops whatever record the change
//! split off; redo re-runs the recorded mutation against the current state.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use super::{EntryTags, HistoryEntry, Journal, MutationKind};
use crate::automation::SeriesRecord;
use crate::client::CalendarClient;
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::{Event, EventCreateInput, EventUpdatePatch};
use crate::identity;
use crate::recurrence::RecurrenceRule;
use crate::scope::{MutationScope, RecurrenceScope};

/// Outcome of one add/update/delete.
#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub kind: MutationKind,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<MutationScope>,
    pub preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl MutationReport {
    fn previewed(kind: MutationKind, event_id: &str, scope: Option<MutationScope>) -> Self {
        MutationReport {
            kind,
            event_id: event_id.to_string(),
            scope,
            preview: true,
            event: None,
        }
    }

    fn applied(entry: &HistoryEntry) -> Self {
        let event = match entry.kind {
            MutationKind::Add => entry.created.clone(),
            MutationKind::Update => entry.next.clone(),
            MutationKind::Delete => entry.deleted.clone(),
        };
        MutationReport {
            kind: entry.kind,
            event_id: entry.event_id.clone(),
            scope: entry.scope,
            preview: false,
            event,
        }
    }
}

/// Outcome of an undo or redo.
#[derive(Debug, Clone, Serialize)]
pub struct UndoReport {
    pub action: String,
    pub preview: bool,
    pub entry: HistoryEntry,
}

/// What undoing an entry does to the calendar.
#[derive(Debug, Clone)]
enum Inverse {
    /// Drop the series an add created.
    Remove { id: String },
    /// Put a series back as recorded, first deleting the record the
    /// mutation split off (a detached occurrence or a continuation).
    Restore {
        snapshot: SeriesRecord,
        discard: Option<String>,
    },
}

impl fmt::Display for Inverse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Inverse::Remove { id } => write!(f, "delete {id} (scope series)"),
            Inverse::Restore { snapshot, discard } => {
                write!(f, "restore series {}", snapshot.uid)?;
                if let Some(discard) = discard {
                    write!(f, " after deleting {discard}")?;
                }
                Ok(())
            }
        }
    }
}

fn required<'a, T>(entry: &HistoryEntry, field: &str, value: &'a Option<T>) -> CalBridgeResult<&'a T> {
    value.as_ref().ok_or_else(|| {
        CalBridgeError::Serialization(format!(
            "{} entry for {} has no {field} snapshot",
            entry.kind, entry.event_id
        ))
    })
}

fn inverse_of(entry: &HistoryEntry) -> CalBridgeResult<Inverse> {
    match entry.kind {
        MutationKind::Add => {
            let created = required(entry, "created", &entry.created)?;
            Ok(Inverse::Remove {
                id: created.id.clone(),
            })
        }
        MutationKind::Delete => Ok(Inverse::Restore {
            snapshot: required(entry, "series", &entry.series)?.clone(),
            discard: None,
        }),
        MutationKind::Update => {
            let snapshot = required(entry, "series", &entry.series)?.clone();
            let next = required(entry, "next", &entry.next)?;
            let discard = (next.uid != snapshot.uid).then(|| next.uid.clone());
            Ok(Inverse::Restore { snapshot, discard })
        }
    }
}

fn redo_action(entry: &HistoryEntry) -> CalBridgeResult<String> {
    let scope = entry.scope.unwrap_or(MutationScope::Series);
    Ok(match entry.kind {
        MutationKind::Add => {
            let created = required(entry, "created", &entry.created)?;
            format!(
                "re-create \"{}\" in {} at {}",
                created.title,
                created.calendar_name,
                created.start.to_rfc3339()
            )
        }
        MutationKind::Update => format!("update {} (scope {scope})", entry.event_id),
        MutationKind::Delete => format!("delete {} (scope {scope})", entry.event_id),
    })
}

/// Point every reference to series `from` at `to`.
fn rebind(entry: &mut HistoryEntry, from: &str, to: &str) -> CalBridgeResult<()> {
    let (uid, occurrence) = identity::decode(&entry.event_id);
    if uid == from {
        entry.event_id = identity::encode(to, occurrence)?;
    }
    if let Some(series) = entry.series.as_mut().filter(|s| s.uid == from) {
        series.uid = to.to_string();
    }
    let events = [
        &mut entry.created,
        &mut entry.deleted,
        &mut entry.prev,
        &mut entry.next,
    ];
    for event in events.into_iter().flatten().filter(|e| e.uid == from) {
        event.uid = to.to_string();
        event.id = identity::encode(to, identity::decode(&event.id).1)?;
    }
    Ok(())
}

/// The event a mutation of `id` starts from, cut out of its series.
fn view_of(series: &SeriesRecord, id: &str, resolved: MutationScope) -> CalBridgeResult<Event> {
    let occurrence = identity::decode(id).1;
    if occurrence == 0 || resolved == MutationScope::Series {
        return series.as_series_event();
    }
    series
        .occurrence_at(occurrence)?
        .ok_or_else(|| CalBridgeError::NotFound(format!("no event with id {id}")))
}

/// A command context plus its journal. In preview mode nothing reaches the
/// backend or the journal; inputs are still validated and scopes resolved.
pub struct Session {
    client: CalendarClient,
    journal: Journal,
    preview: bool,
}

impl Session {
    pub fn new(client: CalendarClient, journal: Journal, preview: bool) -> Self {
        Session {
            client,
            journal,
            preview,
        }
    }

    pub fn client(&self) -> &CalendarClient {
        &self.client
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    async fn perform_add(
        &self,
        input: EventCreateInput,
        tags: &EntryTags,
    ) -> CalBridgeResult<HistoryEntry> {
        let created = self.client.add_event(input).await?;
        let mut entry = HistoryEntry::new(MutationKind::Add, &created.id, tags);
        entry.created = Some(created);
        Ok(entry)
    }

    async fn perform_update(
        &self,
        id: &str,
        scope: RecurrenceScope,
        mut patch: EventUpdatePatch,
        tags: &EntryTags,
    ) -> CalBridgeResult<HistoryEntry> {
        let resolved = scope.resolve(identity::decode(id).1)?;
        let series = self.client.series_snapshot(id).await?;
        let prev = view_of(&series, id, resolved)?;
        let next = self.client.update_event(id, scope, patch.clone()).await?;

        // A replay runs against whatever sequence the series has by then.
        patch.expected_sequence = None;
        let mut entry = HistoryEntry::new(MutationKind::Update, id, tags);
        entry.scope = Some(resolved);
        entry.prev = Some(prev);
        entry.next = Some(next);
        entry.patch = Some(patch);
        entry.series = Some(series);
        Ok(entry)
    }

    async fn perform_delete(
        &self,
        id: &str,
        scope: RecurrenceScope,
        tags: &EntryTags,
    ) -> CalBridgeResult<HistoryEntry> {
        let resolved = scope.resolve(identity::decode(id).1)?;
        let series = self.client.series_snapshot(id).await?;
        let deleted = view_of(&series, id, resolved)?;
        self.client.delete_event(id, scope).await?;

        let mut entry = HistoryEntry::new(MutationKind::Delete, id, tags);
        entry.scope = Some(resolved);
        entry.deleted = Some(deleted);
        entry.series = Some(series);
        Ok(entry)
    }

    pub async fn add(
        &self,
        input: EventCreateInput,
        tags: &EntryTags,
    ) -> CalBridgeResult<MutationReport> {
        input.validate()?;
        if self.preview {
            return Ok(MutationReport::previewed(MutationKind::Add, "", None));
        }

        let entry = self.perform_add(input, tags).await?;
        let report = MutationReport::applied(&entry);
        self.journal.append(entry)?;
        Ok(report)
    }

    pub async fn update(
        &self,
        id: &str,
        scope: RecurrenceScope,
        patch: EventUpdatePatch,
        tags: &EntryTags,
    ) -> CalBridgeResult<MutationReport> {
        let resolved = scope.resolve(identity::decode(id).1)?;
        patch.validate()?;
        if self.preview {
            return Ok(MutationReport::previewed(MutationKind::Update, id, Some(resolved)));
        }

        let entry = self.perform_update(id, scope, patch, tags).await?;
        let report = MutationReport::applied(&entry);
        self.journal.append(entry)?;
        Ok(report)
    }

    pub async fn delete(
        &self,
        id: &str,
        scope: RecurrenceScope,
        tags: &EntryTags,
    ) -> CalBridgeResult<MutationReport> {
        let resolved = scope.resolve(identity::decode(id).1)?;
        if self.preview {
            return Ok(MutationReport::previewed(MutationKind::Delete, id, Some(resolved)));
        }

        let entry = self.perform_delete(id, scope, tags).await?;
        let report = MutationReport::applied(&entry);
        self.journal.append(entry)?;
        Ok(report)
    }

    /// Apply `inverse`. Returns the uid the restored series lives under.
    async fn apply_inverse(&self, inverse: Inverse) -> CalBridgeResult<Option<String>> {
        match inverse {
            Inverse::Remove { id } => {
                self.client.delete_event(&id, RecurrenceScope::Series).await?;
                Ok(None)
            }
            Inverse::Restore { snapshot, discard } => {
                if let Some(discard) = discard {
                    match self.client.delete_event(&discard, RecurrenceScope::Series).await {
                        Ok(()) | Err(CalBridgeError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                let restored = self.client.restore_series(snapshot).await?;
                Ok(Some(restored.uid))
            }
        }
    }

    /// Invert the newest history entry and move it to the redo log. A
    /// series that had to be re-created gets a new uid; every journaled
    /// reference to the old one follows it.
    pub async fn undo(&self) -> CalBridgeResult<UndoReport> {
        let mut history = self.journal.history()?;
        let Some(entry) = history.last().cloned() else {
            return Err(CalBridgeError::Validation("undo history is empty".into()));
        };
        let inverse = inverse_of(&entry)?;
        let action = inverse.to_string();
        if self.preview {
            return Ok(UndoReport {
                action,
                preview: true,
                entry,
            });
        }

        let previous_uid = match &inverse {
            Inverse::Restore { snapshot, .. } => Some(snapshot.uid.clone()),
            Inverse::Remove { .. } => None,
        };
        let restored_uid = self.apply_inverse(inverse).await?;

        history.pop();
        let mut redo = self.journal.redo_entries()?;
        redo.push(entry);
        if let (Some(from), Some(to)) = (previous_uid, restored_uid) {
            if from != to {
                debug!(from = %from, to = %to, "undo re-created the series");
                for entry in history.iter_mut().chain(redo.iter_mut()) {
                    rebind(entry, &from, &to)?;
                }
            }
        }
        self.journal.write_history(&history)?;
        self.journal.write_redo(&redo)?;
        info!(action = %action, "undone");

        let rebound = redo.last().cloned().ok_or_else(|| {
            CalBridgeError::Failure("redo log lost the undone entry".into())
        })?;
        Ok(UndoReport {
            action,
            preview: false,
            entry: rebound,
        })
    }

    /// Re-run the newest undone mutation and record it as fresh history.
    /// The rest of the redo log stays available.
    pub async fn redo(&self) -> CalBridgeResult<UndoReport> {
        let mut redo = self.journal.redo_entries()?;
        let Some(entry) = redo.last().cloned() else {
            return Err(CalBridgeError::Validation("redo history is empty".into()));
        };
        let action = redo_action(&entry)?;
        if self.preview {
            return Ok(UndoReport {
                action,
                preview: true,
                entry,
            });
        }

        let tags = entry.tags();
        let fresh = match entry.kind {
            MutationKind::Add => {
                let created = required(&entry, "created", &entry.created)?;
                let mut input = EventCreateInput::from_event(created);
                input.recurrence = created.recurrence.as_deref().and_then(RecurrenceRule::from_rrule);
                self.perform_add(input, &tags).await?
            }
            MutationKind::Update => {
                let patch = required(&entry, "patch", &entry.patch)?.clone();
                let scope = RecurrenceScope::from(entry.scope.unwrap_or(MutationScope::Series));
                self.perform_update(&entry.event_id, scope, patch, &tags).await?
            }
            MutationKind::Delete => {
                let scope = RecurrenceScope::from(entry.scope.unwrap_or(MutationScope::Series));
                self.perform_delete(&entry.event_id, scope, &tags).await?
            }
        };

        redo.pop();
        self.journal.write_redo(&redo)?;
        let mut history = self.journal.history()?;
        history.push(fresh.clone());
        self.journal.write_history(&history)?;
        info!(action = %action, "redone");

        Ok(UndoReport {
            action,
            preview: false,
            entry: fresh,
        })
    }
}
