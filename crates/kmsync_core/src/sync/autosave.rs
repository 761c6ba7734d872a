//! Debounced, race-guarded autosave with a two-phase commit.
//!
//! # Responsibility
//! - Track one draft per open editor: metadata record plus content payload.
//! - Decide when a draft may be committed (debounce + guards) and hand out
//!   [`CommitTicket`]s; fold commit outcomes back into editor state.
//! - Run the commit itself: content store first, registry second.
//!
//! # Invariants
//! - Phase transitions: `Loading → Clean → Dirty → Saving → Clean`, with
//!   `Saving → Dirty` on failure or on a newer edit.
//! - At most one commit is in flight per editor (`busy`).
//! - Nothing fires before hydration completes.
//! - A draft without real content never overwrites stored content that has some.
//! - The registry is only written after the content save of the same attempt
//!   succeeded (or was not needed).
//! - Failed commits are not retried automatically; the next edit or an
//!   explicit flush re-arms the timer.
//!
//! Time is passed in by the caller as Unix epoch milliseconds, so the host
//! event loop owns the clock.

use crate::client::content_client::ContentClient;
use crate::client::registry_client::RegistryClient;
use crate::model::payload::ContentPayload;
use crate::model::record::{EntityRecord, RecordKey};
use crate::store::ContentLocation;
use crate::sync::cascade::{holder_fields, prune_fields, ReferenceEdge};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Externally visible editor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftPhase {
    /// Content hydration has not completed; autosave is held.
    Loading,
    /// Draft matches the last committed state.
    Clean,
    /// Draft has uncommitted edits.
    Dirty,
    /// A commit of the current draft version is in flight.
    Saving,
}

/// Cancellation flag shared between an editor and its in-flight commit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One commit attempt for one draft version.
#[derive(Debug, Clone)]
pub struct CommitTicket {
    pub key: RecordKey,
    /// Draft version this ticket was cut from.
    pub version: u64,
    /// Metadata to upsert in phase two.
    pub record: EntityRecord,
    /// Payload to save in phase one; `None` when the stored payload is current.
    pub payload: Option<ContentPayload>,
    cancel: CancelToken,
}

impl CommitTicket {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Raw result of running a ticket against the backing stores.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Both phases succeeded; carries the record as upserted.
    Committed {
        record: EntityRecord,
        saved: Option<ContentLocation>,
    },
    /// Phase one failed; phase two was skipped.
    ContentFailed,
    /// Phase two failed after phase one succeeded or was skipped.
    RegistryFailed { saved: Option<ContentLocation> },
    /// The ticket was cancelled before or between phases.
    Cancelled { saved: Option<ContentLocation> },
}

impl CommitOutcome {
    fn saved(&self) -> Option<&ContentLocation> {
        match self {
            Self::Committed { saved, .. }
            | Self::RegistryFailed { saved }
            | Self::Cancelled { saved } => saved.as_ref(),
            Self::ContentFailed => None,
        }
    }
}

/// What a completed commit attempt meant for the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitReport {
    /// Draft is durable in both stores; editor is clean.
    Committed(EntityRecord),
    /// Content save failed; editor stays dirty.
    ContentFailed(RecordKey),
    /// Content saved remotely but not indexed; editor stays dirty.
    PartialCommit { key: RecordKey, content_ref: String },
    /// Registry upsert failed with no content save in this attempt.
    RegistryFailed(RecordKey),
    /// A newer edit arrived; the result was discarded.
    Superseded(RecordKey),
    /// The editor was closed while the commit was in flight.
    Closed(RecordKey),
}

/// An open draft whose reference fields lost a deleted record's markers.
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedDraft {
    pub record: EntityRecord,
    /// Draft has uncommitted edits; its next commit carries the prune.
    pub dirty: bool,
}

/// Counters for autosave diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutosaveStats {
    pub commits: u64,
    pub suppressed: u64,
    pub failures: u64,
    pub superseded: u64,
}

#[derive(Debug)]
struct EditorSlot {
    draft: EntityRecord,
    payload: ContentPayload,
    /// Payload the content store durably holds under `draft.content_ref`.
    known_good: Option<ContentPayload>,
    hydrated: bool,
    /// Payload was edited; hydration must not replace it.
    payload_edited: bool,
    dirty: bool,
    busy: bool,
    version: u64,
    due_at_ms: Option<i64>,
    in_flight: Option<(u64, CancelToken)>,
}

impl EditorSlot {
    fn phase(&self) -> DraftPhase {
        if !self.hydrated {
            return DraftPhase::Loading;
        }
        match &self.in_flight {
            Some((version, _)) if *version == self.version => DraftPhase::Saving,
            _ if self.dirty => DraftPhase::Dirty,
            _ => DraftPhase::Clean,
        }
    }

    fn would_destroy_content(&self) -> bool {
        self.known_good
            .as_ref()
            .is_some_and(ContentPayload::has_real_content)
            && !self.payload.has_real_content()
    }

    fn needs_content_save(&self) -> bool {
        match &self.known_good {
            Some(stored) => *stored != self.payload,
            None => self.payload.has_real_content(),
        }
    }
}

/// Per-editor debounce timers and guards.
#[derive(Debug)]
pub struct AutosaveScheduler {
    debounce_ms: i64,
    editors: HashMap<RecordKey, EditorSlot>,
    stats: AutosaveStats,
}

impl AutosaveScheduler {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms: i64::try_from(debounce_ms).unwrap_or(i64::MAX),
            editors: HashMap::new(),
            stats: AutosaveStats::default(),
        }
    }

    /// Registers an editor in `Loading`. Returns `false` if already open.
    pub fn open(&mut self, record: EntityRecord) -> bool {
        let key = record.key();
        if self.editors.contains_key(&key) {
            return false;
        }
        self.editors.insert(
            key,
            EditorSlot {
                draft: record,
                payload: ContentPayload::empty(),
                known_good: None,
                hydrated: false,
                payload_edited: false,
                dirty: false,
                busy: false,
                version: 0,
                due_at_ms: None,
                in_flight: None,
            },
        );
        true
    }

    /// Completes hydration with the stored payload (`None`: nothing stored).
    ///
    /// A payload typed while loading is kept as the draft; otherwise the
    /// stored payload becomes the draft.
    pub fn hydrate(&mut self, key: &RecordKey, stored: Option<ContentPayload>) -> bool {
        let Some(slot) = self.editors.get_mut(key) else {
            return false;
        };
        if slot.hydrated {
            return false;
        }
        if !slot.payload_edited {
            slot.payload = stored.clone().unwrap_or_default();
        }
        slot.known_good = stored;
        slot.hydrated = true;
        true
    }

    /// Replaces the draft payload and (re)starts the debounce timer.
    pub fn edit_payload(&mut self, key: &RecordKey, payload: ContentPayload, now_ms: i64) -> bool {
        let debounce_ms = self.debounce_ms;
        let Some(slot) = self.editors.get_mut(key) else {
            return false;
        };
        slot.payload = payload;
        slot.payload_edited = true;
        mark_dirty(slot, now_ms, debounce_ms);
        true
    }

    /// Mutates the draft metadata and (re)starts the debounce timer.
    ///
    /// `kind` and `id` are restored after `update` runs.
    pub fn edit_metadata(
        &mut self,
        key: &RecordKey,
        update: impl FnOnce(&mut EntityRecord),
        now_ms: i64,
    ) -> bool {
        let debounce_ms = self.debounce_ms;
        let Some(slot) = self.editors.get_mut(key) else {
            return false;
        };
        update(&mut slot.draft);
        slot.draft.kind = key.kind;
        slot.draft.id = key.id.clone();
        mark_dirty(slot, now_ms, debounce_ms);
        true
    }

    /// Cuts tickets for every editor whose timer has expired and whose guards pass.
    pub fn due_commits(&mut self, now_ms: i64) -> Vec<CommitTicket> {
        let mut keys: Vec<RecordKey> = self
            .editors
            .iter()
            .filter(|(_, slot)| slot.due_at_ms.is_some_and(|due| due <= now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();

        keys.iter()
            .filter_map(|key| self.try_fire(key, now_ms))
            .collect()
    }

    /// Fires one editor now, bypassing the debounce window but not the guards.
    pub fn flush(&mut self, key: &RecordKey, now_ms: i64) -> Option<CommitTicket> {
        let slot = self.editors.get_mut(key)?;
        if !slot.dirty {
            return None;
        }
        slot.due_at_ms = Some(now_ms);
        self.try_fire(key, now_ms)
    }

    /// Folds a commit outcome back into the editor that issued `ticket`.
    pub fn complete(&mut self, ticket: &CommitTicket, outcome: CommitOutcome) -> CommitReport {
        let Some(slot) = self.editors.get_mut(&ticket.key) else {
            debug!(
                "event=autosave_commit module=sync status=closed kind={} id={}",
                ticket.key.kind, ticket.key.id
            );
            return CommitReport::Closed(ticket.key.clone());
        };

        if slot
            .in_flight
            .as_ref()
            .is_some_and(|(version, _)| *version == ticket.version)
        {
            slot.in_flight = None;
            slot.busy = false;
        }

        if let Some(location) = outcome.saved() {
            slot.draft.content_ref = Some(location.content_ref.clone());
            if location.location_hint.is_some() {
                slot.draft.location_hint = location.location_hint.clone();
            }
            slot.known_good = ticket.payload.clone();
        }

        if ticket.version != slot.version {
            self.stats.superseded += 1;
            debug!(
                "event=autosave_superseded module=sync status=discarded kind={} id={} ticket_version={} draft_version={}",
                ticket.key.kind, ticket.key.id, ticket.version, slot.version
            );
            return CommitReport::Superseded(ticket.key.clone());
        }

        match outcome {
            CommitOutcome::Committed { record, .. } => {
                slot.draft = record.clone();
                slot.dirty = false;
                slot.due_at_ms = None;
                self.stats.commits += 1;
                info!(
                    "event=autosave_commit module=sync status=ok kind={} id={} version={}",
                    record.kind, record.id, ticket.version
                );
                CommitReport::Committed(record)
            }
            CommitOutcome::ContentFailed => {
                slot.due_at_ms = None;
                self.stats.failures += 1;
                warn!(
                    "event=autosave_commit module=sync status=error phase=content kind={} id={}",
                    ticket.key.kind, ticket.key.id
                );
                CommitReport::ContentFailed(ticket.key.clone())
            }
            CommitOutcome::RegistryFailed { saved } => {
                slot.due_at_ms = None;
                self.stats.failures += 1;
                warn!(
                    "event=autosave_commit module=sync status=error phase=registry kind={} id={} content_saved={}",
                    ticket.key.kind,
                    ticket.key.id,
                    saved.is_some()
                );
                match saved {
                    Some(location) => CommitReport::PartialCommit {
                        key: ticket.key.clone(),
                        content_ref: location.content_ref,
                    },
                    None => CommitReport::RegistryFailed(ticket.key.clone()),
                }
            }
            CommitOutcome::Cancelled { .. } => {
                self.stats.superseded += 1;
                CommitReport::Superseded(ticket.key.clone())
            }
        }
    }

    /// Copies the fields of a record changed outside the editor into its draft.
    ///
    /// Only fields present in `record` are replaced; the payload, the dirty
    /// flag and the timer are left alone.
    pub fn apply_external_fields(&mut self, record: &EntityRecord) {
        let Some(slot) = self.editors.get_mut(&record.key()) else {
            return;
        };
        for (name, value) in &record.fields {
            slot.draft.fields.insert(name.clone(), value.clone());
        }
        slot.draft.updated_at = slot.draft.updated_at.max(record.updated_at);
    }

    /// Removes markers of `deleted` from the reference fields of open drafts.
    ///
    /// Only the fields named by `edges` change, so uncommitted edits to other
    /// fields survive. A commit already in flight for a pruned draft is
    /// cancelled and the draft is due again at `now_ms`.
    pub fn prune_references(
        &mut self,
        edges: &[ReferenceEdge],
        deleted: &RecordKey,
        now_ms: i64,
    ) -> Vec<PrunedDraft> {
        let mut keys: Vec<RecordKey> = self
            .editors
            .keys()
            .filter(|key| {
                edges
                    .iter()
                    .any(|edge| edge.referenced == deleted.kind && edge.holder == key.kind)
            })
            .cloned()
            .collect();
        keys.sort();

        let mut pruned = Vec::new();
        for key in keys {
            let Some(slot) = self.editors.get_mut(&key) else {
                continue;
            };
            let fields = holder_fields(edges, deleted.kind, key.kind);
            if !prune_fields(&mut slot.draft.fields, &fields, &deleted.id) {
                continue;
            }
            slot.draft.updated_at = slot.draft.updated_at.max(now_ms);
            if let Some((_, token)) = &slot.in_flight {
                token.cancel();
                slot.version += 1;
                slot.due_at_ms = Some(now_ms);
            }
            debug!(
                "event=cascade_prune module=sync status=draft deleted_kind={} deleted_id={} holder_kind={} holder_id={} dirty={}",
                deleted.kind, deleted.id, key.kind, key.id, slot.dirty
            );
            pruned.push(PrunedDraft {
                record: slot.draft.clone(),
                dirty: slot.dirty,
            });
        }
        pruned
    }

    /// Closes an editor, cancelling any in-flight commit.
    ///
    /// Returns whether the draft had uncommitted edits.
    pub fn close(&mut self, key: &RecordKey) -> bool {
        let Some(slot) = self.editors.remove(key) else {
            return false;
        };
        if let Some((_, token)) = &slot.in_flight {
            token.cancel();
        }
        if slot.dirty {
            warn!(
                "event=autosave_close module=sync status=unsaved kind={} id={}",
                key.kind, key.id
            );
        }
        slot.dirty
    }

    /// Closes every editor. Returns the keys that had uncommitted edits.
    pub fn close_all(&mut self) -> Vec<RecordKey> {
        let mut keys: Vec<RecordKey> = self.editors.keys().cloned().collect();
        keys.sort();
        keys.into_iter().filter(|key| self.close(key)).collect()
    }

    pub fn is_open(&self, key: &RecordKey) -> bool {
        self.editors.contains_key(key)
    }

    pub fn phase(&self, key: &RecordKey) -> Option<DraftPhase> {
        self.editors.get(key).map(EditorSlot::phase)
    }

    pub fn draft(&self, key: &RecordKey) -> Option<&EntityRecord> {
        self.editors.get(key).map(|slot| &slot.draft)
    }

    pub fn payload(&self, key: &RecordKey) -> Option<&ContentPayload> {
        self.editors.get(key).map(|slot| &slot.payload)
    }

    /// Earliest armed timer, for the host loop to sleep until.
    pub fn next_due_at(&self) -> Option<i64> {
        self.editors
            .values()
            .filter(|slot| !slot.busy)
            .filter_map(|slot| slot.due_at_ms)
            .min()
    }

    pub fn stats(&self) -> AutosaveStats {
        self.stats
    }

    fn try_fire(&mut self, key: &RecordKey, now_ms: i64) -> Option<CommitTicket> {
        let slot = self.editors.get_mut(key)?;
        if !slot.hydrated || slot.busy || !slot.dirty {
            return None;
        }

        if slot.would_destroy_content() {
            slot.due_at_ms = None;
            self.stats.suppressed += 1;
            warn!(
                "event=autosave_suppressed module=sync status=guard reason=empty_draft_over_content kind={} id={} version={}",
                key.kind, key.id, slot.version
            );
            return None;
        }

        let cancel = CancelToken::default();
        let mut record = slot.draft.clone();
        record.updated_at = now_ms;
        let payload = slot.needs_content_save().then(|| slot.payload.clone());

        slot.busy = true;
        slot.due_at_ms = None;
        slot.in_flight = Some((slot.version, cancel.clone()));
        debug!(
            "event=autosave_fire module=sync status=ok kind={} id={} version={} content_save={}",
            key.kind,
            key.id,
            slot.version,
            payload.is_some()
        );

        Some(CommitTicket {
            key: key.clone(),
            version: slot.version,
            record,
            payload,
            cancel,
        })
    }
}

fn mark_dirty(slot: &mut EditorSlot, now_ms: i64, debounce_ms: i64) {
    slot.version += 1;
    slot.dirty = true;
    slot.due_at_ms = Some(now_ms.saturating_add(debounce_ms));
    if let Some((_, token)) = &slot.in_flight {
        token.cancel();
    }
}

/// Runs one ticket: content save (if needed), then registry upsert.
///
/// The cancellation flag is checked before each phase.
pub fn execute_commit(
    ticket: &CommitTicket,
    content: &ContentClient,
    registry: &RegistryClient,
) -> CommitOutcome {
    if ticket.is_cancelled() {
        return CommitOutcome::Cancelled { saved: None };
    }

    let mut record = ticket.record.clone();
    let mut saved = None;
    if let Some(payload) = &ticket.payload {
        match content.save(
            record.content_ref.as_deref(),
            payload,
            record.location_hint.as_deref(),
        ) {
            Ok(location) => {
                record.content_ref = Some(location.content_ref.clone());
                if location.location_hint.is_some() {
                    record.location_hint = location.location_hint.clone();
                }
                saved = Some(location);
            }
            Err(_) => return CommitOutcome::ContentFailed,
        }
    }

    if ticket.is_cancelled() {
        return CommitOutcome::Cancelled { saved };
    }

    if registry.upsert(&record) {
        CommitOutcome::Committed { record, saved }
    } else {
        CommitOutcome::RegistryFailed { saved }
    }
}

#[cfg(test)]
mod tests {
    use super::{AutosaveScheduler, CommitOutcome, CommitReport, DraftPhase};
    use crate::model::payload::ContentPayload;
    use crate::model::record::{EntityKind, EntityRecord, RecordKey};
    use crate::store::ContentLocation;
    use crate::sync::cascade::DEFAULT_REFERENCE_EDGES;
    use serde_json::json;

    const DEBOUNCE_MS: u64 = 1_000;

    fn open_hydrated(scheduler: &mut AutosaveScheduler, stored: Option<ContentPayload>) -> EntityRecord {
        let record = EntityRecord::with_id(EntityKind::Review, "review-1");
        assert!(scheduler.open(record.clone()));
        assert!(scheduler.hydrate(&record.key(), stored));
        record
    }

    #[test]
    fn phases_follow_edit_fire_commit() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = EntityRecord::with_id(EntityKind::Review, "review-1");
        let key = record.key();
        scheduler.open(record);
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Loading));

        scheduler.hydrate(&key, None);
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Clean));

        scheduler.edit_payload(&key, ContentPayload::new(json!("text")), 0);
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Dirty));
        assert!(scheduler.due_commits(999).is_empty());

        let tickets = scheduler.due_commits(1_000);
        assert_eq!(tickets.len(), 1);
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Saving));

        let mut committed = tickets[0].record.clone();
        committed.content_ref = Some("c1".to_string());
        let report = scheduler.complete(
            &tickets[0],
            CommitOutcome::Committed {
                record: committed,
                saved: Some(ContentLocation {
                    content_ref: "c1".to_string(),
                    location_hint: None,
                }),
            },
        );
        assert!(matches!(report, CommitReport::Committed(_)));
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Clean));
        assert_eq!(scheduler.stats().commits, 1);
    }

    #[test]
    fn unchanged_payload_skips_content_phase() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let stored = ContentPayload::new(json!({"synthesis": "kept"}));
        let record = open_hydrated(&mut scheduler, Some(stored));

        scheduler.edit_metadata(&record.key(), |draft| {
            draft.fields.insert("favorite".to_string(), json!(true));
        }, 0);
        let tickets = scheduler.due_commits(DEBOUNCE_MS as i64);
        assert_eq!(tickets.len(), 1);
        assert!(tickets[0].payload.is_none());
        assert_eq!(tickets[0].record.fields.get("favorite"), Some(&json!(true)));
    }

    #[test]
    fn busy_editor_does_not_fire_twice() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = open_hydrated(&mut scheduler, None);
        let key = record.key();

        scheduler.edit_payload(&key, ContentPayload::new(json!("v1")), 0);
        let first = scheduler.due_commits(1_000);
        assert_eq!(first.len(), 1);

        scheduler.edit_payload(&key, ContentPayload::new(json!("v2")), 1_100);
        assert!(first[0].is_cancelled());
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Dirty));
        assert!(scheduler.due_commits(5_000).is_empty());

        let report = scheduler.complete(&first[0], CommitOutcome::Cancelled { saved: None });
        assert_eq!(report, CommitReport::Superseded(key.clone()));

        let second = scheduler.due_commits(5_000);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, Some(ContentPayload::new(json!("v2"))));
    }

    #[test]
    fn superseded_save_adopts_minted_content_ref() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = open_hydrated(&mut scheduler, None);
        let key = record.key();

        scheduler.edit_payload(&key, ContentPayload::new(json!("v1")), 0);
        let ticket = scheduler.due_commits(1_000).remove(0);
        scheduler.edit_payload(&key, ContentPayload::new(json!("v2")), 1_200);

        let report = scheduler.complete(
            &ticket,
            CommitOutcome::Cancelled {
                saved: Some(ContentLocation {
                    content_ref: "c7".to_string(),
                    location_hint: Some("local".to_string()),
                }),
            },
        );
        assert_eq!(report, CommitReport::Superseded(key.clone()));
        assert_eq!(
            scheduler.draft(&key).and_then(|draft| draft.content_ref.as_deref()),
            Some("c7")
        );

        let retry = scheduler.due_commits(2_200).remove(0);
        assert_eq!(retry.record.content_ref.as_deref(), Some("c7"));
    }

    #[test]
    fn failures_leave_editor_dirty_without_rearming() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = open_hydrated(&mut scheduler, None);
        let key = record.key();

        scheduler.edit_payload(&key, ContentPayload::new(json!("text")), 0);
        let ticket = scheduler.due_commits(1_000).remove(0);
        let report = scheduler.complete(&ticket, CommitOutcome::ContentFailed);

        assert_eq!(report, CommitReport::ContentFailed(key.clone()));
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Dirty));
        assert!(scheduler.due_commits(60_000).is_empty());
        assert!(scheduler.flush(&key, 60_000).is_some());
        assert_eq!(scheduler.stats().failures, 1);
    }

    #[test]
    fn close_cancels_in_flight_commit() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = open_hydrated(&mut scheduler, None);
        let key = record.key();

        scheduler.edit_payload(&key, ContentPayload::new(json!("text")), 0);
        let ticket = scheduler.due_commits(1_000).remove(0);
        assert!(scheduler.close(&key));
        assert!(ticket.is_cancelled());
        assert_eq!(
            scheduler.complete(&ticket, CommitOutcome::Cancelled { saved: None }),
            CommitReport::Closed(key)
        );
    }

    #[test]
    fn external_fields_reach_open_draft_without_dirtying() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = open_hydrated(&mut scheduler, None);
        let external = record.clone().with_field("source_refs", json!(["p2"]));

        scheduler.apply_external_fields(&external);
        assert_eq!(scheduler.phase(&record.key()), Some(DraftPhase::Clean));
        assert_eq!(
            scheduler
                .draft(&record.key())
                .and_then(|draft| draft.fields.get("source_refs")),
            Some(&json!(["p2"]))
        );
    }

    #[test]
    fn prune_keeps_uncommitted_edits_in_other_fields() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = EntityRecord::with_id(EntityKind::Review, "review-1")
            .with_field("title", "Old")
            .with_field("source_refs", json!(["p1", "p2"]));
        let key = record.key();
        scheduler.open(record);
        scheduler.hydrate(&key, None);
        scheduler.edit_metadata(&key, |draft| {
            draft.fields.insert("title".to_string(), json!("User edit"));
        }, 0);

        let pruned = scheduler.prune_references(
            DEFAULT_REFERENCE_EDGES,
            &RecordKey::new(EntityKind::LibraryItem, "p1"),
            500,
        );
        assert_eq!(pruned.len(), 1);
        assert!(pruned[0].dirty);
        assert_eq!(scheduler.phase(&key), Some(DraftPhase::Dirty));

        let ticket = scheduler.due_commits(DEBOUNCE_MS as i64).remove(0);
        assert_eq!(ticket.record.fields.get("title"), Some(&json!("User edit")));
        assert_eq!(ticket.record.fields.get("source_refs"), Some(&json!(["p2"])));
    }

    #[test]
    fn prune_supersedes_in_flight_commit_and_rearms() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        let record = EntityRecord::with_id(EntityKind::Review, "review-1")
            .with_field("source_refs", json!([{"id": "p1"}]));
        let key = record.key();
        scheduler.open(record);
        scheduler.hydrate(&key, None);
        scheduler.edit_payload(&key, ContentPayload::new(json!("text")), 0);
        let stale = scheduler.due_commits(1_000).remove(0);

        scheduler.prune_references(
            DEFAULT_REFERENCE_EDGES,
            &RecordKey::new(EntityKind::LibraryItem, "p1"),
            1_100,
        );
        assert!(stale.is_cancelled());
        assert_eq!(
            scheduler.complete(&stale, CommitOutcome::Cancelled { saved: None }),
            CommitReport::Superseded(key.clone())
        );

        let retry = scheduler.due_commits(1_100).remove(0);
        assert_eq!(retry.record.fields.get("source_refs"), Some(&json!([])));
    }

    #[test]
    fn prune_ignores_drafts_without_the_marker() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        open_hydrated(&mut scheduler, None);
        let note = EntityRecord::with_id(EntityKind::Note, "n1").with_field("source_refs", json!(["p1"]));
        scheduler.open(note.clone());

        let pruned = scheduler.prune_references(
            DEFAULT_REFERENCE_EDGES,
            &RecordKey::new(EntityKind::LibraryItem, "p1"),
            0,
        );
        assert!(pruned.is_empty());
        assert_eq!(
            scheduler.draft(&note.key()).and_then(|draft| draft.fields.get("source_refs")),
            Some(&json!(["p1"]))
        );
    }

    #[test]
    fn next_due_at_reports_earliest_idle_timer() {
        let mut scheduler = AutosaveScheduler::new(DEBOUNCE_MS);
        assert_eq!(scheduler.next_due_at(), None);
        let record = open_hydrated(&mut scheduler, None);
        scheduler.edit_payload(&record.key(), ContentPayload::new(json!("x")), 250);
        assert_eq!(scheduler.next_due_at(), Some(1_250));
    }
}
