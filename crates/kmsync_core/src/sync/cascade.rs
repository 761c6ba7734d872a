//! Cascade invalidation of denormalized references.
//!
//! # Responsibility
//! - Listen for delete broadcasts of every kind that other kinds embed.
//! - Prune the deleted id from locally held holder records, write the result
//!   through the session cache and re-broadcast it as an upsert.
//! - Expose the same field-level pruning for drafts held by open editors.
//!
//! # Invariants
//! - Pruning never touches the network; durable persistence of pruned holders
//!   is left to the owner via [`CascadeInvalidator::take_pruned`].
//! - A holder record changed by several edges is re-broadcast once.
//! - A delete with no locally held dependents is a no-op.

use crate::model::record::{now_epoch_ms, EntityKind, EntityRecord, RecordKey};
use crate::sync::bus::{BroadcastAction, BroadcastBus, BroadcastMessage, Subscription};
use crate::sync::session_cache::SessionCache;
use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// "Records of `referenced` kind are embedded in `holder.field`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceEdge {
    pub referenced: EntityKind,
    pub holder: EntityKind,
    pub field: &'static str,
}

/// Hand-maintained map of denormalized references between entity kinds.
pub const DEFAULT_REFERENCE_EDGES: &[ReferenceEdge] = &[
    ReferenceEdge {
        referenced: EntityKind::LibraryItem,
        holder: EntityKind::ResearchProject,
        field: "library_item_refs",
    },
    ReferenceEdge {
        referenced: EntityKind::Note,
        holder: EntityKind::ResearchProject,
        field: "note_refs",
    },
    ReferenceEdge {
        referenced: EntityKind::LibraryItem,
        holder: EntityKind::Review,
        field: "source_refs",
    },
    ReferenceEdge {
        referenced: EntityKind::Review,
        holder: EntityKind::ResearchProject,
        field: "review_refs",
    },
    ReferenceEdge {
        referenced: EntityKind::ResearchProject,
        holder: EntityKind::Note,
        field: "project_refs",
    },
];

/// Bus subscriber that keeps embedded reference lists consistent.
pub struct CascadeInvalidator {
    edges: Vec<ReferenceEdge>,
    pruned: Arc<Mutex<Vec<EntityRecord>>>,
    _subscriptions: Vec<Subscription>,
}

impl CascadeInvalidator {
    /// Subscribes to deletes of every referenced kind in `edges`.
    pub fn attach(bus: &BroadcastBus, cache: &SessionCache, edges: &[ReferenceEdge]) -> Self {
        let pruned = Arc::new(Mutex::new(Vec::new()));
        let referenced: BTreeSet<EntityKind> = edges.iter().map(|edge| edge.referenced).collect();

        let subscriptions = referenced
            .into_iter()
            .map(|kind| {
                let edges = edges.to_vec();
                let cache = cache.clone();
                let weak_bus = bus.downgrade();
                let pruned = Arc::clone(&pruned);
                bus.subscribe_to(kind, BroadcastAction::Delete, move |message| {
                    let BroadcastMessage::Delete(key) = message else {
                        return;
                    };
                    let Some(bus) = weak_bus.upgrade() else {
                        return;
                    };
                    let changed = prune_references(&edges, &cache, &bus, key);
                    if !changed.is_empty() {
                        pruned
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend(changed);
                    }
                })
            })
            .collect();

        Self {
            edges: edges.to_vec(),
            pruned,
            _subscriptions: subscriptions,
        }
    }

    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    /// Drains holder records pruned since the last call, oldest first.
    pub fn take_pruned(&self) -> Vec<EntityRecord> {
        std::mem::take(&mut *self.pruned.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Removes `deleted` from every held holder record and re-broadcasts changes.
///
/// Returns the changed holder records in broadcast order.
pub fn prune_references(
    edges: &[ReferenceEdge],
    cache: &SessionCache,
    bus: &BroadcastBus,
    deleted: &RecordKey,
) -> Vec<EntityRecord> {
    let holders: BTreeSet<EntityKind> = edges
        .iter()
        .filter(|edge| edge.referenced == deleted.kind)
        .map(|edge| edge.holder)
        .collect();

    let mut changed = Vec::new();
    for holder in holders {
        let fields = holder_fields(edges, deleted.kind, holder);
        for mut record in cache.held_records(holder) {
            let touched = prune_fields(&mut record.fields, &fields, &deleted.id);
            if !touched {
                continue;
            }

            record.updated_at = now_epoch_ms();
            debug!(
                "event=cascade_prune module=sync status=ok deleted_kind={} deleted_id={} holder_kind={} holder_id={}",
                deleted.kind, deleted.id, record.kind, record.id
            );
            cache.record_upsert(record.clone());
            bus.publish_upsert(record.clone());
            changed.push(record);
        }
    }

    if !changed.is_empty() {
        info!(
            "event=cascade_prune module=sync status=done deleted_kind={} deleted_id={} holders={}",
            deleted.kind,
            deleted.id,
            changed.len()
        );
    }
    changed
}

/// Fields of `holder` that embed records of `referenced` kind.
pub fn holder_fields(
    edges: &[ReferenceEdge],
    referenced: EntityKind,
    holder: EntityKind,
) -> Vec<&'static str> {
    edges
        .iter()
        .filter(|edge| edge.referenced == referenced && edge.holder == holder)
        .map(|edge| edge.field)
        .collect()
}

/// Drops every marker of `deleted_id` from the named array fields.
///
/// Other fields are not touched. Returns whether any marker was removed.
pub fn prune_fields(fields: &mut Map<String, Value>, names: &[&str], deleted_id: &str) -> bool {
    let mut touched = false;
    for name in names {
        if let Some(Value::Array(markers)) = fields.get_mut(*name) {
            let before = markers.len();
            markers.retain(|marker| !marker_matches(marker, deleted_id));
            touched |= markers.len() != before;
        }
    }
    touched
}

/// A marker is the bare id string or an object whose `id` member is the id.
fn marker_matches(marker: &Value, id: &str) -> bool {
    match marker {
        Value::String(value) => value == id,
        Value::Object(members) => members.get("id").and_then(Value::as_str) == Some(id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{holder_fields, marker_matches, prune_fields, prune_references, ReferenceEdge};
    use crate::model::record::{EntityKind, EntityRecord, RecordKey};
    use crate::sync::bus::BroadcastBus;
    use crate::sync::session_cache::SessionCache;
    use serde_json::json;

    const EDGES: &[ReferenceEdge] = &[
        ReferenceEdge {
            referenced: EntityKind::LibraryItem,
            holder: EntityKind::ResearchProject,
            field: "library_item_refs",
        },
        ReferenceEdge {
            referenced: EntityKind::LibraryItem,
            holder: EntityKind::ResearchProject,
            field: "pinned_refs",
        },
    ];

    #[test]
    fn markers_match_strings_and_id_objects() {
        assert!(marker_matches(&json!("p1"), "p1"));
        assert!(marker_matches(&json!({"id": "p1", "title": "Paper"}), "p1"));
        assert!(!marker_matches(&json!({"id": "p2"}), "p1"));
        assert!(!marker_matches(&json!(1), "p1"));
    }

    #[test]
    fn record_touched_by_two_fields_is_rebroadcast_once() {
        let cache = SessionCache::new();
        let bus = BroadcastBus::new();
        cache.reconcile(
            EntityKind::ResearchProject,
            vec![EntityRecord::with_id(EntityKind::ResearchProject, "s1")
                .with_field("library_item_refs", json!(["p1", "p2"]))
                .with_field("pinned_refs", json!([{"id": "p1"}]))],
        );

        let changed = prune_references(
            EDGES,
            &cache,
            &bus,
            &RecordKey::new(EntityKind::LibraryItem, "p1"),
        );
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].fields.get("library_item_refs"), Some(&json!(["p2"])));
        assert_eq!(changed[0].fields.get("pinned_refs"), Some(&json!([])));
        assert_eq!(bus.delivered_count(), 1);
    }

    #[test]
    fn delete_without_dependents_is_a_no_op() {
        let cache = SessionCache::new();
        let bus = BroadcastBus::new();
        let changed = prune_references(
            EDGES,
            &cache,
            &bus,
            &RecordKey::new(EntityKind::LibraryItem, "missing"),
        );
        assert!(changed.is_empty());
        assert_eq!(bus.delivered_count(), 0);
    }

    #[test]
    fn prune_fields_leaves_unlisted_fields_alone() {
        let mut record = EntityRecord::with_id(EntityKind::ResearchProject, "s1")
            .with_field("title", "p1")
            .with_field("library_item_refs", json!(["p1"]))
            .with_field("note_refs", json!(["p1"]));
        let fields = holder_fields(EDGES, EntityKind::LibraryItem, EntityKind::ResearchProject);
        assert_eq!(fields, vec!["library_item_refs", "pinned_refs"]);

        assert!(prune_fields(&mut record.fields, &fields, "p1"));
        assert_eq!(record.fields.get("library_item_refs"), Some(&json!([])));
        assert_eq!(record.fields.get("note_refs"), Some(&json!(["p1"])));
        assert_eq!(record.fields.get("title"), Some(&json!("p1")));
        assert!(!prune_fields(&mut record.fields, &fields, "p1"));
    }
}
