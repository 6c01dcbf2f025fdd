//! Keyed Tracking
//!
//! The interception interface for host objects: anything with identity and
//! keyed storage (structs, arrays, maps) can report its reads with
//! [`track`] and its writes with [`trigger`], and the runtime maintains
//! one dep per (target, key) pair, created on first tracked read and
//! garbage-collected when its last subscriber unlinks.
//!
//! Besides plain keys there are pseudo-keys for shape: `Length` for array
//! length, `Iterate` for enumeration, `MapKeyIterate` for map key sets,
//! `ArrayIterate` for array iteration. [`trigger`] fans a structural write
//! out to the pseudo-keys it invalidates.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::batch;
use super::context;
use super::graph::{with_graph, DepId};

/// Identity of a host object participating in keyed tracking.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TargetId(u64);

impl TargetId {
    /// Allocate a fresh, process-unique identity.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for TargetId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// One trackable location on a target.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DepKey {
    /// A named property.
    Prop(String),
    /// An array element.
    Index(usize),
    /// Array length.
    Length,
    /// Enumeration of keys/entries.
    Iterate,
    /// Enumeration of a map's keys only.
    MapKeyIterate,
    /// Iteration over an array's elements.
    ArrayIterate,
}

/// What kind of read is being reported.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrackKind {
    Get,
    Has,
    Iterate,
}

/// The shape of the target, which decides trigger fanout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetKind {
    Plain,
    Array,
    Map,
}

/// What kind of write is being reported.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TriggerKind {
    /// An existing location changed value.
    Set,
    /// A new location appeared.
    Add,
    /// A location disappeared.
    Delete,
    /// Everything was removed at once.
    Clear,
}

/// Record that the active subscriber read `key` on `target`.
///
/// No-op when no subscriber is collecting or tracking is paused; in that
/// case no dep is created either.
pub fn track(target: TargetId, _kind: TrackKind, key: DepKey) {
    if context::active_sub().is_none() || !context::is_tracking() {
        return;
    }
    with_graph(|g| {
        let dep = match g.targets.get(&target).and_then(|map| map.get(&key)) {
            Some(&dep) => dep,
            None => {
                let dep = g.new_dep(None, Some((target, key.clone())));
                g.targets.entry(target).or_default().insert(key, dep);
                dep
            }
        };
        g.track_dep(dep);
    });
}

/// Report a write to `target` and notify every dep the operation affects.
///
/// `key` is the written location (`None` for [`TriggerKind::Clear`] and
/// for whole-object invalidation); `new_len` carries the new length of an
/// array whose `Length` was written directly.
pub fn trigger(
    target: TargetId,
    target_kind: TargetKind,
    op: TriggerKind,
    key: Option<DepKey>,
    new_len: Option<usize>,
) {
    fn push_key(
        map: &indexmap::IndexMap<DepKey, DepId>,
        deps: &mut SmallVec<[DepId; 8]>,
        key: &DepKey,
    ) {
        if let Some(&dep) = map.get(key) {
            deps.push(dep);
        }
    }

    with_graph(|g| {
        g.batch_depth += 1;

        let Some(map) = g.targets.get(&target) else {
            // Never tracked: nothing to notify, but the world still moved.
            g.global_version += 1;
            return;
        };

        let mut deps: SmallVec<[DepId; 8]> = SmallVec::new();

        if op == TriggerKind::Clear {
            // Everything on the target is potentially gone.
            deps.extend(map.values().copied());
        } else if target_kind == TargetKind::Array && key == Some(DepKey::Length) {
            // Truncation: length itself, iteration, and every index at or
            // past the new length.
            let new_len = new_len.unwrap_or(0);
            for (k, &dep) in map.iter() {
                match k {
                    DepKey::Length | DepKey::ArrayIterate => deps.push(dep),
                    DepKey::Index(i) if *i >= new_len => deps.push(dep),
                    _ => {}
                }
            }
        } else {
            if let Some(key) = &key {
                push_key(map, &mut deps, key);
            }
            match op {
                TriggerKind::Add => {
                    if target_kind == TargetKind::Array {
                        if matches!(key, Some(DepKey::Index(_))) {
                            push_key(map, &mut deps, &DepKey::Length);
                        }
                    } else {
                        push_key(map, &mut deps, &DepKey::Iterate);
                        if target_kind == TargetKind::Map {
                            push_key(map, &mut deps, &DepKey::MapKeyIterate);
                        }
                    }
                }
                TriggerKind::Delete => {
                    if target_kind != TargetKind::Array {
                        push_key(map, &mut deps, &DepKey::Iterate);
                        if target_kind == TargetKind::Map {
                            push_key(map, &mut deps, &DepKey::MapKeyIterate);
                        }
                    }
                }
                TriggerKind::Set => {
                    if target_kind == TargetKind::Map {
                        push_key(map, &mut deps, &DepKey::Iterate);
                    }
                }
                TriggerKind::Clear => unreachable!(),
            }
            if target_kind == TargetKind::Array && matches!(key, Some(DepKey::Index(_))) {
                push_key(map, &mut deps, &DepKey::ArrayIterate);
            }
        }

        if deps.is_empty() {
            // The written location was tracked by nobody; no version moves.
            return;
        }
        tracing::trace!(?target, ?op, fanout = deps.len(), "keyed trigger");
        for dep in deps {
            g.global_version += 1;
            if let Some(node) = g.deps.get_mut(dep.0) {
                node.version += 1;
            }
            g.notify_dep(dep);
        }
    });
    batch::end_batch();
}

/// Look up the dep backing a (target, key) pair, if one exists.
pub fn get_dep_from_reactive(target: TargetId, key: &DepKey) -> Option<DepId> {
    with_graph(|g| g.targets.get(&target).and_then(|map| map.get(key).copied()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counted_effect(f: impl Fn() + 'static) -> (Effect, Rc<Cell<i32>>) {
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let effect = Effect::new(move || {
            counter.set(counter.get() + 1);
            f();
        });
        (effect, runs)
    }

    #[test]
    fn deps_are_created_lazily() {
        let target = TargetId::new();
        // Reads outside any subscriber must not allocate deps.
        track(target, TrackKind::Get, DepKey::Prop("a".into()));
        assert!(get_dep_from_reactive(target, &DepKey::Prop("a".into())).is_none());
    }

    #[test]
    fn set_notifies_only_the_written_key() {
        let target = TargetId::new();
        let (_a, runs_a) = counted_effect(move || {
            track(target, TrackKind::Get, DepKey::Prop("a".into()));
        });
        let (_b, runs_b) = counted_effect(move || {
            track(target, TrackKind::Get, DepKey::Prop("b".into()));
        });
        assert_eq!((runs_a.get(), runs_b.get()), (1, 1));

        trigger(
            target,
            TargetKind::Plain,
            TriggerKind::Set,
            Some(DepKey::Prop("a".into())),
            None,
        );
        assert_eq!((runs_a.get(), runs_b.get()), (2, 1));
    }

    #[test]
    fn add_invalidates_iteration() {
        let target = TargetId::new();
        let (_e, runs) = counted_effect(move || {
            track(target, TrackKind::Iterate, DepKey::Iterate);
        });

        trigger(
            target,
            TargetKind::Plain,
            TriggerKind::Add,
            Some(DepKey::Prop("new".into())),
            None,
        );
        assert_eq!(runs.get(), 2);

        // Overwriting an existing key does not change the key set.
        trigger(
            target,
            TargetKind::Plain,
            TriggerKind::Set,
            Some(DepKey::Prop("new".into())),
            None,
        );
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn array_truncation_hits_indices_past_the_new_length() {
        let target = TargetId::new();
        let (_short, runs_short) = counted_effect(move || {
            track(target, TrackKind::Get, DepKey::Index(0));
        });
        let (_long, runs_long) = counted_effect(move || {
            track(target, TrackKind::Get, DepKey::Index(5));
        });

        trigger(
            target,
            TargetKind::Array,
            TriggerKind::Set,
            Some(DepKey::Length),
            Some(2),
        );
        assert_eq!((runs_short.get(), runs_long.get()), (1, 2));
    }

    #[test]
    fn map_set_invalidates_entry_iteration_but_not_key_iteration() {
        let target = TargetId::new();
        let (_entries, runs_entries) = counted_effect(move || {
            track(target, TrackKind::Iterate, DepKey::Iterate);
        });
        let (_keys, runs_keys) = counted_effect(move || {
            track(target, TrackKind::Iterate, DepKey::MapKeyIterate);
        });

        trigger(
            target,
            TargetKind::Map,
            TriggerKind::Set,
            Some(DepKey::Prop("k".into())),
            None,
        );
        assert_eq!((runs_entries.get(), runs_keys.get()), (2, 1));
    }

    #[test]
    fn fanout_miss_leaves_the_global_version_alone() {
        let target = TargetId::new();
        let (_e, _runs) = counted_effect(move || {
            track(target, TrackKind::Get, DepKey::Prop("a".into()));
        });

        let before = crate::reactive::global_version();
        trigger(
            target,
            TargetKind::Plain,
            TriggerKind::Set,
            Some(DepKey::Prop("b".into())),
            None,
        );
        assert_eq!(crate::reactive::global_version(), before);

        // A target that was never tracked still counts as a world change.
        trigger(
            TargetId::new(),
            TargetKind::Plain,
            TriggerKind::Set,
            Some(DepKey::Prop("b".into())),
            None,
        );
        assert_eq!(crate::reactive::global_version(), before + 1);
    }

    #[test]
    fn unwatched_key_is_garbage_collected() {
        let target = TargetId::new();
        let key = DepKey::Prop("a".into());
        let watched = {
            let key = key.clone();
            let (effect, _) = counted_effect(move || {
                track(target, TrackKind::Get, key.clone());
            });
            effect
        };
        assert!(get_dep_from_reactive(target, &key).is_some());

        watched.stop();
        assert!(get_dep_from_reactive(target, &key).is_none());
    }
}
