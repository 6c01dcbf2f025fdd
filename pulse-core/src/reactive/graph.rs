//! Dependency Graph
//!
//! The graph is the heart of the runtime: deps (trackable sources),
//! subscribers (effects and computeds) and the links joining them.
//!
//! # How It Works
//!
//! 1. A link is one (dep, subscriber) edge. It is simultaneously a node in
//!    two doubly-linked lists: the dep's subscriber list and the
//!    subscriber's dependency list.
//!
//! 2. Reading a tracked value calls [`Graph::track_dep`], which reuses an
//!    existing link or appends a fresh one at the tail of both lists. A
//!    subscriber's dependency list is therefore always ordered by first
//!    access within its latest run.
//!
//! 3. Writing calls [`trigger_dep`], which bumps the dep's version and the
//!    global version, then notifies subscribers tail-to-head. Effects are
//!    queued for the batch flush; computeds are only marked dirty and
//!    recompute lazily when pulled.
//!
//! 4. Versions decide staleness: every link snapshots its dep's version at
//!    access time, and [`check_dirty`] compares snapshots against current
//!    versions, refreshing computeds along the way.
//!
//! # Re-entrancy
//!
//! The whole graph lives in a thread-local `RefCell`. The single rule that
//! makes controlled re-entrancy safe: user code (effect bodies, computed
//! getters, schedulers, cleanups) is never invoked while the cell is
//! borrowed. Structural mutation happens in short borrows between calls.
//! The runtime is single-threaded by construction; handles do not cross
//! threads.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;

use super::arena::{Arena, Handle};
use super::batch;
use super::context;
use super::flags::SubscriberFlags;
use super::target::{DepKey, TargetId};

/// Link version marking an edge that the current run has not (re-)read yet.
/// Links still carrying it after a run are pruned by the cleanup pass.
pub(crate) const UNUSED_VERSION: u64 = u64::MAX;

/// Identifies a dependency source.
///
/// Opaque outside the crate; exposed so consumers can compare the deps
/// reported by [`Effect::dependencies`](super::Effect::dependencies) and
/// inspect versions for debugging.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DepId(pub(crate) Handle);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct SubId(pub(crate) Handle);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct LinkId(pub(crate) Handle);

impl DepId {
    /// Current version of this dep, or `None` if it no longer exists.
    pub fn version(self) -> Option<u64> {
        with_graph(|g| g.deps.get(self.0).map(|dep| dep.version))
    }

    /// Number of subscriptions currently registered on this dep.
    pub fn subscriber_count(self) -> Option<usize> {
        with_graph(|g| g.deps.get(self.0).map(|dep| dep.sub_count as usize))
    }
}

/// One trackable storage location (or pseudo-location such as "iterate").
pub(crate) struct DepNode {
    /// Incremented on every trigger.
    pub(crate) version: u64,
    /// Ends of the subscriber link list.
    pub(crate) subs_head: Option<LinkId>,
    pub(crate) subs_tail: Option<LinkId>,
    /// Link between this dep and the currently running subscriber, if any.
    /// Saved and restored across nested runs via `LinkNode::prev_active`.
    pub(crate) active_link: Option<LinkId>,
    /// Subscription count; soft removals do not decrement it.
    pub(crate) sub_count: u32,
    /// The computed this dep is the output of, if any.
    pub(crate) computed: Option<SubId>,
    /// Owning key map entry, for per-key garbage collection.
    pub(crate) owner: Option<(TargetId, DepKey)>,
}

/// One (dep, subscriber) edge; a node in two independent lists.
pub(crate) struct LinkNode {
    /// Snapshot of the dep's version as of the subscriber's last access.
    pub(crate) version: u64,
    pub(crate) dep: DepId,
    pub(crate) sub: SubId,
    /// Neighbors within the subscriber's dependency list.
    pub(crate) prev_dep: Option<LinkId>,
    pub(crate) next_dep: Option<LinkId>,
    /// Neighbors within the dep's subscriber list.
    pub(crate) prev_sub: Option<LinkId>,
    pub(crate) next_sub: Option<LinkId>,
    /// The dep's previous active link, restored after the current run.
    pub(crate) prev_active: Option<LinkId>,
}

pub(crate) struct SubNode {
    pub(crate) flags: SubscriberFlags,
    /// Ends of the dependency link list, in first-access order.
    pub(crate) deps_head: Option<LinkId>,
    pub(crate) deps_tail: Option<LinkId>,
    /// Next subscriber in a batch queue; meaningful only while NOTIFIED.
    pub(crate) next_queued: Option<SubId>,
    pub(crate) kind: SubKind,
}

/// Effects and computeds share the link-list machinery; everything else is
/// kind-specific.
pub(crate) enum SubKind {
    Effect(EffectNode),
    Computed(ComputedNode),
}

pub(crate) struct EffectNode {
    pub(crate) body: Rc<dyn Fn()>,
    pub(crate) scheduler: Option<Rc<dyn Fn()>>,
    /// Cleanup registered during the last run; consumed before the next
    /// run or on stop.
    pub(crate) cleanup: Option<Box<dyn FnOnce()>>,
}

pub(crate) struct ComputedNode {
    /// The dep downstream subscribers link to. Its version advances only
    /// when the cached value actually changes.
    pub(crate) dep: DepId,
    /// Global version observed at the last refresh; equal means nothing
    /// anywhere changed, so the cached value is still valid.
    pub(crate) last_global_version: u64,
    /// Type-erased recompute: evaluates the getter, compares with the
    /// cached value, stores the result and reports whether it changed.
    pub(crate) recompute: Rc<dyn Fn() -> bool>,
    /// Whether the getter has ever completed. Until it has, the cache is
    /// empty and every skip path must be bypassed so a read retries the
    /// getter instead of serving nothing.
    pub(crate) evaluated: bool,
}

pub(crate) struct Graph {
    pub(crate) deps: Arena<DepNode>,
    pub(crate) subs: Arena<SubNode>,
    pub(crate) links: Arena<LinkNode>,
    /// Incremented on every trigger of any dep.
    pub(crate) global_version: u64,
    pub(crate) batch_depth: u32,
    /// LIFO queue of notified effects, threaded through `next_queued`.
    pub(crate) queued_effects: Option<SubId>,
    /// Notified computeds; they are never run from the queue, the flush
    /// only clears their NOTIFIED flag.
    pub(crate) queued_computeds: Option<SubId>,
    /// Effects that were triggered while paused.
    pub(crate) paused_dirty: HashSet<SubId>,
    /// target -> key -> dep, for the keyed interception interface.
    pub(crate) targets: HashMap<TargetId, IndexMap<DepKey, DepId>>,
}

thread_local! {
    static GRAPH: RefCell<Graph> = RefCell::new(Graph::new());
}

/// Borrow the thread's graph. Never call user code from inside `f`.
pub(crate) fn with_graph<R>(f: impl FnOnce(&mut Graph) -> R) -> R {
    GRAPH.with(|cell| f(&mut cell.borrow_mut()))
}

/// Like [`with_graph`], but survives thread teardown. Used by Drop impls.
pub(crate) fn try_with_graph<R>(f: impl FnOnce(&mut Graph) -> R) -> Option<R> {
    GRAPH.try_with(|cell| f(&mut cell.borrow_mut())).ok()
}

/// The process-wide (per-thread) version counter, incremented on every
/// trigger anywhere. A cheap "nothing changed" fast path for computeds.
pub fn global_version() -> u64 {
    with_graph(|g| g.global_version)
}

impl Graph {
    fn new() -> Self {
        Self {
            deps: Arena::new(),
            subs: Arena::new(),
            links: Arena::new(),
            global_version: 0,
            batch_depth: 0,
            queued_effects: None,
            queued_computeds: None,
            paused_dirty: HashSet::new(),
            targets: HashMap::new(),
        }
    }

    pub(crate) fn new_dep(
        &mut self,
        computed: Option<SubId>,
        owner: Option<(TargetId, DepKey)>,
    ) -> DepId {
        DepId(self.deps.insert(DepNode {
            version: 0,
            subs_head: None,
            subs_tail: None,
            active_link: None,
            sub_count: 0,
            computed,
            owner,
        }))
    }

    /// Record that the active subscriber read `dep`.
    ///
    /// No-op unless tracking is enabled, a subscriber is active, and that
    /// subscriber is not the dep's own backing computed.
    pub(crate) fn track_dep(&mut self, dep: DepId) -> Option<LinkId> {
        let sub = context::active_sub()?;
        if !context::is_tracking() {
            return None;
        }
        let dep_node = self.deps.get(dep.0)?;
        if dep_node.computed == Some(sub) {
            return None;
        }

        let existing = dep_node
            .active_link
            .filter(|&link| self.links.get(link.0).map(|l| l.sub) == Some(sub));

        let Some(link) = existing else {
            // First read of this dep by this subscriber: new tail link in
            // both lists.
            let version = self.deps[dep.0].version;
            let link = LinkId(self.links.insert(LinkNode {
                version,
                dep,
                sub,
                prev_dep: None,
                next_dep: None,
                prev_sub: None,
                next_sub: None,
                prev_active: None,
            }));
            self.deps[dep.0].active_link = Some(link);

            match self.subs[sub.0].deps_tail {
                None => {
                    self.subs[sub.0].deps_head = Some(link);
                    self.subs[sub.0].deps_tail = Some(link);
                }
                Some(tail) => {
                    self.links[link.0].prev_dep = Some(tail);
                    self.links[tail.0].next_dep = Some(link);
                    self.subs[sub.0].deps_tail = Some(link);
                }
            }

            self.add_sub(link);
            return Some(link);
        };

        if self.links[link.0].version == UNUSED_VERSION {
            // Read again after a previous run: revive the link and move it
            // to the tail so the list stays in first-access order.
            let version = self.deps[dep.0].version;
            self.links[link.0].version = version;

            if let Some(next) = self.links[link.0].next_dep {
                let prev = self.links[link.0].prev_dep;
                self.links[next.0].prev_dep = prev;
                if let Some(prev) = prev {
                    self.links[prev.0].next_dep = Some(next);
                }

                let tail = self.subs[sub.0].deps_tail.expect("non-empty list has a tail");
                self.links[link.0].prev_dep = Some(tail);
                self.links[link.0].next_dep = None;
                self.links[tail.0].next_dep = Some(link);
                self.subs[sub.0].deps_tail = Some(link);

                if self.subs[sub.0].deps_head == Some(link) {
                    self.subs[sub.0].deps_head = Some(next);
                }
            }
        }

        Some(link)
    }

    /// Register a link in its dep's subscriber list.
    ///
    /// A computed gaining its first subscriber is flipped into tracking
    /// mode and lazily re-subscribed to all of its own dependencies.
    fn add_sub(&mut self, link: LinkId) {
        let (dep, sub) = {
            let l = &self.links[link.0];
            (l.dep, l.sub)
        };
        self.deps[dep.0].sub_count += 1;

        if !self.subs[sub.0].flags.contains(SubscriberFlags::TRACKING) {
            return;
        }

        if let Some(computed) = self.deps[dep.0].computed {
            if self.deps[dep.0].subs_tail.is_none() {
                self.subs[computed.0]
                    .flags
                    .insert(SubscriberFlags::TRACKING | SubscriberFlags::DIRTY);
                let mut inner = self.subs[computed.0].deps_head;
                while let Some(l) = inner {
                    let next = self.links[l.0].next_dep;
                    self.add_sub(l);
                    inner = next;
                }
            }
        }

        let tail = self.deps[dep.0].subs_tail;
        if tail != Some(link) {
            self.links[link.0].prev_sub = tail;
            if let Some(tail) = tail {
                self.links[tail.0].next_sub = Some(link);
            }
        }
        if self.deps[dep.0].subs_head.is_none() {
            self.deps[dep.0].subs_head = Some(link);
        }
        self.deps[dep.0].subs_tail = Some(link);
    }

    /// Bump versions and notify subscribers. The caller must balance the
    /// batch depth with [`batch::end_batch`] after releasing the borrow.
    pub(crate) fn trigger_dep_locked(&mut self, dep: DepId) {
        self.global_version += 1;
        if let Some(node) = self.deps.get_mut(dep.0) {
            node.version += 1;
            tracing::trace!(?dep, version = node.version, "trigger");
        }
        self.batch_depth += 1;
        self.notify_dep(dep);
    }

    /// Walk the subscriber list tail-to-head (most recent first) queueing
    /// each subscriber. When a subscriber turns out to be a computed, its
    /// own output dep is notified from this frame rather than inside the
    /// computed's notify, capping stack growth along computed chains.
    pub(crate) fn notify_dep(&mut self, dep: DepId) {
        let mut link = match self.deps.get(dep.0) {
            Some(node) => node.subs_tail,
            None => return,
        };
        while let Some(l) = link {
            let (sub, prev) = {
                let node = &self.links[l.0];
                (node.sub, node.prev_sub)
            };
            if let Some(output) = self.notify_sub(sub) {
                self.notify_dep(output);
            }
            link = prev;
        }
    }

    /// Mark one subscriber as notified. Returns the output dep to notify
    /// next when the subscriber is a computed that newly became dirty.
    fn notify_sub(&mut self, sub: SubId) -> Option<DepId> {
        let node = self.subs.get_mut(sub.0)?;
        let output = match &node.kind {
            SubKind::Effect(_) => None,
            SubKind::Computed(computed) => Some(computed.dep),
        };

        match output {
            None => {
                if node.flags.contains(SubscriberFlags::RUNNING)
                    && !node.flags.contains(SubscriberFlags::ALLOW_RECURSE)
                {
                    return None;
                }
                if !node.flags.contains(SubscriberFlags::NOTIFIED) {
                    node.flags.insert(SubscriberFlags::NOTIFIED);
                    node.next_queued = self.queued_effects;
                    self.queued_effects = Some(sub);
                }
                None
            }
            Some(output) => {
                node.flags.insert(SubscriberFlags::DIRTY);
                if !node.flags.contains(SubscriberFlags::NOTIFIED)
                    && context::active_sub() != Some(sub)
                {
                    node.flags.insert(SubscriberFlags::NOTIFIED);
                    node.next_queued = self.queued_computeds;
                    self.queued_computeds = Some(sub);
                    return Some(output);
                }
                None
            }
        }
    }

    /// Mark every existing link unused and install this run's active links,
    /// saving whatever was active before (nested runs may be tracking the
    /// same deps).
    pub(crate) fn prepare_deps(&mut self, sub: SubId) {
        let mut link = self.subs[sub.0].deps_head;
        while let Some(l) = link {
            let (dep, next) = {
                let node = &self.links[l.0];
                (node.dep, node.next_dep)
            };
            self.links[l.0].version = UNUSED_VERSION;
            if let Some(dep_node) = self.deps.get_mut(dep.0) {
                let prev_active = dep_node.active_link.replace(l);
                self.links[l.0].prev_active = prev_active;
            }
            link = next;
        }
    }

    /// Walk the dependency list backwards, dropping links the run did not
    /// re-read and restoring each dep's previous active link.
    pub(crate) fn cleanup_deps(&mut self, sub: SubId) {
        let mut head = None;
        let mut tail = self.subs[sub.0].deps_tail;
        let mut link = tail;
        while let Some(l) = link {
            let (prev, version, dep, prev_active) = {
                let node = &self.links[l.0];
                (node.prev_dep, node.version, node.dep, node.prev_active)
            };
            if let Some(dep_node) = self.deps.get_mut(dep.0) {
                dep_node.active_link = prev_active;
            }
            self.links[l.0].prev_active = None;

            if version == UNUSED_VERSION {
                if Some(l) == tail {
                    tail = prev;
                }
                self.remove_sub(l, false);
                self.unlink_dep_side(l);
                self.links.remove(l.0);
            } else {
                head = Some(l);
            }
            link = prev;
        }
        self.subs[sub.0].deps_head = head;
        self.subs[sub.0].deps_tail = tail;
    }

    /// Detach a link from its subscriber's dependency list without fixing
    /// the subscriber's head/tail (the caller owns those).
    fn unlink_dep_side(&mut self, link: LinkId) {
        let (prev, next) = {
            let node = &self.links[link.0];
            (node.prev_dep, node.next_dep)
        };
        if let Some(prev) = prev {
            self.links[prev.0].next_dep = next;
            self.links[link.0].prev_dep = None;
        }
        if let Some(next) = next {
            self.links[next.0].prev_dep = prev;
            self.links[link.0].next_dep = None;
        }
    }

    /// Fully detach a link from its subscriber's dependency list,
    /// including head/tail bookkeeping.
    pub(crate) fn remove_dep(&mut self, link: LinkId) {
        let (sub, prev, next) = {
            let node = &self.links[link.0];
            (node.sub, node.prev_dep, node.next_dep)
        };
        self.unlink_dep_side(link);
        if let Some(sub_node) = self.subs.get_mut(sub.0) {
            if sub_node.deps_head == Some(link) {
                sub_node.deps_head = next;
            }
            if sub_node.deps_tail == Some(link) {
                sub_node.deps_tail = prev;
            }
        }
    }

    /// Unlink a subscription from its dep's subscriber list.
    ///
    /// `soft` removals keep the subscriber count: a computed losing its
    /// last direct subscriber only soft-unsubscribes from its own deps,
    /// keeping them warm for cheap reactivation. Hard removals that drop
    /// the count to zero delete map-owned deps from their key map.
    pub(crate) fn remove_sub(&mut self, link: LinkId, soft: bool) {
        let (dep, prev_sub, next_sub) = {
            let node = &self.links[link.0];
            (node.dep, node.prev_sub, node.next_sub)
        };
        if let Some(prev) = prev_sub {
            self.links[prev.0].next_sub = next_sub;
            self.links[link.0].prev_sub = None;
        }
        if let Some(next) = next_sub {
            self.links[next.0].prev_sub = prev_sub;
            self.links[link.0].next_sub = None;
        }

        if self.deps.get(dep.0).is_none() {
            return;
        }

        if self.deps[dep.0].subs_head == Some(link) {
            self.deps[dep.0].subs_head = next_sub;
        }
        if self.deps[dep.0].subs_tail == Some(link) {
            self.deps[dep.0].subs_tail = prev_sub;

            if prev_sub.is_none() {
                if let Some(computed) = self.deps[dep.0].computed {
                    // Last subscriber gone: put the computed to sleep but
                    // keep its dependency list for lazy reactivation.
                    self.subs[computed.0].flags.remove(SubscriberFlags::TRACKING);
                    let mut inner = self.subs[computed.0].deps_head;
                    while let Some(l) = inner {
                        let next = self.links[l.0].next_dep;
                        self.remove_sub(l, true);
                        inner = next;
                    }
                }
            }
        }

        if !soft {
            let node = &mut self.deps[dep.0];
            node.sub_count -= 1;
            if node.sub_count == 0 {
                if let Some((target, key)) = node.owner.clone() {
                    // Property dep with no subscribers left: drop it from
                    // its key map so idle objects stop accumulating deps.
                    if let Some(map) = self.targets.get_mut(&target) {
                        map.swap_remove(&key);
                        if map.is_empty() {
                            self.targets.remove(&target);
                        }
                    }
                    self.deps.remove(dep.0);
                }
            }
        }
    }

    /// Hard-remove every dependency link of a subscriber. Used on stop.
    pub(crate) fn clear_sub_deps(&mut self, sub: SubId) {
        let mut link = self.subs[sub.0].deps_head;
        while let Some(l) = link {
            let next = self.links[l.0].next_dep;
            self.remove_sub(l, false);
            self.links.remove(l.0);
            link = next;
        }
        self.subs[sub.0].deps_head = None;
        self.subs[sub.0].deps_tail = None;
    }

    /// Unlink every remaining subscriber of a dep and free it. Used when
    /// the owning handle (signal or computed) is dropped.
    pub(crate) fn detach_dep(&mut self, dep: DepId) {
        let mut link = match self.deps.get(dep.0) {
            Some(node) => node.subs_tail,
            None => return,
        };
        while let Some(l) = link {
            let prev = self.links[l.0].prev_sub;
            self.remove_sub(l, false);
            self.remove_dep(l);
            self.links.remove(l.0);
            link = prev;
        }
        self.deps.remove(dep.0);
    }

    /// Drop a subscriber from both batch queues, repairing the chains.
    /// Needed when a still-notified subscriber is destroyed mid-batch.
    pub(crate) fn remove_from_queues(&mut self, sub: SubId) {
        for queue in [true, false] {
            let head = if queue {
                self.queued_effects
            } else {
                self.queued_computeds
            };
            let mut prev: Option<SubId> = None;
            let mut cur = head;
            while let Some(s) = cur {
                let next = self.subs.get(s.0).and_then(|n| n.next_queued);
                if s == sub {
                    match prev {
                        None => {
                            if queue {
                                self.queued_effects = next;
                            } else {
                                self.queued_computeds = next;
                            }
                        }
                        Some(prev) => {
                            if let Some(node) = self.subs.get_mut(prev.0) {
                                node.next_queued = next;
                            }
                        }
                    }
                    break;
                }
                prev = cur;
                cur = next;
            }
        }
        self.paused_dirty.remove(&sub);
    }

    pub(crate) fn dep_list(&self, sub: SubId) -> Vec<DepId> {
        let mut out = Vec::new();
        let mut link = self.subs.get(sub.0).and_then(|node| node.deps_head);
        while let Some(l) = link {
            let node = &self.links[l.0];
            out.push(node.dep);
            link = node.next_dep;
        }
        out
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("deps", &self.deps.len())
            .field("subs", &self.subs.len())
            .field("links", &self.links.len())
            .field("global_version", &self.global_version)
            .field("batch_depth", &self.batch_depth)
            .finish()
    }
}

/// Bump versions, notify, and flush if this was the outermost batch.
pub(crate) fn trigger_dep(dep: DepId) {
    with_graph(|g| g.trigger_dep_locked(dep));
    batch::end_batch();
}

/// A subscriber is dirty when any dependency's version moved past the
/// link's snapshot, refreshing computeds lazily along the way. This is the
/// pull half of the push-pull model: triggers only mark, this decides.
pub(crate) fn check_dirty(sub: SubId) -> bool {
    let mut link = with_graph(|g| g.subs.get(sub.0).and_then(|node| node.deps_head));
    while let Some(l) = link {
        let Some((dep, snapshot, next)) = with_graph(|g| {
            g.links
                .get(l.0)
                .map(|node| (node.dep, node.version, node.next_dep))
        }) else {
            return false;
        };
        let (version, computed) = with_graph(|g| match g.deps.get(dep.0) {
            Some(node) => (node.version, node.computed),
            None => (snapshot, None),
        });
        if version != snapshot {
            return true;
        }
        if let Some(computed) = computed {
            refresh_computed(computed);
            let refreshed =
                with_graph(|g| g.deps.get(dep.0).map_or(snapshot, |node| node.version));
            if refreshed != snapshot {
                return true;
            }
        }
        link = next;
    }
    false
}

/// Bring a computed's cached value up to date if anything it depends on
/// may have changed.
///
/// Three skip levels, cheapest first: flag check (tracked and not dirty),
/// global-version check (nothing anywhere changed), and a full dirty walk
/// over its dependency list. Only then does the getter actually run, and
/// the output dep's version advances only if the new value compares
/// unequal to the cached one.
pub(crate) fn refresh_computed(sub: SubId) {
    let proceed = with_graph(|g| {
        let global_version = g.global_version;
        let Some(node) = g.subs.get_mut(sub.0) else {
            return false;
        };
        let flags = node.flags;
        let SubKind::Computed(computed) = &mut node.kind else {
            return false;
        };
        // Skip paths only apply once the cache holds a value; before that
        // every read must retry the getter.
        if computed.evaluated
            && flags.contains(SubscriberFlags::TRACKING)
            && !flags.contains(SubscriberFlags::DIRTY)
        {
            return false;
        }
        if computed.evaluated && computed.last_global_version == global_version {
            node.flags.remove(SubscriberFlags::DIRTY);
            return false;
        }
        computed.last_global_version = global_version;
        node.flags.remove(SubscriberFlags::DIRTY);
        true
    });
    if !proceed {
        return;
    }

    let Some((dep, dep_version, has_deps, evaluated, recompute)) = with_graph(|g| {
        let node = g.subs.get_mut(sub.0)?;
        node.flags.insert(SubscriberFlags::RUNNING);
        let has_deps = node.deps_head.is_some();
        let (dep, evaluated, recompute) = match &node.kind {
            SubKind::Computed(computed) => (
                computed.dep,
                computed.evaluated,
                Rc::clone(&computed.recompute),
            ),
            SubKind::Effect(_) => return None,
        };
        let dep_version = g.deps[dep.0].version;
        Some((dep, dep_version, has_deps, evaluated, recompute))
    }) else {
        return;
    };

    // A computed that has run before and whose inputs all still match
    // their snapshots does not need to recompute.
    if evaluated && dep_version > 0 && has_deps && !check_dirty(sub) {
        with_graph(|g| {
            if let Some(node) = g.subs.get_mut(sub.0) {
                node.flags.remove(SubscriberFlags::RUNNING);
            }
        });
        return;
    }

    with_graph(|g| g.prepare_deps(sub));
    let prev_sub = context::set_active_sub(Some(sub));
    let prev_tracking = context::set_tracking(true);

    let result = catch_unwind(AssertUnwindSafe(|| recompute()));

    context::set_tracking(prev_tracking);
    context::set_active_sub(prev_sub);
    with_graph(|g| {
        let bump = match &result {
            Ok(changed) => g.deps[dep.0].version == 0 || *changed,
            // A failed getter still advances the version so consumers
            // re-pull (and re-raise) instead of caching the failure.
            Err(_) => true,
        };
        if bump {
            g.deps[dep.0].version += 1;
        }
        g.cleanup_deps(sub);
        if let Some(node) = g.subs.get_mut(sub.0) {
            node.flags.remove(SubscriberFlags::RUNNING);
            if result.is_ok() {
                if let SubKind::Computed(computed) = &mut node.kind {
                    computed.evaluated = true;
                }
            }
        }
    });

    if let Err(payload) = result {
        resume_unwind(payload);
    }
}
