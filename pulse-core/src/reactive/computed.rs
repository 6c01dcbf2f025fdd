//! Computeds
//!
//! A [`Computed`] derives a cached value from other reactive sources. It is
//! both a subscriber (of the values its getter reads) and a dep (for
//! whatever reads it). Nothing is computed on write: a trigger only marks
//! the computed dirty, and the next read decides whether the getter really
//! needs to run.
//!
//! The output dep's version advances only when the recomputed value
//! compares unequal to the cached one, so equal-value recomputations stop
//! change propagation at this node.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::graph::{
    refresh_computed, try_with_graph, with_graph, ComputedNode, DepId, SubId, SubKind, SubNode,
};
use super::flags::SubscriberFlags;

/// A lazily evaluated, cached derivation.
///
/// Cloning yields another handle to the same cache. The value type must be
/// `PartialEq` so recomputations that produce an equal value can be
/// detected and suppressed.
pub struct Computed<T: Clone + PartialEq + 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    sub: SubId,
    dep: DepId,
    value: Rc<RefCell<Option<T>>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    pub fn new(getter: impl Fn() -> T + 'static) -> Self {
        Self::with_previous(move |_| getter())
    }

    /// Like [`Computed::new`], but the getter also receives the previously
    /// cached value, if any.
    pub fn with_previous(getter: impl Fn(Option<&T>) -> T + 'static) -> Self {
        let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let cache = Rc::clone(&value);
        let recompute: Rc<dyn Fn() -> bool> = Rc::new(move || {
            // Clone the previous value out so the getter can freely read
            // other computeds sharing this cache cell.
            let previous = cache.borrow().clone();
            let next = getter(previous.as_ref());
            let changed = previous.as_ref() != Some(&next);
            *cache.borrow_mut() = Some(next);
            changed
        });

        let (sub, dep) = with_graph(|g| {
            let dep = g.new_dep(None, None);
            let sub = SubId(g.subs.insert(SubNode {
                flags: SubscriberFlags::DIRTY,
                deps_head: None,
                deps_tail: None,
                next_queued: None,
                kind: SubKind::Computed(ComputedNode {
                    dep,
                    last_global_version: g.global_version.wrapping_sub(1),
                    recompute,
                    evaluated: false,
                }),
            }));
            g.deps[dep.0].computed = Some(sub);
            (sub, dep)
        });

        Self {
            inner: Rc::new(ComputedInner { sub, dep, value }),
        }
    }

    /// Read the value, refreshing it if stale and registering the active
    /// subscriber as a dependent.
    pub fn get(&self) -> T {
        let link = with_graph(|g| g.track_dep(self.inner.dep));
        refresh_computed(self.inner.sub);
        if let Some(link) = link {
            // The refresh may have advanced the output version; re-sync the
            // caller's snapshot so it is not spuriously dirty.
            with_graph(|g| {
                if let Some(dep) = g.deps.get(self.inner.dep.0) {
                    let version = dep.version;
                    if let Some(node) = g.links.get_mut(link.0) {
                        node.version = version;
                    }
                }
            });
        }
        self.inner
            .value
            .borrow()
            .clone()
            .expect("computed has a value after refresh")
    }

    /// Read the value without registering a dependency. Still refreshes.
    pub fn peek(&self) -> T {
        refresh_computed(self.inner.sub);
        self.inner
            .value
            .borrow()
            .clone()
            .expect("computed has a value after refresh")
    }

    /// The output dep downstream subscribers link to.
    pub fn id(&self) -> DepId {
        self.inner.dep
    }

    /// Version of the output dep; advances only on actual value changes.
    pub fn version(&self) -> u64 {
        self.inner.dep.version().unwrap_or(0)
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("dep", &self.inner.dep)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        let sub = self.sub;
        let dep = self.dep;
        let released = try_with_graph(|g| {
            g.remove_from_queues(sub);
            // Hard-unsubscribe from every input, including ones left warm
            // by an earlier soft removal.
            let mut link = g.subs.get(sub.0).and_then(|node| node.deps_head);
            while let Some(l) = link {
                let next = g.links.get(l.0).and_then(|node| node.next_dep);
                g.remove_sub(l, false);
                g.links.remove(l.0);
                link = next;
            }
            if let Some(node) = g.subs.get_mut(sub.0) {
                node.deps_head = None;
                node.deps_tail = None;
            }
            g.detach_dep(dep);
            g.subs.remove(sub.0)
        });
        // The node owns the recompute closure; dropping it here, after the
        // borrow is released, lets captured handles tear down reactive
        // values of their own.
        drop(released);
    }
}
