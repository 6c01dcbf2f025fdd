//! Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs when any
//! value it read during its last run changes.
//!
//! # How It Works
//!
//! 1. Creation runs the body once to collect the initial dependency set.
//!    If that first run panics, the effect is stopped before the panic is
//!    re-raised, so a broken body never stays subscribed.
//!
//! 2. Each run starts by marking every existing link unused; links the body
//!    re-reads are revived, links it does not are pruned afterwards. The
//!    dependency set therefore always mirrors exactly the latest run.
//!
//! 3. Triggers do not run the effect directly. They queue it, and the batch
//!    flush dispatches it: paused effects are parked, scheduled effects get
//!    their scheduler called, plain effects re-run if actually dirty.

use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use super::context;
use super::flags::SubscriberFlags;
use super::graph::{
    check_dirty, try_with_graph, with_graph, DepId, EffectNode, SubId, SubKind, SubNode,
};
use super::scope;

/// A running reactive computation.
///
/// Cloning yields another handle to the same effect. The effect stays
/// alive while any handle does; the enclosing [`EffectScope`]
/// (super::EffectScope) holds one, so effects created inside a scope
/// outlive their local binding until the scope stops.
pub struct Effect {
    inner: Rc<EffectInner>,
}

struct EffectInner {
    id: SubId,
}

impl Effect {
    /// Create an effect and run it once to collect dependencies.
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self::build(Rc::new(f), None)
    }

    /// Create an effect whose re-runs are delegated to `scheduler`.
    ///
    /// When the effect is notified, the flush calls `scheduler` instead of
    /// the body; the scheduler decides when (or whether) to call
    /// [`Effect::run`].
    pub fn with_scheduler(f: impl Fn() + 'static, scheduler: impl Fn() + 'static) -> Self {
        Self::build(Rc::new(f), Some(Rc::new(scheduler)))
    }

    fn build(body: Rc<dyn Fn()>, scheduler: Option<Rc<dyn Fn()>>) -> Self {
        let id = with_graph(|g| {
            SubId(g.subs.insert(SubNode {
                flags: SubscriberFlags::ACTIVE | SubscriberFlags::TRACKING,
                deps_head: None,
                deps_tail: None,
                next_queued: None,
                kind: SubKind::Effect(EffectNode {
                    body,
                    scheduler,
                    cleanup: None,
                }),
            }))
        });
        let effect = Self {
            inner: Rc::new(EffectInner { id }),
        };
        scope::register_effect(&effect);

        let result = catch_unwind(AssertUnwindSafe(|| run_effect(id)));
        if let Err(payload) = result {
            effect.stop();
            resume_unwind(payload);
        }
        effect
    }

    /// Re-run the body unconditionally, re-collecting dependencies.
    pub fn run(&self) {
        run_effect(self.inner.id);
    }

    /// Re-run only if a dependency actually changed since the last run.
    pub fn run_if_dirty(&self) {
        run_if_dirty(self.inner.id);
    }

    /// Stop the effect: unsubscribe from every dep and run the pending
    /// cleanup. Subsequent triggers are ignored; [`Effect::run`] still
    /// executes the body, untracked.
    pub fn stop(&self) {
        stop_effect(self.inner.id);
    }

    /// Park the effect: triggers mark it dirty but do not run it until
    /// [`Effect::resume`].
    pub fn pause(&self) {
        with_graph(|g| {
            if let Some(node) = g.subs.get_mut(self.inner.id.0) {
                node.flags.insert(SubscriberFlags::PAUSED);
            }
        });
    }

    /// Unpark the effect, running it once if it was triggered while paused.
    pub fn resume(&self) {
        let id = self.inner.id;
        let pending = with_graph(|g| {
            let Some(node) = g.subs.get_mut(id.0) else {
                return false;
            };
            if !node.flags.contains(SubscriberFlags::PAUSED) {
                return false;
            }
            node.flags.remove(SubscriberFlags::PAUSED);
            g.paused_dirty.remove(&id)
        });
        if pending {
            dispatch(id);
        }
    }

    /// Allow the effect's own writes to re-queue it instead of being
    /// swallowed by the re-entrancy guard.
    pub fn set_allow_recurse(&self, allow: bool) {
        with_graph(|g| {
            if let Some(node) = g.subs.get_mut(self.inner.id.0) {
                if allow {
                    node.flags.insert(SubscriberFlags::ALLOW_RECURSE);
                } else {
                    node.flags.remove(SubscriberFlags::ALLOW_RECURSE);
                }
            }
        });
    }

    pub fn is_active(&self) -> bool {
        with_graph(|g| {
            g.subs
                .get(self.inner.id.0)
                .is_some_and(|node| node.flags.contains(SubscriberFlags::ACTIVE))
        })
    }

    /// Whether any dependency changed since the last run.
    pub fn is_dirty(&self) -> bool {
        check_dirty(self.inner.id)
    }

    /// The deps this effect read during its last run, in first-access
    /// order.
    pub fn dependencies(&self) -> Vec<DepId> {
        with_graph(|g| g.dep_list(self.inner.id))
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies().len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        let id = self.id;
        // The removed node owns the user closures. It must leave the
        // borrow before being dropped: a captured handle may be the last
        // one to another reactive value, whose Drop re-enters the graph.
        let released = try_with_graph(|g| {
            g.remove_from_queues(id);
            if g.subs
                .get(id.0)
                .is_some_and(|node| node.flags.contains(SubscriberFlags::ACTIVE))
            {
                g.clear_sub_deps(id);
            }
            g.subs.remove(id.0)
        })
        .flatten();
        if let Some(mut node) = released {
            let cleanup = match &mut node.kind {
                SubKind::Effect(effect) => effect.cleanup.take(),
                SubKind::Computed(_) => None,
            };
            drop(node);
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        }
    }
}

/// Register a cleanup to run before the enclosing effect's next run and
/// when it stops. Outside an effect this warns and does nothing.
pub fn on_effect_cleanup(f: impl FnOnce() + 'static) {
    let mut replaced = None;
    let registered = match context::active_sub() {
        Some(sub) => with_graph(|g| match g.subs.get_mut(sub.0) {
            Some(SubNode {
                kind: SubKind::Effect(effect),
                ..
            }) => {
                replaced = effect.cleanup.replace(Box::new(f));
                true
            }
            _ => false,
        }),
        None => false,
    };
    // A displaced cleanup may own reactive handles; it drops here, after
    // the graph borrow is released.
    drop(replaced);
    if !registered {
        tracing::warn!("on_effect_cleanup called outside an active effect; ignored");
    }
}

fn run_cleanup(id: SubId) {
    let cleanup = with_graph(|g| match g.subs.get_mut(id.0) {
        Some(SubNode {
            kind: SubKind::Effect(effect),
            ..
        }) => effect.cleanup.take(),
        _ => None,
    });
    let Some(cleanup) = cleanup else {
        return;
    };
    // Cleanups must not record dependencies on the effect's behalf.
    let prev = context::set_active_sub(None);
    let result = catch_unwind(AssertUnwindSafe(cleanup));
    context::set_active_sub(prev);
    if let Err(payload) = result {
        resume_unwind(payload);
    }
}

pub(crate) fn run_effect(id: SubId) {
    let Some((body, active)) = with_graph(|g| {
        let node = g.subs.get(id.0)?;
        let body = match &node.kind {
            SubKind::Effect(effect) => Rc::clone(&effect.body),
            SubKind::Computed(_) => return None,
        };
        Some((body, node.flags.contains(SubscriberFlags::ACTIVE)))
    }) else {
        return;
    };

    if !active {
        // Stopped effects still honor an explicit run, untracked.
        body();
        return;
    }

    run_cleanup(id);
    with_graph(|g| {
        if let Some(node) = g.subs.get_mut(id.0) {
            node.flags.insert(SubscriberFlags::RUNNING);
        }
        g.prepare_deps(id);
    });

    struct RunGuard {
        id: SubId,
        prev_sub: Option<SubId>,
        prev_tracking: bool,
    }

    impl Drop for RunGuard {
        fn drop(&mut self) {
            context::set_tracking(self.prev_tracking);
            context::set_active_sub(self.prev_sub);
            with_graph(|g| {
                g.cleanup_deps(self.id);
                if let Some(node) = g.subs.get_mut(self.id.0) {
                    node.flags.remove(SubscriberFlags::RUNNING);
                }
            });
        }
    }

    let _guard = RunGuard {
        id,
        prev_sub: context::set_active_sub(Some(id)),
        prev_tracking: context::set_tracking(true),
    };
    body();
}

fn run_if_dirty(id: SubId) {
    if check_dirty(id) {
        run_effect(id);
    }
}

pub(crate) fn stop_effect(id: SubId) {
    let was_active = with_graph(|g| {
        let Some(node) = g.subs.get_mut(id.0) else {
            return false;
        };
        if !node.flags.contains(SubscriberFlags::ACTIVE) {
            return false;
        }
        node.flags.remove(SubscriberFlags::ACTIVE);
        g.clear_sub_deps(id);
        true
    });
    if was_active {
        run_cleanup(id);
    }
}

/// Called by the batch flush for each queued effect.
pub(crate) fn dispatch(id: SubId) {
    enum Next {
        Skip,
        Scheduler(Rc<dyn Fn()>),
        Run,
    }

    let next = with_graph(|g| {
        let Some(node) = g.subs.get_mut(id.0) else {
            return Next::Skip;
        };
        if node.flags.contains(SubscriberFlags::PAUSED) {
            g.paused_dirty.insert(id);
            return Next::Skip;
        }
        match &node.kind {
            SubKind::Effect(EffectNode {
                scheduler: Some(scheduler),
                ..
            }) => Next::Scheduler(Rc::clone(scheduler)),
            _ => Next::Run,
        }
    });

    match next {
        Next::Skip => {}
        Next::Scheduler(scheduler) => scheduler(),
        Next::Run => run_if_dirty(id),
    }
}
