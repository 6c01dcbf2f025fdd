//! Batching
//!
//! Every trigger opens an implicit batch; [`batch`] opens an explicit one
//! around several writes. Notified effects accumulate in a queue and run
//! once, when the outermost batch closes. Computeds never run from the
//! queue at all: the flush only clears their notified bit, because their
//! values are pulled lazily.
//!
//! Queues are intrusive LIFO stacks threaded through each subscriber's
//! `next_queued` field, so queueing allocates nothing. Combined with the
//! tail-to-head notify walk, effects registered on one dep still flush in
//! registration order.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use super::effect;
use super::flags::SubscriberFlags;
use super::graph::{with_graph, SubId};

/// Open a batch. Triggers will queue effects without running them until
/// the matching [`end_batch`].
pub fn start_batch() {
    with_graph(|g| g.batch_depth += 1);
}

/// Close a batch. The outermost close flushes the queued effects.
///
/// If several queued effects panic, the first payload is re-raised after
/// the rest of the queue has run.
pub fn end_batch() {
    let depth = with_graph(|g| {
        if g.batch_depth == 0 {
            tracing::warn!("end_batch called without a matching start_batch; ignored");
            return None;
        }
        g.batch_depth -= 1;
        Some(g.batch_depth)
    });
    if depth != Some(0) {
        return;
    }

    // Computeds were queued only so their notified bit could be cleared
    // here; their values refresh lazily on the next pull.
    with_graph(|g| {
        let mut next = g.queued_computeds.take();
        while let Some(sub) = next {
            let Some(node) = g.subs.get_mut(sub.0) else {
                break;
            };
            node.flags.remove(SubscriberFlags::NOTIFIED);
            next = node.next_queued.take();
        }
    });

    let mut first_error: Option<Box<dyn std::any::Any + Send>> = None;
    loop {
        let Some(sub) = pop_queued_effect() else {
            break;
        };
        let result = catch_unwind(AssertUnwindSafe(|| effect::dispatch(sub)));
        if let Err(payload) = result {
            tracing::debug!("queued effect panicked; continuing the flush");
            if first_error.is_none() {
                first_error = Some(payload);
            }
        }
    }

    if let Some(payload) = first_error {
        resume_unwind(payload);
    }
}

/// Run `f` inside a batch: writes performed by `f` coalesce and their
/// effects flush once, after `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    struct Close;

    impl Drop for Close {
        fn drop(&mut self) {
            end_batch();
        }
    }

    start_batch();
    let _close = Close;
    f()
}

/// Take the next runnable effect off the queue, skipping stopped ones.
fn pop_queued_effect() -> Option<SubId> {
    with_graph(|g| {
        while let Some(sub) = g.queued_effects {
            let Some(node) = g.subs.get_mut(sub.0) else {
                g.queued_effects = None;
                return None;
            };
            g.queued_effects = node.next_queued.take();
            node.flags.remove(SubscriberFlags::NOTIFIED);
            if node.flags.contains(SubscriberFlags::ACTIVE) {
                return Some(sub);
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn unbalanced_end_batch_is_ignored() {
        end_batch();

        let s = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _e = Effect::new({
            let (s, runs) = (s.clone(), Rc::clone(&runs));
            move || {
                runs.set(runs.get() + 1);
                s.get();
            }
        });
        assert_eq!(runs.get(), 1);

        // Writes still flush; the stray close did not wedge the depth.
        s.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn explicit_start_and_end_still_pair_up() {
        let s = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _e = Effect::new({
            let (s, runs) = (s.clone(), Rc::clone(&runs));
            move || {
                runs.set(runs.get() + 1);
                s.get();
            }
        });

        start_batch();
        s.set(1);
        s.set(2);
        assert_eq!(runs.get(), 1);
        end_batch();
        assert_eq!(runs.get(), 2);
    }
}
