//! Tracking Context
//!
//! The context records which subscriber is currently executing and whether
//! reads should create dependency edges at all. Both live in thread-local
//! cells: the runtime is single-threaded by design, and thread-locals keep
//! the hot read path free of synchronization.
//!
//! Tracking suspension follows a push/pop protocol so that regions can nest
//! arbitrarily: [`pause_tracking`] and [`enable_tracking`] push the previous
//! state onto a stack, [`reset_tracking`] pops it. The protocol works with
//! or without an active subscriber, so glue code can wrap arbitrary reads
//! without caring whether it runs inside an effect.

use std::cell::{Cell, RefCell};

use super::graph::SubId;

thread_local! {
    static ACTIVE_SUB: Cell<Option<SubId>> = const { Cell::new(None) };
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

/// The subscriber currently collecting dependencies, if any.
pub(crate) fn active_sub() -> Option<SubId> {
    ACTIVE_SUB.with(|cell| cell.get())
}

/// Install a new active subscriber, returning the previous one.
pub(crate) fn set_active_sub(sub: Option<SubId>) -> Option<SubId> {
    ACTIVE_SUB.with(|cell| cell.replace(sub))
}

/// Whether reads currently create dependency edges.
pub(crate) fn is_tracking() -> bool {
    SHOULD_TRACK.with(|cell| cell.get())
}

/// Set the tracking-enabled flag, returning the previous value.
pub(crate) fn set_tracking(enabled: bool) -> bool {
    SHOULD_TRACK.with(|cell| cell.replace(enabled))
}

/// Suspend dependency tracking until the matching [`reset_tracking`].
pub fn pause_tracking() {
    TRACK_STACK.with(|stack| stack.borrow_mut().push(is_tracking()));
    set_tracking(false);
}

/// Re-enable dependency tracking until the matching [`reset_tracking`].
pub fn enable_tracking() {
    TRACK_STACK.with(|stack| stack.borrow_mut().push(is_tracking()));
    set_tracking(true);
}

/// Restore the tracking state saved by the most recent
/// [`pause_tracking`] or [`enable_tracking`].
pub fn reset_tracking() {
    let restored = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
    set_tracking(restored.unwrap_or(true));
}

/// Run `f` with dependency tracking suspended.
///
/// Reads performed inside `f` do not register the current subscriber as a
/// dependent. Tracking is restored even if `f` panics.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    struct Reset;

    impl Drop for Reset {
        fn drop(&mut self) {
            reset_tracking();
        }
    }

    pause_tracking();
    let _reset = Reset;
    f()
}
