//! Subscriber state flags.
//!
//! Every subscriber (effect or computed) carries its state as a single
//! bitmask so that copying and comparing state is a byte operation. Each
//! bit is an independent boolean predicate:
//!
//! - `ACTIVE`: the subscriber has not been stopped. Effects only.
//! - `RUNNING`: the subscriber's computation is currently on the stack.
//! - `TRACKING`: reads performed by the subscriber should record links.
//!   For a computed this also means "has at least one subscriber of its own".
//! - `NOTIFIED`: already sitting in a batch queue; used for deduplication.
//! - `DIRTY`: a dependency definitely changed; recompute on next pull.
//! - `ALLOW_RECURSE`: a trigger fired during the subscriber's own run may
//!   re-queue it instead of being ignored.
//! - `PAUSED`: triggers are parked in the paused set instead of running.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SubscriberFlags(u8);

impl SubscriberFlags {
    pub(crate) const ACTIVE: Self = Self(1 << 0);
    pub(crate) const RUNNING: Self = Self(1 << 1);
    pub(crate) const TRACKING: Self = Self(1 << 2);
    pub(crate) const NOTIFIED: Self = Self(1 << 3);
    pub(crate) const DIRTY: Self = Self(1 << 4);
    pub(crate) const ALLOW_RECURSE: Self = Self(1 << 5);
    pub(crate) const PAUSED: Self = Self(1 << 6);

    pub(crate) fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for SubscriberFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SubscriberFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SubscriberFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (bit, name) in [
            (Self::ACTIVE, "ACTIVE"),
            (Self::RUNNING, "RUNNING"),
            (Self::TRACKING, "TRACKING"),
            (Self::NOTIFIED, "NOTIFIED"),
            (Self::DIRTY, "DIRTY"),
            (Self::ALLOW_RECURSE, "ALLOW_RECURSE"),
            (Self::PAUSED, "PAUSED"),
        ] {
            if self.contains(bit) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}
