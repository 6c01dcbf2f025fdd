//! Signals
//!
//! A [`Signal`] is the basic writable reactive value: reads register the
//! active subscriber as a dependent, writes bump the backing dep's version
//! and notify. The value itself lives next to the handle; the graph only
//! stores the version and subscription bookkeeping.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::graph::{self, try_with_graph, with_graph, DepId};

/// A reactive value cell.
///
/// Cloning a signal is cheap and yields a second handle to the same cell.
/// When the last handle drops, the backing dep is detached from all of its
/// subscribers.
pub struct Signal<T: Clone + 'static> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    dep: DepId,
    value: RefCell<T>,
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        let dep = with_graph(|g| g.new_dep(None, None));
        Self {
            inner: Rc::new(SignalInner {
                dep,
                value: RefCell::new(value),
            }),
        }
    }

    /// The dep backing this signal.
    pub fn id(&self) -> DepId {
        self.inner.dep
    }

    /// Read the value, registering the active subscriber as a dependent.
    pub fn get(&self) -> T {
        with_graph(|g| {
            g.track_dep(self.inner.dep);
        });
        self.inner.value.borrow().clone()
    }

    /// Read the value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Replace the value and notify subscribers.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        graph::trigger_dep(self.inner.dep);
    }

    /// Update the value in place and notify subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        graph::trigger_dep(self.inner.dep);
    }

    /// Number of subscriptions currently watching this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count().unwrap_or(0)
    }
}

impl<T: Clone + 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("dep", &self.inner.dep)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        let dep = self.dep;
        try_with_graph(|g| g.detach_dep(dep));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_round_trip() {
        let s = Signal::new(1);
        assert_eq!(s.get(), 1);

        s.set(5);
        assert_eq!(s.get(), 5);

        s.update(|v| *v += 1);
        assert_eq!(s.get(), 6);
    }

    #[test]
    fn clones_share_the_cell() {
        let a = Signal::new(String::from("x"));
        let b = a.clone();

        b.set(String::from("y"));
        assert_eq!(a.get(), "y");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn set_bumps_the_version() {
        let s = Signal::new(0);
        let before = s.id().version().unwrap();

        s.set(1);
        assert_eq!(s.id().version().unwrap(), before + 1);
    }

    #[test]
    fn set_advances_the_global_version_even_without_subscribers() {
        let s = Signal::new(0);
        let before = graph::global_version();

        s.set(1);
        assert_eq!(graph::global_version(), before + 1);
    }

    #[test]
    fn drop_frees_the_dep() {
        let s = Signal::new(0);
        let id = s.id();
        drop(s);

        assert_eq!(id.version(), None);
    }
}
