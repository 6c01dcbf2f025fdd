//! Effect Scopes
//!
//! A scope collects the effects, child scopes, and dispose callbacks
//! created while it is current, so that an entire subtree of reactivity
//! can be paused, resumed, or torn down with one call. Scopes form a tree:
//! a scope created while another is current becomes its child unless
//! explicitly detached.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use thiserror::Error;

use super::effect::Effect;

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("cannot run an inactive effect scope")]
    Inactive,
}

/// A container tying the lifetime of a group of effects together.
///
/// Cloning yields another handle to the same scope.
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    active: Cell<bool>,
    paused: Cell<bool>,
    detached: bool,
    /// Position in the parent's child list, for O(1) detach.
    index: Cell<usize>,
    parent: RefCell<Option<Weak<ScopeInner>>>,
    effects: RefCell<SmallVec<[Effect; 4]>>,
    cleanups: RefCell<SmallVec<[Box<dyn FnOnce()>; 2]>>,
    children: RefCell<SmallVec<[EffectScope; 2]>>,
}

impl EffectScope {
    /// Create a scope nested under the current one, if any.
    pub fn new() -> Self {
        Self::create(false)
    }

    /// Create a scope that ignores the current scope: it is not stopped
    /// when an enclosing scope stops.
    pub fn detached() -> Self {
        Self::create(true)
    }

    fn create(detached: bool) -> Self {
        let scope = Self {
            inner: Rc::new(ScopeInner {
                active: Cell::new(true),
                paused: Cell::new(false),
                detached,
                index: Cell::new(0),
                parent: RefCell::new(None),
                effects: RefCell::new(SmallVec::new()),
                cleanups: RefCell::new(SmallVec::new()),
                children: RefCell::new(SmallVec::new()),
            }),
        };
        if !detached {
            if let Some(parent) = current_scope() {
                if parent.inner.active.get() {
                    let mut children = parent.inner.children.borrow_mut();
                    scope.inner.index.set(children.len());
                    *scope.inner.parent.borrow_mut() = Some(Rc::downgrade(&parent.inner));
                    children.push(scope.clone());
                }
            }
        }
        scope
    }

    /// Run `f` with this scope as the current one, so effects and child
    /// scopes created inside are collected here.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R, ScopeError> {
        if !self.inner.active.get() {
            return Err(ScopeError::Inactive);
        }

        struct Restore(Option<EffectScope>);

        impl Drop for Restore {
            fn drop(&mut self) {
                ACTIVE_SCOPE.with(|cell| *cell.borrow_mut() = self.0.take());
            }
        }

        let prev = ACTIVE_SCOPE.with(|cell| cell.borrow_mut().replace(self.clone()));
        let _restore = Restore(prev);
        Ok(f())
    }

    /// Pause every effect in this scope and its descendants.
    pub fn pause(&self) {
        if !self.inner.active.get() || self.inner.paused.replace(true) {
            return;
        }
        for child in self.inner.children.borrow().iter() {
            child.pause();
        }
        for effect in self.inner.effects.borrow().iter() {
            effect.pause();
        }
    }

    /// Resume a paused scope; effects triggered while paused run once.
    pub fn resume(&self) {
        if !self.inner.active.get() || !self.inner.paused.replace(false) {
            return;
        }
        for child in self.inner.children.borrow().iter() {
            child.resume();
        }
        for effect in self.inner.effects.borrow().iter() {
            effect.resume();
        }
    }

    /// Stop the scope: child scopes first, then effects, then dispose
    /// callbacks in registration order. Idempotent.
    pub fn stop(&self) {
        self.stop_inner(false);
    }

    fn stop_inner(&self, from_parent: bool) {
        if !self.inner.active.replace(false) {
            return;
        }

        let children = self.inner.children.take();
        for child in children {
            child.stop_inner(true);
        }

        let effects = self.inner.effects.take();
        for effect in effects {
            effect.stop();
        }

        let cleanups = self.inner.cleanups.take();
        for cleanup in cleanups {
            cleanup();
        }

        // Unhook from the parent's child list so the parent does not keep
        // this scope alive. Skipped when the parent itself is tearing down.
        if !from_parent {
            let parent = self.inner.parent.borrow_mut().take();
            if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
                let index = self.inner.index.get();
                let mut siblings = parent.children.borrow_mut();
                if let Some(last) = siblings.pop() {
                    if !Rc::ptr_eq(&last.inner, &self.inner) {
                        last.inner.index.set(index);
                        siblings[index] = last;
                    }
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    pub(crate) fn add_effect(&self, effect: &Effect) {
        self.inner.effects.borrow_mut().push(effect.clone());
    }

    fn add_cleanup(&self, f: Box<dyn FnOnce()>) {
        self.inner.cleanups.borrow_mut().push(f);
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EffectScope {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.inner.active.get())
            .field("paused", &self.inner.paused.get())
            .field("detached", &self.inner.detached)
            .field("effects", &self.inner.effects.borrow().len())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

/// The scope new effects are currently collected into, if any.
pub fn current_scope() -> Option<EffectScope> {
    ACTIVE_SCOPE.with(|cell| cell.borrow().clone())
}

/// Register a callback to run when the current scope stops. Outside any
/// scope this warns and does nothing.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    match current_scope() {
        Some(scope) if scope.is_active() => scope.add_cleanup(Box::new(f)),
        _ => {
            tracing::warn!("on_scope_dispose called outside an active effect scope; ignored");
        }
    }
}

/// Attach a freshly created effect to the current scope.
pub(crate) fn register_effect(effect: &Effect) {
    if let Some(scope) = current_scope() {
        if scope.is_active() {
            scope.add_effect(effect);
        }
    }
}
