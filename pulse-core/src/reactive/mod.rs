//! Reactive Runtime
//!
//! Fine-grained push-pull reactivity: writes push cheap invalidation marks
//! through a dependency graph, reads pull fresh values lazily.
//!
//! # Concepts
//!
//! - [`Signal`]: a writable reactive value. Reads inside an effect or
//!   computed register a dependency; writes notify dependents.
//! - [`Computed`]: a cached derivation. Recomputes only when pulled while
//!   possibly stale, and propagates a change only when the new value is
//!   actually different.
//! - [`Effect`]: a side-effecting computation that re-runs when its
//!   dependencies change. Re-runs are deduplicated per batch.
//! - [`EffectScope`]: ties the lifetime of a group of effects and child
//!   scopes together for collective pause/resume/stop.
//! - [`batch`]: coalesces several writes into a single flush.
//! - [`track`]/[`trigger`]: the keyed interception interface for host
//!   collections that are not signals.
//!
//! # Example
//!
//! ```
//! use pulse_core::reactive::{batch, Computed, Effect, Signal};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let width = Signal::new(2);
//! let height = Signal::new(3);
//! let area = Computed::new({
//!     let (width, height) = (width.clone(), height.clone());
//!     move || width.get() * height.get()
//! });
//!
//! let seen = Rc::new(Cell::new(0));
//! let _effect = Effect::new({
//!     let (area, seen) = (area.clone(), seen.clone());
//!     move || seen.set(area.get())
//! });
//! assert_eq!(seen.get(), 6);
//!
//! batch(|| {
//!     width.set(4);
//!     height.set(5);
//! });
//! assert_eq!(seen.get(), 20);
//! ```

mod arena;
mod batch;
mod computed;
mod context;
mod effect;
mod flags;
mod graph;
mod scope;
mod signal;
mod target;

pub use batch::{batch, end_batch, start_batch};
pub use computed::Computed;
pub use context::{enable_tracking, pause_tracking, reset_tracking, untracked};
pub use effect::{on_effect_cleanup, Effect};
pub use graph::{global_version, DepId};
pub use scope::{current_scope, on_scope_dispose, EffectScope, ScopeError};
pub use signal::Signal;
pub use target::{
    get_dep_from_reactive, track, trigger, DepKey, TargetId, TargetKind, TrackKind, TriggerKind,
};
