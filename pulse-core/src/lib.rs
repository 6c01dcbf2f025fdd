//! # pulse-core
//!
//! Core runtime for the Pulse UI framework: a fine-grained push-pull
//! reactive system. Values are read through [`reactive::Signal`] and
//! [`reactive::Computed`] handles, side effects subscribe through
//! [`reactive::Effect`], and writes propagate as cheap version bumps that
//! are resolved lazily at read time.
//!
//! The runtime is single-threaded: each thread owns an independent
//! dependency graph, and handles do not cross threads.

pub mod reactive;

pub use reactive::{batch, Computed, Effect, EffectScope, Signal};
