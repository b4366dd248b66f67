#![forbid(unsafe_code)]

//! Reactive primitives consumed by the treesync engine.
//!
//! This crate provides the minimal observable contracts a synchronization
//! engine needs from its embedding application:
//!
//! - [`Observable`]: a shared, version-tracked value wrapper firing
//!   (old, new) change notifications via subscriber callbacks.
//! - [`ObservableList`]: a mutable ordered container firing synchronous
//!   [`ListChange`] add/remove notifications.
//! - [`EventSource`]: a value-less notification bus.
//! - [`Registration`]: RAII handle representing one active subscription or
//!   effect; releases on drop, or eagerly via [`Registration::remove`].
//!
//! # Architecture
//!
//! All types use `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers and cleaned up lazily
//! during notification; a [`Registration`] keeps the strong reference alive.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. Setting an [`Observable`] to a value equal to the current one is a
//!    no-op (no version bump, no notifications).
//! 3. No `RefCell` borrow is held while a subscriber callback runs, so
//!    callbacks may freely read or mutate the source they observe.
//! 4. Dropping (or removing) a [`Registration`] prevents any further
//!    callback delivery through it.

pub mod event;
pub mod list;
pub mod observable;
pub mod registration;

pub use event::EventSource;
pub use list::{ListChange, ObservableList};
pub use observable::Observable;
pub use registration::Registration;
