#![forbid(unsafe_code)]

//! Identity keys for source and target objects.
//!
//! The registry resolves *object identity*, not value equality: two equal
//! model values held behind different `Rc` allocations are different
//! sources. [`ObjectKey`] captures the address of a shared allocation as an
//! opaque `Copy + Eq + Hash` key; [`Identity`] is implemented by anything
//! that can produce one.
//!
//! # Invariants
//!
//! 1. All clones of one `Rc` (or one reactive handle) produce the same key.
//! 2. Keys of two live allocations never collide.
//!
//! # Failure Modes
//!
//! - A key taken from a dropped-and-reallocated object may equal a key of a
//!   newer object. The engine only keys objects it holds alive, so this
//!   cannot be observed through the registry.

use std::rc::Rc;

use treesync_reactive::{Observable, ObservableList};

/// Opaque identity key derived from the address of a shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey(usize);

impl ObjectKey {
    /// Build a key from a raw allocation address.
    #[must_use]
    pub fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    /// The raw address value.
    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }
}

/// Objects with a stable shared identity, usable as registry keys.
pub trait Identity: Clone + 'static {
    /// Identity key of the underlying shared allocation.
    fn identity(&self) -> ObjectKey;
}

impl<T: 'static> Identity for Rc<T> {
    fn identity(&self) -> ObjectKey {
        ObjectKey::from_addr(Rc::as_ptr(self) as usize)
    }
}

impl<T: Clone + PartialEq + 'static> Identity for Observable<T> {
    fn identity(&self) -> ObjectKey {
        ObjectKey::from_addr(self.addr())
    }
}

impl<T: Clone + PartialEq + 'static> Identity for ObservableList<T> {
    fn identity(&self) -> ObjectKey {
        ObjectKey::from_addr(self.addr())
    }
}
