#![forbid(unsafe_code)]

//! A shared, version-tracked value wrapper with change notification.
//!
//! `Observable<T>` is a cheap cloneable handle over `Rc<RefCell<..>>` state.
//! Subscribers receive `(old, new)` on every effective change. Clones share
//! the same underlying value, so setting through one clone notifies
//! subscribers registered through any other.
//!
//! # Invariants
//!
//! 1. The version increments exactly once per mutation that changes the
//!    value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op.
//! 4. No borrow is held while callbacks run; a callback may call `get`,
//!    `set`, or `subscribe` on the same observable.
//!
//! # Failure Modes
//!
//! - Callback panic: propagates to the `set` caller; remaining subscribers
//!   for that change are skipped.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::registration::Registration;

type Subscriber<T> = dyn Fn(&T, &T);

struct Inner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Subscriber<T>>>,
}

/// A property-like reactive value: `get()`, `set()`, and `(old, new)`
/// change subscription.
pub struct Observable<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Current value, cloned.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Read the current value through a borrow, without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value, notifying subscribers with `(old, new)`.
    /// Equal values are a no-op.
    pub fn set(&self, value: T) {
        let old = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.version += 1;
            std::mem::replace(&mut inner.value, value.clone())
        };
        self.notify(&old, &value);
    }

    /// Subscribe to changes. The callback receives `(old, new)` after every
    /// effective `set`. The returned [`Registration`] keeps the
    /// subscription alive; dropping it unsubscribes.
    #[must_use]
    pub fn subscribe(&self, callback: impl Fn(&T, &T) + 'static) -> Registration {
        let callback: Rc<Subscriber<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&callback));
        Registration::new(move || drop(callback))
    }

    /// Number of effective mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Whether two handles share the same underlying value.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Address of the shared allocation; stable for the life of all clones.
    /// Used as an identity key by consumers that index observables.
    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn notify(&self, old: &T, new: &T) {
        // Upgrade under the borrow, call outside it; drop dead weaks.
        let live: Vec<Rc<Subscriber<T>>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner
                .subscribers
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        };
        for callback in live {
            callback(old, new);
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.inner.borrow().value)
            .field("version", &self.inner.borrow().version)
            .finish()
    }
}
