#![forbid(unsafe_code)]

//! A mutable ordered container with synchronous add/remove notifications.
//!
//! `ObservableList<T>` is the collection-like contract of the engine: every
//! structural mutation fires a [`ListChange`] to all listeners before the
//! mutating call returns. Listeners use the same weak-callback machinery as
//! [`Observable`](crate::Observable).
//!
//! # Invariants
//!
//! 1. Events carry the index and item of the mutation; indices refer to the
//!    list state at the moment the event fires (post-insert, pre-removal
//!    compaction).
//! 2. Listeners are notified in registration order.
//! 3. No borrow is held while listeners run; a listener may read the list.
//!
//! # Failure Modes
//!
//! - `insert`/`remove` with an out-of-bounds index panics, matching `Vec`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::registration::Registration;

/// One structural mutation of an [`ObservableList`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange<T> {
    /// `item` was inserted at `index`.
    Inserted { index: usize, item: T },
    /// `item` was removed from `index`.
    Removed { index: usize, item: T },
}

type Listener<T> = dyn Fn(&ListChange<T>);

struct Inner<T> {
    items: Vec<T>,
    listeners: Vec<Weak<Listener<T>>>,
}

/// An ordered list firing synchronous [`ListChange`] notifications.
pub struct ObservableList<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> ObservableList<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                items: Vec::new(),
                listeners: Vec::new(),
            })),
        }
    }

    /// Create a list seeded with `items` (no events fire for the seed).
    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                items,
                listeners: Vec::new(),
            })),
        }
    }

    /// Insert `item` at `index`, firing [`ListChange::Inserted`].
    pub fn insert(&self, index: usize, item: T) {
        self.inner.borrow_mut().items.insert(index, item.clone());
        self.notify(&ListChange::Inserted { index, item });
    }

    /// Append `item`, firing [`ListChange::Inserted`].
    pub fn push(&self, item: T) {
        let index = self.len();
        self.insert(index, item);
    }

    /// Remove and return the item at `index`, firing [`ListChange::Removed`].
    pub fn remove(&self, index: usize) -> T {
        let item = self.inner.borrow_mut().items.remove(index);
        self.notify(&ListChange::Removed {
            index,
            item: item.clone(),
        });
        item
    }

    /// Remove every item, back to front, firing one event per removal.
    pub fn clear(&self) {
        while !self.is_empty() {
            let last = self.len() - 1;
            self.remove(last);
        }
    }

    /// Clone of the item at `index`, if in bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.borrow().items.get(index).cloned()
    }

    /// Position of the first item equal to `item`.
    #[must_use]
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.inner.borrow().items.iter().position(|x| x == item)
    }

    /// Snapshot of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.borrow().items.clone()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Listen for structural changes. Dropping the [`Registration`]
    /// unsubscribes.
    #[must_use]
    pub fn listen(&self, listener: impl Fn(&ListChange<T>) + 'static) -> Registration {
        let listener: Rc<Listener<T>> = Rc::new(listener);
        self.inner
            .borrow_mut()
            .listeners
            .push(Rc::downgrade(&listener));
        Registration::new(move || drop(listener))
    }

    /// Address of the shared allocation; stable for the life of all clones.
    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn notify(&self, change: &ListChange<T>) {
        let live: Vec<Rc<Listener<T>>> = {
            let mut inner = self.inner.borrow_mut();
            inner.listeners.retain(|w| w.strong_count() > 0);
            inner.listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener(change);
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("items", &self.inner.borrow().items)
            .finish()
    }
}
