#![forbid(unsafe_code)]

//! A value-less notification bus.
//!
//! `EventSource<E>` carries discrete events to listeners without retaining
//! state. It shares the weak-callback machinery of
//! [`Observable`](crate::Observable): listeners are notified in
//! registration order, no borrow is held while they run, and dropping the
//! [`Registration`] unsubscribes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::registration::Registration;

type Listener<E> = dyn Fn(&E);

/// A synchronous event bus for values of type `E`.
pub struct EventSource<E> {
    listeners: Rc<RefCell<Vec<Weak<Listener<E>>>>>,
}

impl<E> Clone for EventSource<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: Rc::clone(&self.listeners),
        }
    }
}

impl<E: 'static> Default for EventSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> EventSource<E> {
    /// Create an event source with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Deliver `event` to all current listeners, in registration order.
    pub fn fire(&self, event: &E) {
        let live: Vec<Rc<Listener<E>>> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener(event);
        }
    }

    /// Listen for events. Dropping the [`Registration`] unsubscribes.
    #[must_use]
    pub fn listen(&self, listener: impl Fn(&E) + 'static) -> Registration {
        let listener: Rc<Listener<E>> = Rc::new(listener);
        self.listeners.borrow_mut().push(Rc::downgrade(&listener));
        Registration::new(move || drop(listener))
    }
}

impl<E> std::fmt::Debug for EventSource<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn fire_reaches_listeners_in_order() {
        let source: EventSource<i32> = EventSource::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let regs: Vec<_> = (0..2)
            .map(|i| {
                let o = Rc::clone(&order);
                source.listen(move |e| o.borrow_mut().push((i, *e)))
            })
            .collect();
        source.fire(&42);
        assert_eq!(*order.borrow(), vec![(0, 42), (1, 42)]);
        drop(regs);
    }

    #[test]
    fn dropped_registration_stops_delivery() {
        let source: EventSource<()> = EventSource::new();
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        let reg = source.listen(move |()| f.set(f.get() + 1));
        source.fire(&());
        reg.remove();
        source.fire(&());
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn fire_with_no_listeners_is_noop() {
        let source: EventSource<String> = EventSource::new();
        source.fire(&"nobody home".to_string());
    }
}
