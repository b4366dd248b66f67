#![forbid(unsafe_code)]

//! The mapping context: per-tree registry of attached mappers.
//!
//! Every attached mapper is recorded here by its node identity. Findable
//! mappers are additionally indexed by source identity, supporting reverse
//! lookup from model objects to the mappers rendering them. One source may
//! be rendered by several mappers at once (1:N); lookups scoped to an
//! ancestor disambiguate.
//!
//! # Invariants
//!
//! 1. A mapper is registered exactly once; register/unregister mismatches
//!    panic.
//! 2. The source index only holds findable mappers; [`MappingContext::
//!    get_mappings`] covers all registered mappers regardless.
//! 3. Index entries never hold an empty set: the last mapper for a source
//!    removes the entry.
//!
//! # Failure Modes
//!
//! - Registering an already-registered mapper panics.
//! - Unregistering an unknown mapper panics.
//! - Ancestor-scoped lookup matching more than one mapper panics.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use smallvec::{SmallVec, smallvec};

use treesync_reactive::Registration;

use crate::identity::{Identity, ObjectKey};
use crate::mapper::{DynMapper, MapperNode};

/// Registry lifecycle notification.
#[derive(Clone)]
pub enum MappingEvent {
    /// A mapper finished attaching and is now registered.
    Registered(DynMapper),
    /// A mapper is being detached and has left the registry.
    Unregistered(DynMapper),
}

/// Source-index entry. Most sources have exactly one mapper; the small
/// inline capacity covers the common 1:N case of two views.
enum IndexEntry {
    One(DynMapper),
    Many(SmallVec<[DynMapper; 2]>),
}

type Listener = Rc<dyn Fn(&MappingEvent)>;

/// Registry of attached mappers for one synchronized tree.
pub struct MappingContext {
    index: RefCell<AHashMap<ObjectKey, IndexEntry>>,
    mappings: RefCell<AHashMap<ObjectKey, DynMapper>>,
    listeners: RefCell<Vec<Weak<dyn Fn(&MappingEvent)>>>,
    dispose: RefCell<AHashMap<ObjectKey, Vec<Box<dyn FnOnce()>>>>,
}

impl MappingContext {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            index: RefCell::new(AHashMap::new()),
            mappings: RefCell::new(AHashMap::new()),
            listeners: RefCell::new(Vec::new()),
            dispose: RefCell::new(AHashMap::new()),
        })
    }

    /// Subscribe to register/unregister events. The listener lives as long
    /// as the returned [`Registration`].
    pub fn add_listener(&self, listener: impl Fn(&MappingEvent) + 'static) -> Registration {
        let listener: Listener = Rc::new(listener);
        self.listeners.borrow_mut().push(Rc::downgrade(&listener));
        Registration::new(move || drop(listener))
    }

    /// Run `action` when `mapper` is unregistered. Used to tear down
    /// per-mapper resources owned outside the mapper itself.
    pub fn on_unregister(&self, mapper: &DynMapper, action: impl FnOnce() + 'static) {
        self.dispose
            .borrow_mut()
            .entry(mapper.mapper_key())
            .or_default()
            .push(Box::new(action));
    }

    pub(crate) fn register(&self, mapper: &DynMapper) {
        let key = mapper.mapper_key();
        let previous = self.mappings.borrow_mut().insert(key, Rc::clone(mapper));
        assert!(previous.is_none(), "mapper is already registered");

        if mapper.is_findable() {
            let mut index = self.index.borrow_mut();
            match index.remove(&mapper.source_key()) {
                None => {
                    index.insert(mapper.source_key(), IndexEntry::One(Rc::clone(mapper)));
                }
                Some(IndexEntry::One(existing)) => {
                    index.insert(
                        mapper.source_key(),
                        IndexEntry::Many(smallvec![existing, Rc::clone(mapper)]),
                    );
                }
                Some(IndexEntry::Many(mut set)) => {
                    set.push(Rc::clone(mapper));
                    index.insert(mapper.source_key(), IndexEntry::Many(set));
                }
            }
        }

        self.fire(&MappingEvent::Registered(Rc::clone(mapper)));
    }

    pub(crate) fn unregister(&self, mapper: &DynMapper) {
        let key = mapper.mapper_key();
        let removed = self.mappings.borrow_mut().remove(&key);
        assert!(removed.is_some(), "mapper is not registered");

        if mapper.is_findable() {
            let mut index = self.index.borrow_mut();
            match index.remove(&mapper.source_key()) {
                None => panic!("mapper is not registered"),
                Some(IndexEntry::One(_)) => {}
                Some(IndexEntry::Many(mut set)) => {
                    set.retain(|m| m.mapper_key() != key);
                    match set.len() {
                        0 => {}
                        1 => {
                            index.insert(
                                mapper.source_key(),
                                IndexEntry::One(set.into_iter().next().expect("one element")),
                            );
                        }
                        _ => {
                            index.insert(mapper.source_key(), IndexEntry::Many(set));
                        }
                    }
                }
            }
        }

        if let Some(actions) = self.dispose.borrow_mut().remove(&key) {
            for action in actions {
                action();
            }
        }

        self.fire(&MappingEvent::Unregistered(Rc::clone(mapper)));
    }

    /// All findable mappers rendering `source` within `ancestor`'s
    /// subtree, in registration order. A node counts as its own
    /// descendant.
    #[must_use]
    pub fn get_mappers(&self, ancestor: &dyn MapperNode, source: &impl Identity) -> Vec<DynMapper> {
        let ancestor_key = ancestor.mapper_key();
        self.indexed(source)
            .into_iter()
            .filter(|m| is_descendant(m, ancestor_key))
            .collect()
    }

    /// The unique mapper for `source` within `ancestor`'s subtree, or
    /// `None` when no findable mapper renders it there.
    #[must_use]
    pub fn get_mapper(&self, ancestor: &dyn MapperNode, source: &impl Identity) -> Option<DynMapper> {
        let mut matches = self.get_mappers(ancestor, source).into_iter();
        let first = matches.next()?;
        assert!(
            matches.next().is_none(),
            "ambiguous mapper for source under the given ancestor"
        );
        Some(first)
    }

    fn indexed(&self, source: &impl Identity) -> Vec<DynMapper> {
        match self.index.borrow().get(&source.identity()) {
            None => Vec::new(),
            Some(IndexEntry::One(m)) => vec![Rc::clone(m)],
            Some(IndexEntry::Many(set)) => set.iter().cloned().collect(),
        }
    }

    /// Every registered mapper, findable or not. Order is unspecified.
    #[must_use]
    pub fn get_mappings(&self) -> Vec<DynMapper> {
        self.mappings.borrow().values().cloned().collect()
    }

    fn fire(&self, event: &MappingEvent) {
        let live: Vec<Listener> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener(event);
        }
    }
}

fn is_descendant(node: &DynMapper, ancestor_key: ObjectKey) -> bool {
    if node.mapper_key() == ancestor_key {
        return true;
    }
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.mapper_key() == ancestor_key {
            return true;
        }
        current = parent.parent();
    }
    false
}
