#![forbid(unsafe_code)]

//! Collection role synchronizers: mirror a source collection into a target
//! collection through per-item child mappers.
//!
//! A role owns one target list and the child mappers producing its entries.
//! On every update it reconciles the mapped source snapshot against the
//! desired one with a minimal edit script, so unchanged items keep their
//! mapper (and target object) identity. An item that merely moves is
//! relocated: its mapper is lifted out and reinserted without a
//! detach/attach cycle.
//!
//! Three flavors cover the common wiring:
//!
//! - [`for_simple_role`]: pull-based, converges on
//!   [`RoleSynchronizer::refresh`].
//! - [`for_observable_role`]: push-based, translates
//!   [`ListChange`] events one-to-one.
//! - [`for_derived_role`]: converge-based, recomputes a derived snapshot on
//!   any upstream signal.
//!
//! # Invariants
//!
//! 1. The role is the only writer of its target list; target index `i`
//!    always holds the target of child mapper `i`.
//! 2. Reconciliation never recreates a mapper for a source item present
//!    both before and after an update.
//! 3. Detach leaves the target list without any role-owned entries.
//!
//! # Failure Modes
//!
//! - A source item no factory can map panics.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use treesync_reactive::{ListChange, ObservableList, Registration};

use crate::children::ChildList;
use crate::difference::{self, DifferenceItem};
use crate::error::SyncResult;
use crate::identity::Identity;
use crate::mapper::Mapper;
use crate::synchronizer::{Synchronizer, SynchronizerContext};

/// Mutable positional view of the collection a role writes into.
pub trait TargetList<T> {
    fn insert(&self, index: usize, item: T);
    fn remove(&self, index: usize);
    fn len(&self) -> usize;
}

impl<T: Clone + PartialEq + 'static> TargetList<T> for ObservableList<T> {
    fn insert(&self, index: usize, item: T) {
        ObservableList::insert(self, index, item);
    }

    fn remove(&self, index: usize) {
        ObservableList::remove(self, index);
    }

    fn len(&self) -> usize {
        ObservableList::len(self)
    }
}

impl<T> TargetList<T> for Rc<RefCell<Vec<T>>> {
    fn insert(&self, index: usize, item: T) {
        self.borrow_mut().insert(index, item);
    }

    fn remove(&self, index: usize) {
        self.borrow_mut().remove(index);
    }

    fn len(&self) -> usize {
        self.borrow().len()
    }
}

/// Creates the child mapper for a source item, or declines it.
pub trait MapperFactory<S: Identity, T: Identity> {
    fn create_mapper(&self, source: &S) -> Option<Mapper<S, T>>;
}

impl<S: Identity, T: Identity, F> MapperFactory<S, T> for F
where
    F: Fn(&S) -> Option<Mapper<S, T>>,
{
    fn create_mapper(&self, source: &S) -> Option<Mapper<S, T>> {
        self(source)
    }
}

/// Post-creation hook run on every freshly created child mapper.
pub trait MapperProcessor<S: Identity, T: Identity> {
    fn process(&self, mapper: &Mapper<S, T>);
}

impl<S: Identity, T: Identity, F> MapperProcessor<S, T> for F
where
    F: Fn(&Mapper<S, T>),
{
    fn process(&self, mapper: &Mapper<S, T>) {
        self(mapper);
    }
}

enum RoleKind<S> {
    /// Pull: converge on demand against a recomputed snapshot.
    Simple {
        snapshot: Box<dyn Fn() -> Vec<S>>,
    },
    /// Push: translate list changes one-to-one, no reconciliation.
    Push { list: ObservableList<S> },
    /// Converge: recompute the snapshot whenever an upstream signal fires.
    Converge {
        snapshot: Box<dyn Fn() -> Vec<S>>,
        subscribe: Box<dyn Fn(Box<dyn Fn()>) -> Registration>,
    },
}

struct RoleInner<S: Identity, T: Identity> {
    factories: RefCell<Vec<Rc<dyn MapperFactory<S, T>>>>,
    processors: RefCell<Vec<Rc<dyn MapperProcessor<S, T>>>>,
    target: Box<dyn TargetList<T>>,
    kind: RoleKind<S>,
    children: RefCell<Option<ChildList<S, T>>>,
    subscription: RefCell<Option<Registration>>,
    /// Target entries currently owned by this role. Needed at detach, when
    /// the child container has already been torn down.
    mirrored: Cell<usize>,
}

/// A synchronizer mirroring a source collection into a target list.
///
/// Cheap cloneable handle; clones share state.
pub struct RoleSynchronizer<S: Identity + PartialEq, T: Identity> {
    inner: Rc<RoleInner<S, T>>,
}

impl<S: Identity + PartialEq, T: Identity> Clone for RoleSynchronizer<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Pull-based role over a snapshot function. Converges at attach and on
/// every [`RoleSynchronizer::refresh`].
pub fn for_simple_role<S, T>(
    source: impl Fn() -> Vec<S> + 'static,
    target: impl TargetList<T> + 'static,
    factory: impl MapperFactory<S, T> + 'static,
) -> RoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity,
{
    RoleSynchronizer::new(
        RoleKind::Simple {
            snapshot: Box::new(source),
        },
        target,
        factory,
    )
}

/// Push-based role over an observable list. Translates every insert and
/// remove directly, bypassing reconciliation.
pub fn for_observable_role<S, T>(
    source: &ObservableList<S>,
    target: impl TargetList<T> + 'static,
    factory: impl MapperFactory<S, T> + 'static,
) -> RoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity,
{
    RoleSynchronizer::new(
        RoleKind::Push {
            list: source.clone(),
        },
        target,
        factory,
    )
}

/// Converge-based role over a derived view of an observable list. Any
/// upstream change recomputes the snapshot and reconciles.
pub fn for_derived_role<R, S, T>(
    source: &ObservableList<R>,
    transform: impl Fn(&R) -> S + 'static,
    target: impl TargetList<T> + 'static,
    factory: impl MapperFactory<S, T> + 'static,
) -> RoleSynchronizer<S, T>
where
    R: Clone + PartialEq + 'static,
    S: Identity + PartialEq,
    T: Identity,
{
    let snapshot_list = source.clone();
    let listen_list = source.clone();
    RoleSynchronizer::new(
        RoleKind::Converge {
            snapshot: Box::new(move || {
                snapshot_list.snapshot().iter().map(&transform).collect()
            }),
            subscribe: Box::new(move |refresh| listen_list.listen(move |_| refresh())),
        },
        target,
        factory,
    )
}

impl<S: Identity + PartialEq, T: Identity> RoleSynchronizer<S, T> {
    fn new(
        kind: RoleKind<S>,
        target: impl TargetList<T> + 'static,
        factory: impl MapperFactory<S, T> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(RoleInner {
                factories: RefCell::new(vec![Rc::new(factory)]),
                processors: RefCell::new(Vec::new()),
                target: Box::new(target),
                kind,
                children: RefCell::new(None),
                subscription: RefCell::new(None),
                mirrored: Cell::new(0),
            }),
        }
    }

    /// Append a fallback factory, tried after the existing ones.
    pub fn add_factory(&self, factory: impl MapperFactory<S, T> + 'static) {
        self.inner.factories.borrow_mut().push(Rc::new(factory));
    }

    /// Append a processor run on every freshly created child mapper.
    pub fn add_processor(&self, processor: impl MapperProcessor<S, T> + 'static) {
        self.inner.processors.borrow_mut().push(Rc::new(processor));
    }

    /// Current child mappers, in target order. Empty before attach.
    #[must_use]
    pub fn mappers(&self) -> Vec<Mapper<S, T>> {
        self.inner
            .children
            .borrow()
            .as_ref()
            .map(ChildList::snapshot)
            .unwrap_or_default()
    }

    /// Reconcile against a freshly computed source snapshot. No-op before
    /// attach.
    pub fn refresh(&self) {
        if self.inner.children.borrow().is_none() {
            return;
        }
        self.update(self.snapshot_sources());
    }

    fn snapshot_sources(&self) -> Vec<S> {
        match &self.inner.kind {
            RoleKind::Simple { snapshot } | RoleKind::Converge { snapshot, .. } => snapshot(),
            RoleKind::Push { list } => list.snapshot(),
        }
    }

    fn children(&self) -> ChildList<S, T> {
        self.inner
            .children
            .borrow()
            .clone()
            .expect("role synchronizer is attached")
    }

    /// Apply a minimal edit script turning the mapped snapshot into
    /// `desired`. Moved items keep their mapper.
    fn update(&self, desired: Vec<S>) {
        let children = self.children();
        let current: Vec<S> = children
            .snapshot()
            .iter()
            .map(|m| m.source().clone())
            .collect();
        let script = difference::difference(&desired, &current);

        // Pair removals with pending additions of the same item so a plain
        // move never detaches its mapper.
        let mut pending: Vec<(&S, bool)> = script
            .iter()
            .filter_map(|step| match step {
                DifferenceItem::Add { item, .. } => Some((item, false)),
                DifferenceItem::Remove { .. } => None,
            })
            .collect();
        let mut parked: Vec<(S, Mapper<S, T>)> = Vec::new();

        for step in &script {
            match step {
                DifferenceItem::Remove { index, item } => {
                    let relocating = pending
                        .iter_mut()
                        .find(|(pending_item, claimed)| !*claimed && *pending_item == item);
                    if let Some((_, claimed)) = relocating {
                        *claimed = true;
                        let mapper = children.release_for_move(*index);
                        self.inner.target.remove(*index);
                        self.inner.mirrored.set(self.inner.mirrored.get() - 1);
                        parked.push((item.clone(), mapper));
                    } else {
                        self.remove_existing(*index);
                    }
                }
                DifferenceItem::Add { index, item } => {
                    if let Some(pos) = parked.iter().position(|(parked_item, _)| parked_item == item)
                    {
                        let (_, mapper) = parked.remove(pos);
                        children.insert_moved(*index, mapper.clone());
                        self.inner.target.insert(*index, mapper.target().clone());
                        self.inner.mirrored.set(self.inner.mirrored.get() + 1);
                    } else {
                        self.add_new(*index, item.clone());
                    }
                }
            }
        }
        debug_assert!(parked.is_empty(), "every relocation found its new slot");
    }

    /// Create, insert, and process a mapper for a new source item.
    fn add_new(&self, index: usize, item: S) {
        let mapper = self.create_mapper(&item);
        self.children().insert(index, mapper.clone());
        self.inner.target.insert(index, mapper.target().clone());
        self.inner.mirrored.set(self.inner.mirrored.get() + 1);
        let processors: Vec<_> = self.inner.processors.borrow().clone();
        for processor in processors {
            processor.process(&mapper);
        }
    }

    /// Detach and drop the child at `index` along with its target entry.
    fn remove_existing(&self, index: usize) {
        self.children().remove_at(index);
        self.inner.target.remove(index);
        self.inner.mirrored.set(self.inner.mirrored.get() - 1);
    }

    fn create_mapper(&self, item: &S) -> Mapper<S, T> {
        let factories: Vec<_> = self.inner.factories.borrow().clone();
        factories
            .iter()
            .find_map(|factory| factory.create_mapper(item))
            .expect("no mapper factory matched a source item")
    }
}

impl<S: Identity + PartialEq, T: Identity> Synchronizer for RoleSynchronizer<S, T> {
    fn attach(&self, ctx: &SynchronizerContext) -> SyncResult {
        *self.inner.children.borrow_mut() = Some(ChildList::for_owner(ctx.mapper()));
        self.update(self.snapshot_sources());

        let registration = match &self.inner.kind {
            RoleKind::Simple { .. } => None,
            RoleKind::Push { list } => {
                let weak = Rc::downgrade(&self.inner);
                Some(list.listen(move |change| {
                    let Some(inner) = weak.upgrade() else { return };
                    let role = RoleSynchronizer { inner };
                    match change {
                        ListChange::Inserted { index, item } => role.add_new(*index, item.clone()),
                        ListChange::Removed { index, .. } => role.remove_existing(*index),
                    }
                }))
            }
            RoleKind::Converge { subscribe, .. } => {
                let weak = Rc::downgrade(&self.inner);
                Some(subscribe(Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        RoleSynchronizer { inner }.refresh();
                    }
                })))
            }
        };
        *self.inner.subscription.borrow_mut() = registration;
        Ok(())
    }

    fn detach(&self) -> SyncResult {
        if let Some(registration) = self.inner.subscription.borrow_mut().take() {
            registration.remove();
        }
        // The child container part has already detached the mappers by the
        // time the role part runs; only the target entries remain.
        while self.inner.mirrored.get() > 0 {
            self.inner.target.remove(self.inner.target.len() - 1);
            self.inner.mirrored.set(self.inner.mirrored.get() - 1);
        }
        *self.inner.children.borrow_mut() = None;
        Ok(())
    }
}
