#![forbid(unsafe_code)]

//! Child mapper containers: ordered list, unordered set, single slot.
//!
//! Containers tie structural mutation to the lifecycle: inserting a child
//! into a container owned by an attached mapper attaches the child into the
//! owner's context; removing it detaches it. While the owner is still
//! pre-attach, inserts merely record the child and attach happens during
//! the owner's child phase.
//!
//! A container registers itself in the owner's parts list the first time it
//! becomes non-empty and unregisters when it empties out, so the parts list
//! only ever walks containers that hold children.
//!
//! # Invariants
//!
//! 1. Parent pointers are validated before any mutation; a child with a
//!    parent cannot be inserted elsewhere.
//! 2. A container appears at most once in its owner's parts list.
//! 3. Child attach is deferred until the owner reaches its child phase.
//!
//! # Failure Modes
//!
//! - Inserting a child that already has a parent panics.
//! - Removing a child the container does not hold panics.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::context::MappingContext;
use crate::identity::Identity;
use crate::mapper::{DynMapper, Mapper, MapperCore, MapperNode, MapperState, Part};

/// Type-erased container view held by the owner's parts list.
pub(crate) trait ChildContainer {
    fn attach_children(&self, context: &Rc<MappingContext>);
    fn detach_children(&self);
    fn children_dyn(&self) -> Vec<DynMapper>;
}

/// Shared bookkeeping for all container kinds.
struct ContainerBase {
    owner_core: Weak<MapperCore>,
    owner_node: Weak<dyn MapperNode>,
    in_parts: Cell<bool>,
}

impl ContainerBase {
    fn new(owner: &DynMapper) -> Self {
        Self {
            owner_core: Rc::downgrade(&owner.core()),
            owner_node: Rc::downgrade(owner),
            in_parts: Cell::new(false),
        }
    }

    fn owner_core(&self) -> Rc<MapperCore> {
        self.owner_core.upgrade().expect("container outlived owner")
    }

    fn owner_context(&self) -> Option<Rc<MappingContext>> {
        self.owner_core().context.borrow().clone()
    }

    /// Whether children inserted right now should attach immediately.
    fn owner_accepts_children(&self) -> bool {
        matches!(
            self.owner_core().state.get(),
            MapperState::AttachingChildren | MapperState::Attached
        )
    }

    fn register_part(&self, container: Rc<dyn ChildContainer>) {
        if self.in_parts.get() {
            return;
        }
        self.owner_core()
            .parts
            .borrow_mut()
            .push(Part::Children(container));
        self.in_parts.set(true);
    }

    fn unregister_part(&self, key: usize) {
        if !self.in_parts.get() {
            return;
        }
        self.owner_core().parts.borrow_mut().retain(|part| {
            !matches!(part, Part::Children(c) if Rc::as_ptr(c).cast::<()>() as usize == key)
        });
        self.in_parts.set(false);
    }

    fn adopt<S: Identity, T: Identity>(&self, child: &Mapper<S, T>) {
        assert!(
            child.parent().is_none(),
            "child mapper already has a parent"
        );
        child.set_parent(Some(self.owner_node.clone()));
    }

    fn attach_if_live<S: Identity, T: Identity>(&self, child: &Mapper<S, T>) {
        if self.owner_accepts_children()
            && let Some(ctx) = self.owner_context()
        {
            child.attach(&ctx);
        }
    }

    fn release<S: Identity, T: Identity>(&self, child: &Mapper<S, T>) {
        if child.is_attached() {
            child.detach();
        }
        child.set_parent(None);
    }
}

// ---- ChildList — ordered container backing role synchronizers ----

struct ListInner<S: Identity, T: Identity> {
    base: ContainerBase,
    items: RefCell<Vec<Mapper<S, T>>>,
}

impl<S: Identity, T: Identity> ListInner<S, T> {
    fn key(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self).cast::<()>() as usize
    }
}

/// An ordered container of child mappers.
pub struct ChildList<S: Identity, T: Identity> {
    inner: Rc<ListInner<S, T>>,
}

impl<S: Identity, T: Identity> Clone for ChildList<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Identity, T: Identity> ChildList<S, T> {
    pub(crate) fn for_owner(owner: &DynMapper) -> Self {
        Self {
            inner: Rc::new(ListInner {
                base: ContainerBase::new(owner),
                items: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Insert `child` at `index`, attaching it if the owner is live.
    pub fn insert(&self, index: usize, child: Mapper<S, T>) {
        self.inner.base.adopt(&child);
        self.inner.items.borrow_mut().insert(index, child.clone());
        self.inner
            .base
            .register_part(Rc::clone(&self.inner) as Rc<dyn ChildContainer>);
        self.inner.base.attach_if_live(&child);
    }

    /// Append `child`, attaching it if the owner is live.
    pub fn push(&self, child: Mapper<S, T>) {
        let index = self.inner.items.borrow().len();
        self.insert(index, child);
    }

    /// Remove and detach the child at `index`.
    pub fn remove_at(&self, index: usize) -> Mapper<S, T> {
        let child = self.inner.items.borrow_mut().remove(index);
        self.inner.base.release(&child);
        if self.inner.items.borrow().is_empty() {
            self.inner.base.unregister_part(self.inner.key());
        }
        child
    }

    /// Remove and detach `child`.
    pub fn remove(&self, child: &Mapper<S, T>) {
        let index = self
            .inner
            .items
            .borrow()
            .iter()
            .position(|m| m == child)
            .expect("child belongs to a different parent");
        self.remove_at(index);
    }

    /// Take the child at `index` out without detaching it. Relocation
    /// support: the child keeps its parent and attached state and must be
    /// put back with [`ChildList::insert_moved`].
    pub(crate) fn release_for_move(&self, index: usize) -> Mapper<S, T> {
        let child = self.inner.items.borrow_mut().remove(index);
        if self.inner.items.borrow().is_empty() {
            self.inner.base.unregister_part(self.inner.key());
        }
        child
    }

    /// Reinsert a child taken with [`ChildList::release_for_move`].
    pub(crate) fn insert_moved(&self, index: usize, child: Mapper<S, T>) {
        self.inner.items.borrow_mut().insert(index, child);
        self.inner
            .base
            .register_part(Rc::clone(&self.inner) as Rc<dyn ChildContainer>);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Mapper<S, T>> {
        self.inner.items.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Current children, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Mapper<S, T>> {
        self.inner.items.borrow().clone()
    }
}

impl<S: Identity, T: Identity> ChildContainer for ListInner<S, T> {
    fn attach_children(&self, context: &Rc<MappingContext>) {
        let snapshot = self.items.borrow().clone();
        for child in snapshot {
            // Inserts during the owner's live phases attach eagerly.
            if child.state() == MapperState::NotAttached {
                child.attach(context);
            }
        }
    }

    fn detach_children(&self) {
        let snapshot = std::mem::take(&mut *self.items.borrow_mut());
        for child in snapshot.iter().rev() {
            self.base.release(child);
        }
        self.base.in_parts.set(false);
    }

    fn children_dyn(&self) -> Vec<DynMapper> {
        self.items.borrow().iter().map(Mapper::as_dyn).collect()
    }
}

// ---- ChildSet — unordered container ----

struct SetInner<S: Identity, T: Identity> {
    base: ContainerBase,
    items: RefCell<Vec<Mapper<S, T>>>,
}

impl<S: Identity, T: Identity> SetInner<S, T> {
    fn key(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self).cast::<()>() as usize
    }
}

/// An unordered container of child mappers. Iteration follows insertion
/// order but no positional API is exposed.
pub struct ChildSet<S: Identity, T: Identity> {
    inner: Rc<SetInner<S, T>>,
}

impl<S: Identity, T: Identity> Clone for ChildSet<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Identity, T: Identity> ChildSet<S, T> {
    pub(crate) fn for_owner(owner: &DynMapper) -> Self {
        Self {
            inner: Rc::new(SetInner {
                base: ContainerBase::new(owner),
                items: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Add `child`, attaching it if the owner is live.
    pub fn add(&self, child: Mapper<S, T>) {
        self.inner.base.adopt(&child);
        self.inner.items.borrow_mut().push(child.clone());
        self.inner
            .base
            .register_part(Rc::clone(&self.inner) as Rc<dyn ChildContainer>);
        self.inner.base.attach_if_live(&child);
    }

    /// Remove and detach `child`.
    pub fn remove(&self, child: &Mapper<S, T>) {
        let index = self
            .inner
            .items
            .borrow()
            .iter()
            .position(|m| m == child)
            .expect("child belongs to a different parent");
        let child = self.inner.items.borrow_mut().remove(index);
        self.inner.base.release(&child);
        if self.inner.items.borrow().is_empty() {
            self.inner.base.unregister_part(self.inner.key());
        }
    }

    #[must_use]
    pub fn contains(&self, child: &Mapper<S, T>) -> bool {
        self.inner.items.borrow().iter().any(|m| m == child)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Mapper<S, T>> {
        self.inner.items.borrow().clone()
    }
}

impl<S: Identity, T: Identity> ChildContainer for SetInner<S, T> {
    fn attach_children(&self, context: &Rc<MappingContext>) {
        let snapshot = self.items.borrow().clone();
        for child in snapshot {
            if child.state() == MapperState::NotAttached {
                child.attach(context);
            }
        }
    }

    fn detach_children(&self) {
        let snapshot = std::mem::take(&mut *self.items.borrow_mut());
        for child in snapshot.iter().rev() {
            self.base.release(child);
        }
        self.base.in_parts.set(false);
    }

    fn children_dyn(&self) -> Vec<DynMapper> {
        self.items.borrow().iter().map(Mapper::as_dyn).collect()
    }
}

// ---- ChildProperty — single-slot container ----

struct PropertyInner<S: Identity, T: Identity> {
    base: ContainerBase,
    slot: RefCell<Option<Mapper<S, T>>>,
}

impl<S: Identity, T: Identity> PropertyInner<S, T> {
    fn key(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self).cast::<()>() as usize
    }
}

/// A container holding zero or one child mapper.
pub struct ChildProperty<S: Identity, T: Identity> {
    inner: Rc<PropertyInner<S, T>>,
}

impl<S: Identity, T: Identity> Clone for ChildProperty<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Identity, T: Identity> ChildProperty<S, T> {
    pub(crate) fn for_owner(owner: &DynMapper) -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                base: ContainerBase::new(owner),
                slot: RefCell::new(None),
            }),
        }
    }

    /// Replace the held child. The old child (if any) detaches before the
    /// new one attaches. Panics before mutating anything if the incoming
    /// child already has a parent.
    pub fn set(&self, child: Option<Mapper<S, T>>) {
        if let Some(incoming) = &child {
            assert!(
                incoming.parent().is_none(),
                "child mapper already has a parent"
            );
        }
        if let Some(old) = self.inner.slot.borrow_mut().take() {
            self.inner.base.release(&old);
            if child.is_none() {
                self.inner.base.unregister_part(self.inner.key());
            }
        }
        if let Some(child) = child {
            self.inner.base.adopt(&child);
            *self.inner.slot.borrow_mut() = Some(child.clone());
            self.inner
                .base
                .register_part(Rc::clone(&self.inner) as Rc<dyn ChildContainer>);
            self.inner.base.attach_if_live(&child);
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<Mapper<S, T>> {
        self.inner.slot.borrow().clone()
    }
}

impl<S: Identity, T: Identity> ChildContainer for PropertyInner<S, T> {
    fn attach_children(&self, context: &Rc<MappingContext>) {
        let child = self.slot.borrow().clone();
        if let Some(child) = child
            && child.state() == MapperState::NotAttached
        {
            child.attach(context);
        }
    }

    fn detach_children(&self) {
        if let Some(child) = self.slot.borrow_mut().take() {
            self.base.release(&child);
        }
        self.base.in_parts.set(false);
    }

    fn children_dyn(&self) -> Vec<DynMapper> {
        self.slot
            .borrow()
            .iter()
            .map(Mapper::as_dyn)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Src = Rc<i32>;
    type Tgt = Rc<String>;

    fn leaf(n: i32) -> Mapper<Src, Tgt> {
        Mapper::new(Rc::new(n), Rc::new(format!("t{n}")))
    }

    #[test]
    fn insert_into_attached_parent_attaches_child() {
        let parent = leaf(0);
        let list: ChildList<Src, Tgt> = parent.create_child_list();
        parent.attach_root();
        let child = leaf(1);
        list.insert(0, child.clone());
        assert!(child.is_attached());
        assert_eq!(child.parent().unwrap().mapper_key(), parent.mapper_key());
    }

    #[test]
    fn insert_before_attach_defers_child_attach() {
        let parent = leaf(0);
        let list: ChildList<Src, Tgt> = parent.create_child_list();
        let child = leaf(1);
        list.insert(0, child.clone());
        assert_eq!(child.state(), MapperState::NotAttached);
        parent.attach_root();
        assert!(child.is_attached());
    }

    #[test]
    fn remove_detaches_and_clears_parent() {
        let parent = leaf(0);
        let list: ChildList<Src, Tgt> = parent.create_child_list();
        parent.attach_root();
        let child = leaf(1);
        list.push(child.clone());
        list.remove(&child);
        assert_eq!(child.state(), MapperState::Detached);
        assert!(child.parent().is_none());
        assert!(list.is_empty());
    }

    #[test]
    #[should_panic(expected = "child mapper already has a parent")]
    fn double_insert_panics() {
        let a = leaf(0);
        let b = leaf(1);
        let child = leaf(2);
        let la: ChildList<Src, Tgt> = a.create_child_list();
        let lb: ChildList<Src, Tgt> = b.create_child_list();
        la.push(child.clone());
        lb.push(child);
    }

    #[test]
    #[should_panic(expected = "child belongs to a different parent")]
    fn removing_foreign_child_panics() {
        let parent = leaf(0);
        let list: ChildList<Src, Tgt> = parent.create_child_list();
        list.remove(&leaf(1));
    }

    #[test]
    fn parent_detach_cascades_to_children() {
        let parent = leaf(0);
        let list: ChildList<Src, Tgt> = parent.create_child_list();
        let a = leaf(1);
        let b = leaf(2);
        list.push(a.clone());
        list.push(b.clone());
        parent.attach_root();
        assert!(a.is_attached() && b.is_attached());
        parent.detach_root();
        assert_eq!(a.state(), MapperState::Detached);
        assert_eq!(b.state(), MapperState::Detached);
        assert!(a.parent().is_none());
    }

    #[test]
    fn children_traversal_covers_all_containers() {
        let parent = leaf(0);
        let list: ChildList<Src, Tgt> = parent.create_child_list();
        let prop: ChildProperty<Src, Tgt> = parent.create_child_property();
        list.push(leaf(1));
        prop.set(Some(leaf(2)));
        parent.attach_root();
        let children = parent.children();
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn child_set_add_and_remove() {
        let parent = leaf(0);
        let set: ChildSet<Src, Tgt> = parent.create_child_set();
        parent.attach_root();
        let child = leaf(1);
        set.add(child.clone());
        assert!(set.contains(&child));
        assert!(child.is_attached());
        set.remove(&child);
        assert!(!set.contains(&child));
        assert_eq!(child.state(), MapperState::Detached);
    }

    #[test]
    fn child_property_replacement_detaches_old_first() {
        let parent = leaf(0);
        let prop: ChildProperty<Src, Tgt> = parent.create_child_property();
        parent.attach_root();
        let first = leaf(1);
        let second = leaf(2);
        prop.set(Some(first.clone()));
        prop.set(Some(second.clone()));
        assert_eq!(first.state(), MapperState::Detached);
        assert!(second.is_attached());
        prop.set(None);
        assert_eq!(second.state(), MapperState::Detached);
        assert!(prop.get().is_none());
    }

    #[test]
    fn rejected_property_set_leaves_occupant_untouched() {
        let parent = leaf(0);
        let other = leaf(1);
        let prop: ChildProperty<Src, Tgt> = parent.create_child_property();
        let other_list: ChildList<Src, Tgt> = other.create_child_list();
        parent.attach_root();
        let occupant = leaf(2);
        prop.set(Some(occupant.clone()));
        let claimed = leaf(3);
        other_list.push(claimed.clone());
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            prop.set(Some(claimed));
        }));
        assert!(outcome.is_err(), "already-parented child must be rejected");
        assert!(
            occupant.is_attached(),
            "rejected set must not disturb the current child"
        );
        assert!(
            prop.get().is_some_and(|held| held.mapper_key() == occupant.mapper_key()),
            "slot must still hold the original child"
        );
    }

    #[test]
    fn grandchildren_attach_depth_first() {
        let root = leaf(0);
        let mid = leaf(1);
        let deep = leaf(2);
        let l1: ChildList<Src, Tgt> = root.create_child_list();
        let l2: ChildList<Src, Tgt> = mid.create_child_list();
        l2.push(deep.clone());
        l1.push(mid.clone());
        root.attach_root();
        assert!(deep.is_attached());
        let ctx = root.mapping_context().unwrap();
        assert!(Rc::ptr_eq(&ctx, &deep.mapping_context().unwrap()));
        root.detach_root();
        assert_eq!(deep.state(), MapperState::Detached);
    }
}
