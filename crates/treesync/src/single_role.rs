#![forbid(unsafe_code)]

//! Single-valued roles: mirror an optional source reference into an
//! optional target slot, and pin a constant child into a target list.
//!
//! [`for_single_role`] is the 0..1 counterpart of the collection role: one
//! observable source reference drives one child mapper held in a
//! [`ChildProperty`]. Replacing the source detaches the old child's mapper
//! and attaches a fresh one; identity-equal updates are no-ops.
//!
//! # Invariants
//!
//! 1. The slot holds `Some` exactly while a child mapper is attached for
//!    the current source value.
//! 2. Re-setting the same source (by identity) never cycles the mapper.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use treesync_reactive::{Observable, Registration};

use crate::children::ChildProperty;
use crate::error::SyncResult;
use crate::identity::Identity;
use crate::mapper::Mapper;
use crate::role::{MapperFactory, MapperProcessor, TargetList};
use crate::synchronizer::{Synchronizer, SynchronizerContext};

struct SingleInner<S: Identity, T: Identity> {
    source: Observable<Option<S>>,
    slot: Observable<Option<T>>,
    factory: Rc<dyn MapperFactory<S, T>>,
    processors: RefCell<Vec<Rc<dyn MapperProcessor<S, T>>>>,
    child: RefCell<Option<ChildProperty<S, T>>>,
    subscription: RefCell<Option<Registration>>,
}

/// A synchronizer mirroring an optional source reference into an optional
/// target slot through a single child mapper.
pub struct SingleRoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity + PartialEq,
{
    inner: Rc<SingleInner<S, T>>,
}

impl<S, T> Clone for SingleRoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity + PartialEq,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Build a 0..1 role: `slot` tracks the target of the mapper created for
/// the current `source` value.
pub fn for_single_role<S, T>(
    source: &Observable<Option<S>>,
    slot: &Observable<Option<T>>,
    factory: impl MapperFactory<S, T> + 'static,
) -> SingleRoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity + PartialEq,
{
    SingleRoleSynchronizer {
        inner: Rc::new(SingleInner {
            source: source.clone(),
            slot: slot.clone(),
            factory: Rc::new(factory),
            processors: RefCell::new(Vec::new()),
            child: RefCell::new(None),
            subscription: RefCell::new(None),
        }),
    }
}

impl<S, T> SingleRoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity + PartialEq,
{
    /// Append a processor run on every freshly created child mapper.
    pub fn add_processor(&self, processor: impl MapperProcessor<S, T> + 'static) {
        self.inner.processors.borrow_mut().push(Rc::new(processor));
    }

    /// The current child mapper, if any.
    #[must_use]
    pub fn mapper(&self) -> Option<Mapper<S, T>> {
        self.inner.child.borrow().as_ref().and_then(ChildProperty::get)
    }

    fn sync(&self) {
        let child = self
            .inner
            .child
            .borrow()
            .clone()
            .expect("single role synchronizer is attached");
        let desired = self.inner.source.get();
        let current = child.get();
        match (&desired, &current) {
            (None, None) => return,
            (Some(d), Some(m)) if d.identity() == m.source().identity() => return,
            _ => {}
        }

        child.set(None);
        match desired {
            None => self.inner.slot.set(None),
            Some(source) => {
                let mapper = self
                    .inner
                    .factory
                    .create_mapper(&source)
                    .expect("no mapper factory matched a source item");
                child.set(Some(mapper.clone()));
                self.inner.slot.set(Some(mapper.target().clone()));
                let processors: Vec<_> = self.inner.processors.borrow().clone();
                for processor in processors {
                    processor.process(&mapper);
                }
            }
        }
    }
}

impl<S, T> Synchronizer for SingleRoleSynchronizer<S, T>
where
    S: Identity + PartialEq,
    T: Identity + PartialEq,
{
    fn attach(&self, ctx: &SynchronizerContext) -> SyncResult {
        *self.inner.child.borrow_mut() = Some(ChildProperty::for_owner(ctx.mapper()));
        self.sync();
        let weak: Weak<SingleInner<S, T>> = Rc::downgrade(&self.inner);
        let registration = self.inner.source.subscribe(move |_, _| {
            if let Some(inner) = weak.upgrade() {
                SingleRoleSynchronizer { inner }.sync();
            }
        });
        *self.inner.subscription.borrow_mut() = Some(registration);
        Ok(())
    }

    fn detach(&self) -> SyncResult {
        if let Some(registration) = self.inner.subscription.borrow_mut().take() {
            registration.remove();
        }
        // The child property part has already detached the mapper; only the
        // published slot value remains.
        self.inner.slot.set(None);
        *self.inner.child.borrow_mut() = None;
        Ok(())
    }
}

// ---- constant role — pin one pre-built child into a target list ----

struct ConstantInner<S: Identity, T: Identity> {
    mapper: Mapper<S, T>,
    target: Box<dyn TargetList<T>>,
    child: RefCell<Option<ChildProperty<S, T>>>,
    inserted_at: Cell<Option<usize>>,
}

/// A synchronizer keeping one fixed child mapper's target in a list for
/// the owner's whole attached lifetime.
pub struct ConstantRoleSynchronizer<S: Identity, T: Identity> {
    inner: Rc<ConstantInner<S, T>>,
}

impl<S: Identity, T: Identity> Clone for ConstantRoleSynchronizer<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Build a constant role: `child`'s target is appended to `target` on
/// attach and removed on detach. Constant roles detach in reverse attach
/// order, so recorded positions stay valid.
pub fn for_constant_role<S, T>(
    child: Mapper<S, T>,
    target: impl TargetList<T> + 'static,
) -> ConstantRoleSynchronizer<S, T>
where
    S: Identity,
    T: Identity,
{
    ConstantRoleSynchronizer {
        inner: Rc::new(ConstantInner {
            mapper: child,
            target: Box::new(target),
            child: RefCell::new(None),
            inserted_at: Cell::new(None),
        }),
    }
}

impl<S: Identity, T: Identity> Synchronizer for ConstantRoleSynchronizer<S, T> {
    fn attach(&self, ctx: &SynchronizerContext) -> SyncResult {
        let child = ChildProperty::for_owner(ctx.mapper());
        child.set(Some(self.inner.mapper.clone()));
        *self.inner.child.borrow_mut() = Some(child);
        let index = self.inner.target.len();
        self.inner
            .target
            .insert(index, self.inner.mapper.target().clone());
        self.inner.inserted_at.set(Some(index));
        Ok(())
    }

    fn detach(&self) -> SyncResult {
        if let Some(index) = self.inner.inserted_at.take() {
            self.inner.target.remove(index);
        }
        *self.inner.child.borrow_mut() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{MapperDef, MapperState, SynchronizersConfig};

    type Item = Rc<String>;
    type View = Rc<String>;

    fn item(name: &str) -> Item {
        Rc::new(name.to_string())
    }

    fn view_factory(source: &Item) -> Option<Mapper<Item, View>> {
        Some(Mapper::new(
            source.clone(),
            Rc::new(format!("view:{source}")),
        ))
    }

    struct SlotDef {
        source: Observable<Option<Item>>,
        slot: Observable<Option<View>>,
        role: Rc<RefCell<Option<SingleRoleSynchronizer<Item, View>>>>,
    }

    impl MapperDef<Rc<i32>, Rc<i32>> for SlotDef {
        fn register_synchronizers(
            &self,
            _m: &Mapper<Rc<i32>, Rc<i32>>,
            config: &mut SynchronizersConfig,
        ) {
            let role = for_single_role(&self.source, &self.slot, view_factory);
            *self.role.borrow_mut() = Some(role.clone());
            config.add(role);
        }
    }

    fn slot_setup(
        initial: Option<Item>,
    ) -> (
        Mapper<Rc<i32>, Rc<i32>>,
        Observable<Option<Item>>,
        Observable<Option<View>>,
        Rc<RefCell<Option<SingleRoleSynchronizer<Item, View>>>>,
    ) {
        let source = Observable::new(initial);
        let slot = Observable::new(None);
        let role = Rc::new(RefCell::new(None));
        let root = Mapper::with_def(
            Rc::new(0),
            Rc::new(0),
            SlotDef {
                source: source.clone(),
                slot: slot.clone(),
                role: Rc::clone(&role),
            },
        );
        (root, source, slot, role)
    }

    #[test]
    fn slot_follows_the_source_reference() {
        let (root, source, slot, _role) = slot_setup(None);
        root.attach_root();
        assert!(slot.get().is_none());
        source.set(Some(item("a")));
        assert_eq!(slot.get().unwrap().as_str(), "view:a");
        source.set(Some(item("b")));
        assert_eq!(slot.get().unwrap().as_str(), "view:b");
        source.set(None);
        assert!(slot.get().is_none());
    }

    #[test]
    fn replacing_the_source_cycles_the_mapper() {
        let (root, source, _slot, role) = slot_setup(Some(item("a")));
        root.attach_root();
        let role = role.borrow().clone().unwrap();
        let first = role.mapper().expect("mapper for initial value");
        assert!(first.is_attached());
        source.set(Some(item("b")));
        assert_eq!(first.state(), MapperState::Detached);
        let second = role.mapper().expect("mapper for replacement");
        assert_ne!(first, second);
        assert!(second.is_attached());
    }

    #[test]
    fn identity_equal_update_is_a_no_op() {
        let a = item("a");
        let (root, source, _slot, role) = slot_setup(Some(a.clone()));
        root.attach_root();
        let role = role.borrow().clone().unwrap();
        let before = role.mapper().unwrap();
        source.set(Some(a));
        assert_eq!(role.mapper().unwrap(), before);
    }

    #[test]
    fn parent_detach_clears_the_slot() {
        let (root, _source, slot, role) = slot_setup(Some(item("a")));
        root.attach_root();
        let mapper = role.borrow().clone().unwrap().mapper().unwrap();
        root.detach_root();
        assert!(slot.get().is_none());
        assert_eq!(mapper.state(), MapperState::Detached);
    }

    struct ConstantDef {
        header: Mapper<Item, View>,
        views: Rc<RefCell<Vec<View>>>,
    }

    impl MapperDef<Rc<i32>, Rc<i32>> for ConstantDef {
        fn register_synchronizers(
            &self,
            _m: &Mapper<Rc<i32>, Rc<i32>>,
            config: &mut SynchronizersConfig,
        ) {
            config.add(for_constant_role(
                self.header.clone(),
                Rc::clone(&self.views),
            ));
        }
    }

    #[test]
    fn constant_role_pins_the_child_while_attached() {
        let header = view_factory(&item("header")).unwrap();
        let views = Rc::new(RefCell::new(Vec::new()));
        let root = Mapper::with_def(
            Rc::new(0),
            Rc::new(0),
            ConstantDef {
                header: header.clone(),
                views: Rc::clone(&views),
            },
        );
        root.attach_root();
        assert!(header.is_attached());
        assert_eq!(views.borrow().len(), 1);
        assert_eq!(views.borrow()[0].as_str(), "view:header");
        root.detach_root();
        assert_eq!(header.state(), MapperState::Detached);
        assert!(views.borrow().is_empty());
    }
}
