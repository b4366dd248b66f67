#![forbid(unsafe_code)]

//! The mapper node: lifecycle state machine and tree structure.
//!
//! A [`Mapper`] pairs one source model object with one target object and
//! owns the machinery keeping the target structurally synchronized with the
//! source: an ordered parts list of [`Synchronizer`]s and child containers,
//! a non-owning parent back-reference, and a lifecycle state.
//!
//! # Lifecycle
//!
//! ```text
//! NotAttached → AttachingSynchronizers → AttachingChildren → Attached → Detached
//! ```
//!
//! `attach` runs `on_before_attach`, binds the context, collects
//! synchronizers from [`MapperDef::register_synchronizers`], attaches them
//! in declared order, then depth-first attaches every child present in any
//! container (including containers created *during* the synchronizer
//! phase), registers the node in the [`MappingContext`], and finally runs
//! `on_attach`. `detach` reverses: `on_detach`, parts in reverse order
//! (children depth-first), unregister, terminal `Detached` state.
//!
//! # Invariants
//!
//! 1. Attach/detach is one-shot: a detached mapper can never be reattached.
//! 2. A mapper has at most one parent; containers enforce this before any
//!    state changes.
//! 3. Hook failures (`Err` from a [`MapperDef`] hook or a synchronizer
//!    phase) are routed to the error sink; the state machine proceeds as if
//!    the hook had succeeded.
//!
//! # Failure Modes
//!
//! - `attach` on a non-`NotAttached` mapper panics (contract violation).
//! - `detach` on a non-`Attached` mapper panics.
//! - `attach_root` / `detach_root` on a mapper with a parent panics.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::children::{ChildContainer, ChildList, ChildProperty, ChildSet};
use crate::context::MappingContext;
use crate::error::{self, HookStage};
use crate::identity::{Identity, ObjectKey};
use crate::synchronizer::{Synchronizer, SynchronizerContext};

/// Lifecycle state of a mapper node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperState {
    /// Freshly constructed, floating.
    NotAttached,
    /// Attaching synchronizers in declared order.
    AttachingSynchronizers,
    /// Depth-first attaching children present in containers.
    AttachingChildren,
    /// Live in a mapping context.
    Attached,
    /// Terminal: detached, never to be reattached.
    Detached,
}

/// One entry of a mapper's ordered parts list. Cross-kind insertion order
/// is preserved so detach can walk everything in exact reverse.
pub(crate) enum Part {
    Synchronizer(Rc<dyn Synchronizer>),
    Children(Rc<dyn ChildContainer>),
}

impl Clone for Part {
    fn clone(&self) -> Self {
        match self {
            Self::Synchronizer(s) => Self::Synchronizer(Rc::clone(s)),
            Self::Children(c) => Self::Children(Rc::clone(c)),
        }
    }
}

/// Shared lifecycle core of a mapper node, independent of source/target
/// types. The address of this allocation is the node's identity.
#[doc(hidden)]
pub struct MapperCore {
    pub(crate) state: Cell<MapperState>,
    pub(crate) parent: RefCell<Option<Weak<dyn MapperNode>>>,
    pub(crate) context: RefCell<Option<Rc<MappingContext>>>,
    pub(crate) parts: RefCell<Vec<Part>>,
    pub(crate) findable: Cell<bool>,
}

impl MapperCore {
    fn new(findable: bool) -> Rc<Self> {
        Rc::new(Self {
            state: Cell::new(MapperState::NotAttached),
            parent: RefCell::new(None),
            context: RefCell::new(None),
            parts: RefCell::new(Vec::new()),
            findable: Cell::new(findable),
        })
    }

    pub(crate) fn key(self: &Rc<Self>) -> ObjectKey {
        ObjectKey::from_addr(Rc::as_ptr(self) as usize)
    }
}

/// Object-safe, type-erased view of a mapper node, used for heterogeneous
/// tree traversal and registry storage.
pub trait MapperNode {
    /// Current lifecycle state.
    fn state(&self) -> MapperState;
    /// Whether the node is `Attached`.
    fn is_attached(&self) -> bool;
    /// Non-owning parent, if any.
    fn parent(&self) -> Option<DynMapper>;
    /// The context this node is attached in.
    fn mapping_context(&self) -> Option<Rc<MappingContext>>;
    /// Whether the node is indexed for source-identity lookup.
    fn is_findable(&self) -> bool;
    /// Identity of this node.
    fn mapper_key(&self) -> ObjectKey;
    /// Identity of the source object.
    fn source_key(&self) -> ObjectKey;
    /// Identity of the target object.
    fn target_key(&self) -> ObjectKey;
    /// Synchronizers in declared order.
    fn synchronizers(&self) -> Vec<Rc<dyn Synchronizer>>;
    /// Children in part-insertion order, then within-container order.
    fn children(&self) -> Vec<DynMapper>;
    /// Downcast support for [`Mapper::from_dyn`].
    fn as_any(&self) -> &dyn Any;
    #[doc(hidden)]
    fn core(&self) -> Rc<MapperCore>;
}

/// Shared handle to a type-erased mapper node.
pub type DynMapper = Rc<dyn MapperNode>;

/// Synchronizers collected from [`MapperDef::register_synchronizers`],
/// appended to the mapper's parts list in declared order.
#[derive(Default)]
pub struct SynchronizersConfig {
    items: Vec<Rc<dyn Synchronizer>>,
}

impl SynchronizersConfig {
    /// Append a synchronizer; attach order is declaration order, detach is
    /// the reverse.
    pub fn add(&mut self, synchronizer: impl Synchronizer + 'static) {
        self.items.push(Rc::new(synchronizer));
    }

    /// Append an already-shared synchronizer.
    pub fn add_rc(&mut self, synchronizer: Rc<dyn Synchronizer>) {
        self.items.push(synchronizer);
    }
}

/// Extension point defining a mapper's synchronizers and lifecycle hooks.
///
/// Hook errors are routed to the error sink and never abort the lifecycle
/// transition.
pub trait MapperDef<S: Identity, T: Identity>: 'static {
    /// Populate the ordered synchronizer set. Runs once, during attach.
    fn register_synchronizers(&self, mapper: &Mapper<S, T>, config: &mut SynchronizersConfig) {
        let _ = (mapper, config);
    }

    /// Runs before any attach work.
    fn on_before_attach(&self, mapper: &Mapper<S, T>) -> error::SyncResult {
        let _ = mapper;
        Ok(())
    }

    /// Runs after the node is fully attached and registered.
    fn on_attach(&self, mapper: &Mapper<S, T>) -> error::SyncResult {
        let _ = mapper;
        Ok(())
    }

    /// Runs first during detach, while the subtree is still intact.
    fn on_detach(&self, mapper: &Mapper<S, T>) -> error::SyncResult {
        let _ = mapper;
        Ok(())
    }

    /// Whether the node is indexed for source-identity lookup.
    fn findable(&self) -> bool {
        true
    }
}

struct LeafDef;

impl<S: Identity, T: Identity> MapperDef<S, T> for LeafDef {}

struct MapperInner<S: Identity, T: Identity> {
    source: S,
    target: T,
    def: Box<dyn MapperDef<S, T>>,
    core: Rc<MapperCore>,
    weak_self: Weak<MapperInner<S, T>>,
}

/// A tree node pairing a source model object with a target object.
///
/// `Mapper` is a cheap cloneable handle; clones refer to the same node.
pub struct Mapper<S: Identity, T: Identity> {
    inner: Rc<MapperInner<S, T>>,
}

impl<S: Identity, T: Identity> Clone for Mapper<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Identity, T: Identity> PartialEq for Mapper<S, T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: Identity, T: Identity> Eq for Mapper<S, T> {}

impl<S: Identity, T: Identity> std::fmt::Debug for Mapper<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("key", &self.mapper_key())
            .field("state", &self.state())
            .finish()
    }
}

impl<S: Identity, T: Identity> Mapper<S, T> {
    /// Create a mapper with no synchronizers and default hooks.
    pub fn new(source: S, target: T) -> Self {
        Self::with_def(source, target, LeafDef)
    }

    /// Create a mapper driven by `def`.
    pub fn with_def(source: S, target: T, def: impl MapperDef<S, T>) -> Self {
        let findable = def.findable();
        let inner = Rc::new_cyclic(|weak_self| MapperInner {
            source,
            target,
            def: Box::new(def),
            core: MapperCore::new(findable),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    /// The source model object. Immutable from the engine's perspective.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// The target object. Immutable from the engine's perspective.
    #[must_use]
    pub fn target(&self) -> &T {
        &self.inner.target
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MapperState {
        self.inner.state()
    }

    /// Whether the node is `Attached`.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.is_attached()
    }

    /// Non-owning parent, if any.
    #[must_use]
    pub fn parent(&self) -> Option<DynMapper> {
        self.inner.parent()
    }

    /// The context this node is attached in.
    #[must_use]
    pub fn mapping_context(&self) -> Option<Rc<MappingContext>> {
        self.inner.mapping_context()
    }

    /// Whether the node is indexed for source-identity lookup.
    #[must_use]
    pub fn is_findable(&self) -> bool {
        self.inner.is_findable()
    }

    /// Identity of this node.
    #[must_use]
    pub fn mapper_key(&self) -> ObjectKey {
        self.inner.mapper_key()
    }

    /// Children in part-insertion order, then within-container order.
    #[must_use]
    pub fn children(&self) -> Vec<DynMapper> {
        self.inner.children()
    }

    /// Synchronizers in declared order.
    #[must_use]
    pub fn synchronizers(&self) -> Vec<Rc<dyn Synchronizer>> {
        self.inner.synchronizers()
    }

    /// Opt the node out of (or back into) registry indexing. Only allowed
    /// before attach.
    pub fn set_findable(&self, findable: bool) {
        assert_eq!(
            self.state(),
            MapperState::NotAttached,
            "findable can only change before attach"
        );
        self.inner.core.findable.set(findable);
    }

    /// Attach this mapper as the root of a fresh [`MappingContext`].
    pub fn attach_root(&self) {
        self.attach_root_with(&MappingContext::new());
    }

    /// Attach this mapper as a root of an existing context.
    pub fn attach_root_with(&self, context: &Rc<MappingContext>) {
        assert!(
            self.parent().is_none(),
            "attach_root called on a mapper that has a parent"
        );
        self.attach(context);
    }

    /// Detach a root mapper, tearing down its whole subtree.
    pub fn detach_root(&self) {
        assert!(
            self.parent().is_none(),
            "detach_root called on a mapper that has a parent"
        );
        self.detach();
    }

    /// Create an ordered child container wired for automatic attach/detach.
    #[must_use]
    pub fn create_child_list<CS: Identity, CT: Identity>(&self) -> ChildList<CS, CT> {
        ChildList::for_owner(&self.as_dyn())
    }

    /// Create an unordered child container wired for automatic
    /// attach/detach.
    #[must_use]
    pub fn create_child_set<CS: Identity, CT: Identity>(&self) -> ChildSet<CS, CT> {
        ChildSet::for_owner(&self.as_dyn())
    }

    /// Create a single-slot child container wired for automatic
    /// attach/detach.
    #[must_use]
    pub fn create_child_property<CS: Identity, CT: Identity>(&self) -> ChildProperty<CS, CT> {
        ChildProperty::for_owner(&self.as_dyn())
    }

    /// Type-erased handle to this node.
    #[must_use]
    pub fn as_dyn(&self) -> DynMapper {
        self.inner.clone()
    }

    /// Recover a typed handle from a type-erased one.
    #[must_use]
    pub fn from_dyn(node: &DynMapper) -> Option<Self> {
        node.as_any()
            .downcast_ref::<MapperInner<S, T>>()
            .and_then(|inner| inner.weak_self.upgrade())
            .map(|inner| Self { inner })
    }

    /// Attach into `context`. Crate-internal: reachable through
    /// [`Mapper::attach_root`] or insertion into an attached parent's
    /// container.
    pub(crate) fn attach(&self, context: &Rc<MappingContext>) {
        let core = &self.inner.core;
        match core.state.get() {
            MapperState::NotAttached => {}
            MapperState::Detached => panic!("mapper cannot be reattached after detach"),
            _ => panic!("mapper is already attached"),
        }
        tracing::trace!(mapper = ?core.key(), "attaching mapper");

        if let Err(e) = self.inner.def.on_before_attach(self) {
            error::route(HookStage::BeforeAttach, e);
        }

        *core.context.borrow_mut() = Some(Rc::clone(context));

        let mut config = SynchronizersConfig::default();
        self.inner.def.register_synchronizers(self, &mut config);
        core.parts
            .borrow_mut()
            .extend(config.items.into_iter().map(Part::Synchronizer));

        core.state.set(MapperState::AttachingSynchronizers);
        let sync_ctx = SynchronizerContext::new(self.as_dyn(), Rc::clone(context));
        // Index-based walk: synchronizers may append parts (child containers
        // register themselves on first insert) while we iterate.
        let mut i = 0;
        loop {
            let part = {
                let parts = core.parts.borrow();
                match parts.get(i) {
                    Some(part) => part.clone(),
                    None => break,
                }
            };
            if let Part::Synchronizer(s) = part
                && let Err(e) = s.attach(&sync_ctx)
            {
                error::route(HookStage::SynchronizerAttach, e);
            }
            i += 1;
        }

        core.state.set(MapperState::AttachingChildren);
        let mut i = 0;
        loop {
            let part = {
                let parts = core.parts.borrow();
                match parts.get(i) {
                    Some(part) => part.clone(),
                    None => break,
                }
            };
            if let Part::Children(container) = part {
                container.attach_children(context);
            }
            i += 1;
        }

        context.register(&self.as_dyn());
        core.state.set(MapperState::Attached);

        if let Err(e) = self.inner.def.on_attach(self) {
            error::route(HookStage::Attach, e);
        }
    }

    /// Detach from the current context. Terminal.
    pub(crate) fn detach(&self) {
        let core = &self.inner.core;
        assert_eq!(
            core.state.get(),
            MapperState::Attached,
            "mapper is not attached"
        );
        tracing::trace!(mapper = ?core.key(), "detaching mapper");

        if let Err(e) = self.inner.def.on_detach(self) {
            error::route(HookStage::Detach, e);
        }

        // Reverse part order; containers detach their children depth-first.
        // Snapshot up front: containers unregister themselves from the parts
        // list when they empty out.
        let snapshot: Vec<Part> = core.parts.borrow().clone();
        for part in snapshot.iter().rev() {
            match part {
                Part::Synchronizer(s) => {
                    if let Err(e) = s.detach() {
                        error::route(HookStage::SynchronizerDetach, e);
                    }
                }
                Part::Children(container) => container.detach_children(),
            }
        }

        let context = core
            .context
            .borrow_mut()
            .take()
            .expect("attached mapper must have a context");
        context.unregister(&self.as_dyn());
        core.state.set(MapperState::Detached);
    }

    pub(crate) fn set_parent(&self, parent: Option<Weak<dyn MapperNode>>) {
        *self.inner.core.parent.borrow_mut() = parent;
    }
}

impl<S: Identity, T: Identity> MapperNode for MapperInner<S, T> {
    fn state(&self) -> MapperState {
        self.core.state.get()
    }

    fn is_attached(&self) -> bool {
        self.core.state.get() == MapperState::Attached
    }

    fn parent(&self) -> Option<DynMapper> {
        self.core.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn mapping_context(&self) -> Option<Rc<MappingContext>> {
        self.core.context.borrow().clone()
    }

    fn is_findable(&self) -> bool {
        self.core.findable.get()
    }

    fn mapper_key(&self) -> ObjectKey {
        self.core.key()
    }

    fn source_key(&self) -> ObjectKey {
        self.source.identity()
    }

    fn target_key(&self) -> ObjectKey {
        self.target.identity()
    }

    fn synchronizers(&self) -> Vec<Rc<dyn Synchronizer>> {
        self.core
            .parts
            .borrow()
            .iter()
            .filter_map(|part| match part {
                Part::Synchronizer(s) => Some(Rc::clone(s)),
                Part::Children(_) => None,
            })
            .collect()
    }

    fn children(&self) -> Vec<DynMapper> {
        self.core
            .parts
            .borrow()
            .iter()
            .filter_map(|part| match part {
                Part::Children(c) => Some(c.children_dyn()),
                Part::Synchronizer(_) => None,
            })
            .flatten()
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn core(&self) -> Rc<MapperCore> {
        Rc::clone(&self.core)
    }
}

impl<S: Identity, T: Identity> MapperNode for Mapper<S, T> {
    fn state(&self) -> MapperState {
        self.inner.state()
    }

    fn is_attached(&self) -> bool {
        self.inner.is_attached()
    }

    fn parent(&self) -> Option<DynMapper> {
        self.inner.parent()
    }

    fn mapping_context(&self) -> Option<Rc<MappingContext>> {
        self.inner.mapping_context()
    }

    fn is_findable(&self) -> bool {
        self.inner.is_findable()
    }

    fn mapper_key(&self) -> ObjectKey {
        self.inner.mapper_key()
    }

    fn source_key(&self) -> ObjectKey {
        self.inner.source_key()
    }

    fn target_key(&self) -> ObjectKey {
        self.inner.target_key()
    }

    fn synchronizers(&self) -> Vec<Rc<dyn Synchronizer>> {
        self.inner.synchronizers()
    }

    fn children(&self) -> Vec<DynMapper> {
        self.inner.children()
    }

    fn as_any(&self) -> &dyn Any {
        self.inner.as_ref().as_any()
    }

    fn core(&self) -> Rc<MapperCore> {
        MapperNode::core(self.inner.as_ref())
    }
}
