#![forbid(unsafe_code)]

//! Source→target tree synchronization.
//!
//! `treesync` keeps a tree of target objects (views, DOM nodes, any
//! output structure) synchronized with a tree of source model objects. The
//! unit of composition is the [`Mapper`]: one node pairing one source with
//! one target, owning the synchronizers that keep them consistent and the
//! containers holding child mappers. Attaching the root mapper builds the
//! whole target tree; model changes propagate through synchronizers;
//! detaching tears everything down in reverse.
//!
//! # Architecture
//!
//! - [`mapper`]: the node type and its attach/detach state machine.
//! - [`children`]: list, set, and single-slot child containers that tie
//!   structural mutation to the lifecycle.
//! - [`context`]: the per-tree registry mapping source identity back to
//!   attached mappers.
//! - [`synchronizer`]: property, event, and composite synchronizers.
//! - [`role`] / [`single_role`]: collection and 0..1 roles driving child
//!   mappers from source collections.
//! - [`difference`]: the minimal edit script keeping mapper identity
//!   stable across collection updates.
//! - [`by_target`]: reverse lookup from target objects.
//!
//! # Invariants
//!
//! 1. Mapper lifecycle is one-shot: `NotAttached → … → Attached →
//!    Detached`, never back.
//! 2. Every structural mutation of an attached tree keeps the registry
//!    consistent before control returns to the caller.
//! 3. Collection updates apply a minimal edit script: an unchanged or
//!    moved source item keeps its mapper instance.
//!
//! # Failure Modes
//!
//! - Contract violations (double attach, parent conflicts, ambiguous
//!   lookups) panic.
//! - User hook failures are routed to the configurable error sink and do
//!   not interrupt lifecycle transitions.

pub mod by_target;
pub mod children;
pub mod context;
pub mod difference;
pub mod error;
pub mod identity;
pub mod mapper;
pub mod role;
pub mod single_role;
pub mod synchronizer;

pub use by_target::ByTargetIndex;
pub use children::{ChildList, ChildProperty, ChildSet};
pub use context::{MappingContext, MappingEvent};
pub use difference::{DifferenceItem, apply_script, difference};
pub use error::{
    BoxError, ErrorSink, HookError, HookStage, LoggingSink, RethrowSink, SyncResult,
    install_error_sink, with_error_sink,
};
pub use identity::{Identity, ObjectKey};
pub use mapper::{DynMapper, Mapper, MapperDef, MapperNode, MapperState, SynchronizersConfig};
pub use role::{
    MapperFactory, MapperProcessor, RoleSynchronizer, TargetList, for_derived_role,
    for_observable_role, for_simple_role,
};
pub use single_role::{
    ConstantRoleSynchronizer, SingleRoleSynchronizer, for_constant_role, for_single_role,
};
pub use synchronizer::{
    Synchronizer, SynchronizerContext, composite, for_property, for_properties_two_way,
    for_registration, from_fn, on_event, on_list_change, on_property_change,
};
