#![forbid(unsafe_code)]

//! Synchronizers: the units of ongoing source↔target reconciliation.
//!
//! A [`Synchronizer`] is attached by its owning mapper during the
//! synchronizer phase and detached in reverse order during teardown. Most
//! synchronizers subscribe to something observable on attach and hold the
//! resulting [`Registration`] until detach; the [`from_fn`] helper captures
//! exactly that shape.
//!
//! # Invariants
//!
//! 1. Attach and detach of one synchronizer alternate; the owning mapper's
//!    lifecycle guarantees it.
//! 2. Detach releases every subscription taken during attach.
//!
//! # Failure Modes
//!
//! - Hook errors are returned to the mapper, which routes them to the
//!   error sink and continues with the remaining parts.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use treesync_reactive::{EventSource, ListChange, Observable, ObservableList, Registration};

use crate::context::MappingContext;
use crate::error::{self, BoxError, HookStage, SyncResult};
use crate::mapper::DynMapper;

/// A unit of reconciliation owned by a mapper.
pub trait Synchronizer {
    /// Start reconciling. Runs while the owning mapper is attaching.
    fn attach(&self, ctx: &SynchronizerContext) -> SyncResult;
    /// Stop reconciling and release subscriptions.
    fn detach(&self) -> SyncResult;
}

/// What a synchronizer sees of its surroundings during attach.
pub struct SynchronizerContext {
    mapper: DynMapper,
    context: Rc<MappingContext>,
}

impl SynchronizerContext {
    pub(crate) fn new(mapper: DynMapper, context: Rc<MappingContext>) -> Self {
        Self { mapper, context }
    }

    /// The mapper this synchronizer belongs to.
    #[must_use]
    pub fn mapper(&self) -> &DynMapper {
        &self.mapper
    }

    /// The registry the owning mapper is attached in.
    #[must_use]
    pub fn mapping_context(&self) -> &Rc<MappingContext> {
        &self.context
    }
}

// ---- from_fn — subscription-shaped synchronizers ----

struct FnSynchronizer<F> {
    subscribe: F,
    active: RefCell<Option<Registration>>,
}

impl<F> Synchronizer for FnSynchronizer<F>
where
    F: Fn(&SynchronizerContext) -> Result<Registration, BoxError>,
{
    fn attach(&self, ctx: &SynchronizerContext) -> SyncResult {
        let registration = (self.subscribe)(ctx)?;
        *self.active.borrow_mut() = Some(registration);
        Ok(())
    }

    fn detach(&self) -> SyncResult {
        if let Some(registration) = self.active.borrow_mut().take() {
            registration.remove();
        }
        Ok(())
    }
}

/// Build a synchronizer from its attach action. The returned
/// [`Registration`] is held until detach.
pub fn from_fn(
    subscribe: impl Fn(&SynchronizerContext) -> Result<Registration, BoxError> + 'static,
) -> impl Synchronizer {
    FnSynchronizer {
        subscribe,
        active: RefCell::new(None),
    }
}

// ---- for_registration — adopt an existing subscription ----

struct RegistrationSynchronizer {
    registration: RefCell<Option<Registration>>,
}

impl Synchronizer for RegistrationSynchronizer {
    fn attach(&self, _ctx: &SynchronizerContext) -> SyncResult {
        Ok(())
    }

    fn detach(&self) -> SyncResult {
        if let Some(registration) = self.registration.borrow_mut().take() {
            registration.remove();
        }
        Ok(())
    }
}

/// Tie an already-taken subscription to the owning mapper's lifetime.
pub fn for_registration(registration: Registration) -> impl Synchronizer {
    RegistrationSynchronizer {
        registration: RefCell::new(Some(registration)),
    }
}

// ---- composite — group synchronizers as one part ----

struct CompositeSynchronizer {
    items: Vec<Rc<dyn Synchronizer>>,
}

impl Synchronizer for CompositeSynchronizer {
    fn attach(&self, ctx: &SynchronizerContext) -> SyncResult {
        for item in &self.items {
            if let Err(e) = item.attach(ctx) {
                error::route(HookStage::SynchronizerAttach, e);
            }
        }
        Ok(())
    }

    fn detach(&self) -> SyncResult {
        for item in self.items.iter().rev() {
            if let Err(e) = item.detach() {
                error::route(HookStage::SynchronizerDetach, e);
            }
        }
        Ok(())
    }
}

/// Group several synchronizers into one part. Members attach in order and
/// detach in reverse; a failing member is routed to the error sink and the
/// rest still run.
pub fn composite(items: Vec<Rc<dyn Synchronizer>>) -> impl Synchronizer {
    CompositeSynchronizer { items }
}

// ---- property synchronizers ----

/// One-way property sync: `target` tracks `transform(source)`, starting
/// with an initial write during attach.
pub fn for_property<A, B, F>(
    source: &Observable<A>,
    target: &Observable<B>,
    transform: F,
) -> impl Synchronizer + use<A, B, F>
where
    A: Clone + PartialEq + 'static,
    B: Clone + PartialEq + 'static,
    F: Fn(&A) -> B + 'static,
{
    let source = source.clone();
    let target = target.clone();
    let transform = Rc::new(transform);
    from_fn(move |_ctx| {
        target.set(source.with(|v| transform(v)));
        let target = target.clone();
        let transform = Rc::clone(&transform);
        Ok(source.subscribe(move |_, new| target.set(transform(new))))
    })
}

/// Two-way property sync between `left` and `right`. `left` wins the
/// initial write; a cycle guard stops echo updates.
pub fn for_properties_two_way<A, B, F, G>(
    left: &Observable<A>,
    right: &Observable<B>,
    to_right: F,
    to_left: G,
) -> impl Synchronizer + use<A, B, F, G>
where
    A: Clone + PartialEq + 'static,
    B: Clone + PartialEq + 'static,
    F: Fn(&A) -> B + 'static,
    G: Fn(&B) -> A + 'static,
{
    let left = left.clone();
    let right = right.clone();
    let to_right = Rc::new(to_right);
    let to_left = Rc::new(to_left);
    from_fn(move |_ctx| {
        right.set(left.with(|v| to_right(v)));
        let syncing = Rc::new(Cell::new(false));
        let forward = {
            let right = right.clone();
            let to_right = Rc::clone(&to_right);
            let syncing = Rc::clone(&syncing);
            left.subscribe(move |_, new| {
                if syncing.get() {
                    return;
                }
                syncing.set(true);
                right.set(to_right(new));
                syncing.set(false);
            })
        };
        let backward = {
            let left = left.clone();
            let to_left = Rc::clone(&to_left);
            let syncing = Rc::clone(&syncing);
            right.subscribe(move |_, new| {
                if syncing.get() {
                    return;
                }
                syncing.set(true);
                left.set(to_left(new));
                syncing.set(false);
            })
        };
        Ok(Registration::from_many(vec![forward, backward]))
    })
}

/// Run `handler` on every change of `property`. No initial run.
pub fn on_property_change<A, F>(
    property: &Observable<A>,
    handler: F,
) -> impl Synchronizer + use<A, F>
where
    A: Clone + PartialEq + 'static,
    F: Fn(&A, &A) + 'static,
{
    let property = property.clone();
    let handler = Rc::new(handler);
    from_fn(move |_ctx| {
        let handler = Rc::clone(&handler);
        Ok(property.subscribe(move |old, new| handler(old, new)))
    })
}

/// Run `handler` on every structural change of `list`.
pub fn on_list_change<A, F>(
    list: &ObservableList<A>,
    handler: F,
) -> impl Synchronizer + use<A, F>
where
    A: Clone + PartialEq + 'static,
    F: Fn(&ListChange<A>) + 'static,
{
    let list = list.clone();
    let handler = Rc::new(handler);
    from_fn(move |_ctx| {
        let handler = Rc::clone(&handler);
        Ok(list.listen(move |change| handler(change)))
    })
}

/// Run `handler` on every event fired by `source`.
pub fn on_event<E, F>(
    source: &EventSource<E>,
    handler: F,
) -> impl Synchronizer + use<E, F>
where
    E: 'static,
    F: Fn(&E) + 'static,
{
    let source = source.clone();
    let handler = Rc::new(handler);
    from_fn(move |_ctx| {
        let handler = Rc::clone(&handler);
        Ok(source.listen(move |event| handler(event)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{Mapper, MapperDef, SynchronizersConfig};

    type Src = Observable<String>;
    type Tgt = Observable<String>;

    struct PropertyDef;

    impl MapperDef<Src, Tgt> for PropertyDef {
        fn register_synchronizers(&self, m: &Mapper<Src, Tgt>, config: &mut SynchronizersConfig) {
            config.add(for_property(m.source(), m.target(), |s: &String| {
                s.to_uppercase()
            }));
        }
    }

    #[test]
    fn for_property_tracks_source_until_detach() {
        let source = Observable::new("hi".to_string());
        let target = Observable::new(String::new());
        let m = Mapper::with_def(source.clone(), target.clone(), PropertyDef);
        m.attach_root();
        assert_eq!(target.get(), "HI", "initial sync during attach");
        source.set("there".to_string());
        assert_eq!(target.get(), "THERE");
        m.detach_root();
        source.set("gone".to_string());
        assert_eq!(target.get(), "THERE", "detached synchronizer is silent");
    }

    struct TwoWayDef;

    impl MapperDef<Src, Tgt> for TwoWayDef {
        fn register_synchronizers(&self, m: &Mapper<Src, Tgt>, config: &mut SynchronizersConfig) {
            config.add(for_properties_two_way(
                m.source(),
                m.target(),
                |s: &String| s.clone(),
                |t: &String| t.clone(),
            ));
        }
    }

    #[test]
    fn two_way_sync_propagates_both_directions() {
        let source = Observable::new("a".to_string());
        let target = Observable::new("b".to_string());
        let m = Mapper::with_def(source.clone(), target.clone(), TwoWayDef);
        m.attach_root();
        assert_eq!(target.get(), "a", "left wins the initial write");
        source.set("from-left".to_string());
        assert_eq!(target.get(), "from-left");
        target.set("from-right".to_string());
        assert_eq!(source.get(), "from-right");
        m.detach_root();
    }

    #[test]
    fn on_property_change_skips_initial_value() {
        let source = Observable::new(0);
        let target = Observable::new(String::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        struct WatchDef {
            seen: Rc<RefCell<Vec<(i32, i32)>>>,
        }
        impl MapperDef<Observable<i32>, Observable<String>> for WatchDef {
            fn register_synchronizers(
                &self,
                m: &Mapper<Observable<i32>, Observable<String>>,
                config: &mut SynchronizersConfig,
            ) {
                let seen = Rc::clone(&self.seen);
                config.add(on_property_change(m.source(), move |old, new| {
                    seen.borrow_mut().push((*old, *new));
                }));
            }
        }
        let m = Mapper::with_def(
            source.clone(),
            target,
            WatchDef {
                seen: Rc::clone(&seen),
            },
        );
        m.attach_root();
        assert!(seen.borrow().is_empty());
        source.set(1);
        source.set(2);
        assert_eq!(*seen.borrow(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn list_and_event_watchers_report_while_attached() {
        let list = ObservableList::from_vec(vec![1, 2]);
        let events: EventSource<&'static str> = EventSource::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        struct WatchDef {
            events: EventSource<&'static str>,
            log: Rc<RefCell<Vec<String>>>,
        }
        impl MapperDef<ObservableList<i32>, Observable<String>> for WatchDef {
            fn register_synchronizers(
                &self,
                m: &Mapper<ObservableList<i32>, Observable<String>>,
                config: &mut SynchronizersConfig,
            ) {
                let log = Rc::clone(&self.log);
                config.add(on_list_change(m.source(), move |change| {
                    let tag = match change {
                        ListChange::Inserted { index, .. } => format!("ins@{index}"),
                        ListChange::Removed { index, .. } => format!("rem@{index}"),
                    };
                    log.borrow_mut().push(tag);
                }));
                let log = Rc::clone(&self.log);
                config.add(on_event(&self.events, move |name| {
                    log.borrow_mut().push(format!("ev:{name}"));
                }));
            }
        }
        let m = Mapper::with_def(
            list.clone(),
            Observable::new(String::new()),
            WatchDef {
                events: events.clone(),
                log: Rc::clone(&log),
            },
        );
        m.attach_root();
        list.push(3);
        events.fire(&"ping");
        list.remove(0);
        assert_eq!(*log.borrow(), vec!["ins@2", "ev:ping", "rem@0"]);
        m.detach_root();
        list.push(4);
        events.fire(&"late");
        assert_eq!(log.borrow().len(), 3, "detached watchers are silent");
    }

    #[test]
    fn composite_attaches_in_order_and_detaches_in_reverse() {
        let log = Rc::new(RefCell::new(Vec::new()));
        struct Tagged {
            tag: &'static str,
            log: Rc<RefCell<Vec<String>>>,
        }
        impl Synchronizer for Tagged {
            fn attach(&self, _ctx: &SynchronizerContext) -> SyncResult {
                self.log.borrow_mut().push(format!("attach-{}", self.tag));
                Ok(())
            }
            fn detach(&self) -> SyncResult {
                self.log.borrow_mut().push(format!("detach-{}", self.tag));
                Ok(())
            }
        }
        struct CompositeDef {
            log: Rc<RefCell<Vec<String>>>,
        }
        impl MapperDef<Src, Tgt> for CompositeDef {
            fn register_synchronizers(
                &self,
                _m: &Mapper<Src, Tgt>,
                config: &mut SynchronizersConfig,
            ) {
                config.add(composite(vec![
                    Rc::new(Tagged {
                        tag: "a",
                        log: Rc::clone(&self.log),
                    }),
                    Rc::new(Tagged {
                        tag: "b",
                        log: Rc::clone(&self.log),
                    }),
                ]));
            }
        }
        let m = Mapper::with_def(
            Observable::new(String::new()),
            Observable::new(String::new()),
            CompositeDef {
                log: Rc::clone(&log),
            },
        );
        m.attach_root();
        m.detach_root();
        assert_eq!(
            *log.borrow(),
            vec!["attach-a", "attach-b", "detach-b", "detach-a"]
        );
    }

    #[test]
    fn for_registration_releases_on_detach() {
        let source = Observable::new(0);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let reg = source.subscribe(move |_, _| c.set(c.get() + 1));
        struct AdoptDef {
            reg: RefCell<Option<Registration>>,
        }
        impl MapperDef<Observable<i32>, Tgt> for AdoptDef {
            fn register_synchronizers(
                &self,
                _m: &Mapper<Observable<i32>, Tgt>,
                config: &mut SynchronizersConfig,
            ) {
                config.add(for_registration(
                    self.reg.borrow_mut().take().expect("single attach"),
                ));
            }
        }
        let m = Mapper::with_def(
            source.clone(),
            Observable::new(String::new()),
            AdoptDef {
                reg: RefCell::new(Some(reg)),
            },
        );
        m.attach_root();
        source.set(1);
        m.detach_root();
        source.set(2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn synchronizer_context_exposes_mapper_and_registry() {
        let keys = Rc::new(RefCell::new(None));
        struct InspectDef {
            keys: Rc<RefCell<Option<(crate::identity::ObjectKey, usize)>>>,
        }
        impl MapperDef<Src, Tgt> for InspectDef {
            fn register_synchronizers(&self, _m: &Mapper<Src, Tgt>, config: &mut SynchronizersConfig) {
                let keys = Rc::clone(&self.keys);
                config.add(from_fn(move |ctx| {
                    *keys.borrow_mut() = Some((
                        ctx.mapper().mapper_key(),
                        ctx.mapping_context().get_mappings().len(),
                    ));
                    Ok(Registration::empty())
                }));
            }
        }
        let m = Mapper::with_def(
            Observable::new(String::new()),
            Observable::new(String::new()),
            InspectDef {
                keys: Rc::clone(&keys),
            },
        );
        m.attach_root();
        let (key, registered) = keys.borrow().expect("ran during attach");
        assert_eq!(key, m.as_dyn().mapper_key());
        assert_eq!(registered, 0, "runs before the mapper registers itself");
    }
}
