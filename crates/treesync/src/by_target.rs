#![forbid(unsafe_code)]

//! Reverse lookup from target objects to the mappers producing them.
//!
//! The registry only indexes by source identity; this index listens to the
//! registry's event stream and maintains the target-side map. It seeds
//! itself from all currently registered mappers, findable or not, and stays
//! current until disposed (or dropped).

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use treesync_reactive::Registration;

use crate::context::{MappingContext, MappingEvent};
use crate::identity::{Identity, ObjectKey};
use crate::mapper::DynMapper;

/// Live index of attached mappers keyed by target identity.
pub struct ByTargetIndex {
    map: Rc<RefCell<AHashMap<ObjectKey, Vec<DynMapper>>>>,
    registration: Registration,
}

impl ByTargetIndex {
    /// Build an index over `context`, seeded with everything already
    /// registered.
    #[must_use]
    pub fn new(context: &Rc<MappingContext>) -> Self {
        let map: Rc<RefCell<AHashMap<ObjectKey, Vec<DynMapper>>>> =
            Rc::new(RefCell::new(AHashMap::new()));
        for mapper in context.get_mappings() {
            map.borrow_mut()
                .entry(mapper.target_key())
                .or_default()
                .push(mapper);
        }
        let listener_map = Rc::clone(&map);
        let registration = context.add_listener(move |event| match event {
            MappingEvent::Registered(mapper) => {
                listener_map
                    .borrow_mut()
                    .entry(mapper.target_key())
                    .or_default()
                    .push(Rc::clone(mapper));
            }
            MappingEvent::Unregistered(mapper) => {
                let mut map = listener_map.borrow_mut();
                if let Some(entries) = map.get_mut(&mapper.target_key()) {
                    entries.retain(|m| m.mapper_key() != mapper.mapper_key());
                    if entries.is_empty() {
                        map.remove(&mapper.target_key());
                    }
                }
            }
        });
        Self { map, registration }
    }

    /// All attached mappers whose target is `target`, in registration
    /// order.
    #[must_use]
    pub fn get_mappers(&self, target: &impl Identity) -> Vec<DynMapper> {
        self.map
            .borrow()
            .get(&target.identity())
            .cloned()
            .unwrap_or_default()
    }

    /// Stop tracking and drop the index.
    pub fn dispose(self) {
        self.registration.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::ChildList;
    use crate::mapper::Mapper;

    type Src = Rc<i32>;
    type Tgt = Rc<String>;

    fn leaf(n: i32) -> Mapper<Src, Tgt> {
        Mapper::new(Rc::new(n), Rc::new(format!("t{n}")))
    }

    #[test]
    fn index_tracks_registrations_live() {
        let ctx = MappingContext::new();
        let index = ByTargetIndex::new(&ctx);
        let m = leaf(1);
        let target = m.target().clone();
        m.attach_root_with(&ctx);
        let found = index.get_mappers(&target);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mapper_key(), m.as_dyn().mapper_key());
        m.detach_root();
        assert!(index.get_mappers(&target).is_empty());
    }

    #[test]
    fn index_seeds_from_existing_registrations() {
        let ctx = MappingContext::new();
        let root = leaf(0);
        let child = leaf(1);
        let list: ChildList<Src, Tgt> = root.create_child_list();
        list.push(child.clone());
        root.attach_root_with(&ctx);
        let index = ByTargetIndex::new(&ctx);
        assert_eq!(index.get_mappers(&child.target().clone()).len(), 1);
    }

    #[test]
    fn index_covers_non_findable_mappers() {
        let ctx = MappingContext::new();
        let m = leaf(1);
        m.set_findable(false);
        let target = m.target().clone();
        m.attach_root_with(&ctx);
        let index = ByTargetIndex::new(&ctx);
        assert_eq!(index.get_mappers(&target).len(), 1);
    }

    #[test]
    fn disposed_index_stops_tracking() {
        let ctx = MappingContext::new();
        let index = ByTargetIndex::new(&ctx);
        let snapshot = Rc::clone(&index.map);
        index.dispose();
        let m = leaf(1);
        m.attach_root_with(&ctx);
        assert!(snapshot.borrow().is_empty());
    }
}
