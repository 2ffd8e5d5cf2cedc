//! Entity and world snapshots.
//!
//! An [`EntitySnapshot`] is every component of one entity as `name -> JSON`,
//! used for editor undo and for restoring state when leaving play mode. A
//! [`WorldSnapshot`] is the same for every live entity plus the allocator
//! state, so handles come back exactly as they were.
//!
//! Snapshots ignore `ComponentConfig::serializable`: they are in-memory
//! state, not saved assets.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::{BoxedComponent, ComponentTypeId};
use crate::entity::{AllocatorState, Entity, EntityAllocator};
use crate::world::{unknown_component, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Every component of one entity, by registered name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity the components were captured from.
    pub entity: Entity,
    /// Component name -> JSON value, in name order.
    pub components: BTreeMap<String, Value>,
}

impl EntitySnapshot {
    /// Captured JSON for `component`, if the entity held it.
    pub fn get(&self, component: &str) -> Option<&Value> {
        self.components.get(component)
    }

    /// Number of captured components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the entity held no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Every live entity of a world, plus what is needed to hand out the same
/// handles afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Slot generations and free list at capture time.
    pub allocator: AllocatorState,
    /// Registered component names at capture time, for diagnostics.
    pub component_names: Vec<String>,
    /// Live entities sorted by raw handle.
    pub entities: Vec<EntitySnapshot>,
}

// ---------------------------------------------------------------------------
// World impl
// ---------------------------------------------------------------------------

impl World {
    /// Capture every component of `entity`.
    pub fn capture_entity(&self, entity: Entity) -> Result<EntitySnapshot, EcsError> {
        let mut components = BTreeMap::new();
        for (id, value) in self.get_all_components(entity)? {
            let ty = self
                .registry
                .get(id)
                .ok_or(EcsError::UnregisteredComponentId { id: id.raw() })?;
            components.insert(ty.name().to_owned(), ty.to_json(value)?);
        }
        Ok(EntitySnapshot { entity, components })
    }

    /// Put `entity` back into the captured state: components missing from
    /// the snapshot are removed, the rest are overwritten.
    ///
    /// Every value is decoded before the entity is touched, so an error
    /// leaves it unchanged.
    pub fn restore_entity(&mut self, entity: Entity, snapshot: &EntitySnapshot) -> Result<(), EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::StaleEntity(entity));
        }
        let components = self.decode_components(&snapshot.components)?;
        self.replace_all(entity, components)
    }

    /// Capture every live entity and the allocator.
    pub fn capture_snapshot(&self) -> Result<WorldSnapshot, EcsError> {
        let mut entities = self
            .entities()
            .into_iter()
            .map(|e| self.capture_entity(e))
            .collect::<Result<Vec<_>, _>>()?;
        entities.sort_by_key(|s| s.entity.to_raw());

        Ok(WorldSnapshot {
            allocator: self.allocator.state(),
            component_names: self
                .registry
                .registered_names()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            entities,
        })
    }

    /// Replace every entity with the snapshot's, keeping exact handles.
    ///
    /// Component types must already be registered; registration itself is
    /// not part of the snapshot. The snapshot is validated and decoded in
    /// full before the world is cleared.
    pub fn restore_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
        let allocator = EntityAllocator::from_state(&snapshot.allocator)?;
        validate_entities(&allocator, snapshot)?;
        let mut rows = Vec::with_capacity(snapshot.entities.len());
        for entity in &snapshot.entities {
            rows.push((entity.entity, self.decode_components(&entity.components)?));
        }

        self.clear_storage();
        self.allocator = allocator;
        for (entity, mut components) in rows {
            components.sort_by_key(|(id, _)| *id);
            self.place(entity, components);
        }
        Ok(())
    }

    fn decode_components(
        &self,
        components: &BTreeMap<String, Value>,
    ) -> Result<Vec<(ComponentTypeId, BoxedComponent)>, EcsError> {
        components
            .iter()
            .map(|(name, value)| {
                let ty = self
                    .registry
                    .get_by_name(name)
                    .ok_or_else(|| unknown_component(&self.registry, name))?;
                Ok((ty.id(), ty.from_json(value.clone())?))
            })
            .collect()
    }
}

/// Snapshot entities must be exactly the allocator's live slots.
fn validate_entities(allocator: &EntityAllocator, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
    let invalid = |details: String| -> Result<(), EcsError> { Err(EcsError::InvalidSnapshot { details }) };

    let mut indices = HashSet::new();
    for snap in &snapshot.entities {
        if !indices.insert(snap.entity.index()) {
            return invalid(format!("entity index {} listed twice", snap.entity.index()));
        }
        if !allocator.is_alive(snap.entity) {
            return invalid(format!("entity {} is free or stale in the allocator", snap.entity));
        }
    }
    if allocator.alive_count() != indices.len() {
        return invalid(format!(
            "{} live allocator slots but {} entities",
            allocator.alive_count(),
            indices.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health(u32);

    fn setup() -> World {
        let mut world = World::new();
        world.register_component::<Position>("Position");
        world.register_component::<Health>("Health");
        world
    }

    #[test]
    fn capture_uses_names_in_order() {
        let mut world = setup();
        let e = world.spawn_with(Health(9)).unwrap();
        world.insert_component(e, Position { x: 1.0, y: 2.0 }).unwrap();

        let snap = world.capture_entity(e).unwrap();
        let names: Vec<&str> = snap.components.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Health", "Position"]);
        assert_eq!(snap.get("Health"), Some(&json!(9)));
    }

    #[test]
    fn restore_entity_undoes_edits() {
        let mut world = setup();
        let e = world.spawn_with(Position { x: 0.0, y: 0.0 }).unwrap();
        let before = world.capture_entity(e).unwrap();

        world.get_component_mut::<Position>(e).unwrap().x = 10.0;
        world.insert_component(e, Health(3)).unwrap();

        world.restore_entity(e, &before).unwrap();
        assert_eq!(
            world.get_component::<Position>(e),
            Some(&Position { x: 0.0, y: 0.0 })
        );
        assert!(!world.has_component::<Health>(e));
    }

    #[test]
    fn failed_restore_leaves_entity_untouched() {
        let mut world = setup();
        let e = world.spawn_with(Health(1)).unwrap();
        let mut bad = world.capture_entity(e).unwrap();
        bad.components.insert("Position".into(), json!("garbage"));

        assert!(world.restore_entity(e, &bad).is_err());
        assert_eq!(world.get_component::<Health>(e), Some(&Health(1)));
    }

    #[test]
    fn world_snapshot_restores_exact_handles() {
        let mut world = setup();
        let a = world.spawn_with(Health(1)).unwrap();
        let b = world.spawn_with(Health(2)).unwrap();
        world.despawn(a).unwrap();
        let c = world.spawn_with(Position { x: 1.0, y: 1.0 }).unwrap();
        let snap = world.capture_snapshot().unwrap();

        let text = serde_json::to_string(&snap).unwrap();
        let snap: WorldSnapshot = serde_json::from_str(&text).unwrap();

        world.despawn(b).unwrap();
        world.spawn_with(Health(99)).unwrap();
        world.restore_snapshot(&snap).unwrap();

        assert_eq!(world.entity_count(), 2);
        assert!(!world.is_alive(a));
        assert_eq!(world.get_component::<Health>(b), Some(&Health(2)));
        assert!(world.has_component::<Position>(c));
        // `c` reused `a`'s slot, so the next handle gets a fresh index.
        assert_eq!(c.index(), a.index());
        assert_eq!(world.spawn().index(), 2);
    }

    #[test]
    fn inconsistent_snapshot_is_rejected_before_clearing() {
        let mut world = setup();
        let e = world.spawn_with(Health(5)).unwrap();
        let mut snap = world.capture_snapshot().unwrap();
        snap.allocator.free.push(e.index());

        assert!(matches!(
            world.restore_snapshot(&snap),
            Err(EcsError::InvalidSnapshot { .. })
        ));
        assert_eq!(world.get_component::<Health>(e), Some(&Health(5)));
    }

    #[test]
    fn hierarchy_survives_snapshots() {
        let mut world = setup();
        let (p, c) = (world.spawn(), world.spawn());
        world.add_child(p, c).unwrap();
        let snap = world.capture_snapshot().unwrap();
        world.despawn_recursive(p).unwrap();
        world.restore_snapshot(&snap).unwrap();
        assert_eq!(world.children(p), &[c]);
        assert_eq!(world.parent(c), Some(p));
    }
}
