//! Components owned by the scene layer.
//!
//! None of these are written as component data. [`StableId`] is carried by
//! the `entityIdMap`, [`SerializationTag`] only exists for the duration of a
//! save, and [`SceneMember`] / [`PrefabInstance`] describe one particular
//! load, so the serializer strips them and reports the GUIDs they point at
//! as nested assets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use voidscript_ecs::prelude::*;

/// Registered name of [`StableId`].
pub const STABLE_ID: &str = "StableId";
/// Registered name of [`SerializationTag`].
pub const SERIALIZATION_TAG: &str = "SerializationTag";
/// Registered name of [`SceneMember`].
pub const SCENE_MEMBER: &str = "SceneMember";
/// Registered name of [`PrefabInstance`].
pub const PREFAB_INSTANCE: &str = "PrefabInstance";

/// Persistent identity stamped the first time an entity is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StableId {
    pub uuid: Uuid,
}

/// Save-time marker linking a serialized row back to its UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationTag {
    pub uuid: Uuid,
}

/// Attached to every entity loaded from a scene asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneMember {
    /// GUID of the scene asset the entity came from.
    pub scene_guid: Uuid,
}

/// Attached to the root of an instantiated prefab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefabInstance {
    /// GUID of the prefab asset.
    pub source_guid: Uuid,
    /// Unique per instantiation.
    pub instance_id: Uuid,
    /// Prefab-local UUID -> runtime handle in this instance.
    pub entity_map: BTreeMap<Uuid, Entity>,
}

impl PrefabInstance {
    /// Runtime handle of the prefab entity with local UUID `uuid`.
    pub fn entity(&self, uuid: &Uuid) -> Option<Entity> {
        self.entity_map.get(uuid).copied()
    }
}

/// Register the scene components in `world`. Idempotent.
pub fn register_scene_components(world: &mut World) -> Result<(), EcsError> {
    let internal = || EditorMetadata::at("Core/Scene");
    world.register(
        ComponentDescriptor::<StableId>::new(STABLE_ID)
            .config(ComponentConfig::transient())
            .metadata(internal().description("Persistent entity identity")),
    )?;
    world.register(
        ComponentDescriptor::<SerializationTag>::new(SERIALIZATION_TAG)
            .metadata(internal().description("Save-time marker")),
    )?;
    world.register(
        ComponentDescriptor::<SceneMember>::new(SCENE_MEMBER)
            .metadata(internal().description("Scene this entity was loaded from")),
    )?;
    world.register(
        ComponentDescriptor::<PrefabInstance>::new(PREFAB_INSTANCE)
            .metadata(internal().description("Prefab instance root")),
    )?;
    Ok(())
}

/// Despawn every entity (and its descendants) loaded from `scene_guid`.
/// Returns the number of entities removed.
pub fn unload_scene(world: &mut World, scene_guid: Uuid) -> usize {
    let members: Vec<Entity> = world
        .query::<(&SceneMember,)>()
        .map(|e, (m,)| (m.scene_guid == scene_guid).then_some(e))
        .into_iter()
        .flatten()
        .collect();

    let mut removed = 0;
    for entity in members {
        // Members may already be gone as descendants of an earlier member.
        if world.is_alive(entity) {
            removed += world.despawn_recursive(entity).unwrap_or(0);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let mut world = World::new();
        register_scene_components(&mut world).unwrap();
        let before = world.registry().len();
        register_scene_components(&mut world).unwrap();
        assert_eq!(world.registry().len(), before);
        assert!(!world.registry().get_by_name(STABLE_ID).unwrap().config().serializable);
        assert!(world.registry().get_by_name(SERIALIZATION_TAG).unwrap().config().serializable);
    }

    #[test]
    fn unload_removes_only_matching_members() {
        let mut world = World::new();
        register_scene_components(&mut world).unwrap();
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let parent = world.spawn_with(SceneMember { scene_guid: a }).unwrap();
        let child = world.spawn_with(SceneMember { scene_guid: a }).unwrap();
        world.add_child(parent, child).unwrap();
        let other = world.spawn_with(SceneMember { scene_guid: b }).unwrap();

        assert_eq!(unload_scene(&mut world, a), 2);
        assert!(!world.is_alive(parent));
        assert!(!world.is_alive(child));
        assert!(world.is_alive(other));
    }
}
