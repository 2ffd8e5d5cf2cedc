//! Save and load of entity subgraphs.
//!
//! # Saving
//!
//! The subgraph below the given roots is collected by following `Children`.
//! Each entity gets a stable UUID (reused from its [`StableId`] when it has
//! one) and a temporary [`SerializationTag`] carrying that UUID. The tagged
//! entities are then walked in *storage* order, which is what assigns the
//! sequential IDs in the document; archetype storage groups entities by
//! component set, so that order has nothing to do with collection order.
//! The `entityIdMap` is therefore rebuilt from the tag payloads found in the
//! serialized rows, never from the order the entities were collected in.
//!
//! Instance-specific components ([`SceneMember`], [`PrefabInstance`], and a
//! root's `Parent` pointing outside the subgraph) are removed for the walk
//! and put back afterwards. Tags are removed whether or not the walk
//! succeeded.
//!
//! # Loading
//!
//! Loading is best-effort. Structural problems (unsupported version,
//! duplicate entity IDs, roots missing from `entityIdMap`) fail before any
//! entity is spawned. Everything else that goes wrong with one component or
//! property is recorded as a [`SkippedItem`] and the load carries on.
//! Once every component is built, `Parent` and `Children` are reconciled
//! among the loaded entities: a child's own `Parent` is authoritative, so a
//! listing it does not confirm is dropped and a parent missing the listing
//! gains it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;
use voidscript_ecs::component::BoxedComponent;
use voidscript_ecs::prelude::*;

use crate::components::{
    register_scene_components, PrefabInstance, SceneMember, SerializationTag, StableId,
    SERIALIZATION_TAG,
};
use crate::format::{
    check_version, AssetKind, AssetMetadata, PrefabAsset, PrefabBlock, SceneAsset, SceneBlock,
    SerializedComponent, SerializedEntity, SerializedWorld, FORMAT_VERSION,
};
use crate::uuid_source::{UuidMinter, UuidSource};
use crate::SceneError;

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

/// Per-save settings for [`SceneSerializer::save_scene`] and [`SceneSerializer::save_prefab`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Asset GUID; a fresh one is minted when `None`.
    pub guid: Option<Uuid>,
    /// Written to the metadata `path` field.
    pub path: Option<String>,
}

impl SaveOptions {
    pub fn guid(mut self, guid: Uuid) -> Self {
        self.guid = Some(guid);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Why a component or property was left out of a load.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No component type with this name is registered.
    UnknownComponent,
    /// A property codec rejected the stored value; the property was dropped.
    PropertyDecode { property: String, details: String },
    /// The merged JSON did not deserialize into the component type.
    ComponentConstruction { details: String },
    /// An entity reference named an ID that is not in the document.
    UnresolvedReference { property: String, reference: Value },
}

/// One thing a load had to leave out.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    /// Serialized ID of the entity being built.
    pub entity_id: u32,
    /// Component type name as written in the document.
    pub component: String,
    pub reason: SkipReason,
}

impl fmt::Display for SkippedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (id, component) = (self.entity_id, &self.component);
        match &self.reason {
            SkipReason::UnknownComponent => {
                write!(f, "entity #{id}: component type '{component}' is not registered")
            }
            SkipReason::PropertyDecode { property, details } => {
                write!(f, "entity #{id}: {component}.{property} failed to decode: {details}")
            }
            SkipReason::ComponentConstruction { details } => {
                write!(f, "entity #{id}: could not build '{component}': {details}")
            }
            SkipReason::UnresolvedReference { property, reference } => {
                write!(f, "entity #{id}: {component}.{property} references unknown entity {reference}")
            }
        }
    }
}

/// Result of [`SceneSerializer::load_scene`] and
/// [`SceneSerializer::instantiate_prefab`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    /// Spawned entities, in document order.
    pub entities: Vec<Entity>,
    /// Runtime handles of the declared roots, in declared order.
    pub roots: Vec<Entity>,
    /// Stable UUID -> runtime handle.
    pub uuid_map: BTreeMap<Uuid, Entity>,
    /// Everything that was left out, in the order it was met.
    pub skipped: Vec<SkippedItem>,
}

impl LoadOutcome {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Whether everything in the document was loaded.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// First declared root.
    pub fn root(&self) -> Option<Entity> {
        self.roots.first().copied()
    }

    pub fn entity_for(&self, uuid: &Uuid) -> Option<Entity> {
        self.uuid_map.get(uuid).copied()
    }
}

// ---------------------------------------------------------------------------
// SceneSerializer
// ---------------------------------------------------------------------------

/// Converts entity subgraphs to and from [`SceneAsset`] / [`PrefabAsset`].
#[derive(Debug, Clone)]
pub struct SceneSerializer {
    minter: UuidMinter,
}

impl Default for SceneSerializer {
    fn default() -> Self {
        Self::new(UuidSource::Random)
    }
}

/// What a save walk produced, before it is wrapped in a document.
struct Captured {
    world: SerializedWorld,
    entity_id_map: BTreeMap<u32, Uuid>,
    root_uuids: Vec<Uuid>,
    nested_scenes: Vec<Uuid>,
    nested_prefabs: Vec<Uuid>,
}

impl Captured {
    fn metadata(&self, guid: Uuid, path: Option<String>, kind: AssetKind) -> AssetMetadata {
        let component_types: BTreeSet<&str> = self
            .world
            .entities
            .iter()
            .flat_map(|e| e.components.iter().map(|c| c.type_name.as_str()))
            .collect();
        AssetMetadata {
            guid,
            path,
            kind,
            entity_count: self.world.entities.len(),
            component_types: component_types.into_iter().map(str::to_owned).collect(),
            nested_scenes: self.nested_scenes.clone(),
            nested_prefabs: self.nested_prefabs.clone(),
        }
    }
}

/// Instance-specific components taken off for the duration of a save.
#[derive(Default)]
struct Stripped {
    members: Vec<(Entity, SceneMember)>,
    instances: Vec<(Entity, PrefabInstance)>,
    parents: Vec<(Entity, Parent)>,
}

impl SceneSerializer {
    /// Serializer minting UUIDs from `source`.
    pub fn new(source: UuidSource) -> Self {
        Self {
            minter: source.minter(),
        }
    }

    /// Draw the next UUID from this serializer's source.
    pub fn mint_uuid(&mut self) -> Uuid {
        self.minter.mint()
    }

    /// Save the subgraphs below `roots` as a scene.
    pub fn save_scene(
        &mut self,
        world: &mut World,
        roots: &[Entity],
        options: SaveOptions,
    ) -> Result<SceneAsset, SceneError> {
        let guid = options.guid.unwrap_or_else(|| self.minter.mint());
        let captured = self.capture(world, roots, guid)?;
        let metadata = captured.metadata(guid, options.path, AssetKind::Scene);
        debug!(
            guid = %guid,
            entities = metadata.entity_count,
            roots = captured.root_uuids.len(),
            "scene saved"
        );
        Ok(SceneAsset {
            version: FORMAT_VERSION,
            metadata,
            world: captured.world,
            scene: SceneBlock {
                entity_id_map: captured.entity_id_map,
                root_entity_local_ids: captured.root_uuids,
            },
        })
    }

    /// Save the subgraph below `root` as a prefab.
    pub fn save_prefab(
        &mut self,
        world: &mut World,
        root: Entity,
        options: SaveOptions,
    ) -> Result<PrefabAsset, SceneError> {
        let guid = options.guid.unwrap_or_else(|| self.minter.mint());
        let captured = self.capture(world, &[root], guid)?;
        let metadata = captured.metadata(guid, options.path, AssetKind::Prefab);
        let root_entity_id = captured
            .root_uuids
            .first()
            .copied()
            .ok_or(SceneError::NoRoots)?;
        debug!(guid = %guid, entities = metadata.entity_count, "prefab saved");
        Ok(PrefabAsset {
            version: FORMAT_VERSION,
            metadata,
            world: captured.world,
            prefab: PrefabBlock {
                entity_id_map: captured.entity_id_map,
                root_entity_id,
            },
        })
    }

    /// Spawn every entity of `asset` and mark each with [`SceneMember`].
    pub fn load_scene(&mut self, world: &mut World, asset: &SceneAsset) -> Result<LoadOutcome, SceneError> {
        check_version(asset.version)?;
        let outcome = load_world(
            world,
            &asset.world,
            &asset.scene.entity_id_map,
            &asset.scene.root_entity_local_ids,
        )?;
        let member = SceneMember {
            scene_guid: asset.metadata.guid,
        };
        for &entity in &outcome.entities {
            world.insert_component(entity, member)?;
        }
        log_outcome(&outcome, AssetKind::Scene, asset.metadata.guid);
        Ok(outcome)
    }

    /// Spawn a new instance of `asset`; its root gets a [`PrefabInstance`].
    pub fn instantiate_prefab(
        &mut self,
        world: &mut World,
        asset: &PrefabAsset,
    ) -> Result<LoadOutcome, SceneError> {
        check_version(asset.version)?;
        let outcome = load_world(
            world,
            &asset.world,
            &asset.prefab.entity_id_map,
            std::slice::from_ref(&asset.prefab.root_entity_id),
        )?;
        let root = outcome.root().ok_or(SceneError::UnknownRootUuid {
            uuid: asset.prefab.root_entity_id,
        })?;
        let instance = PrefabInstance {
            source_guid: asset.metadata.guid,
            instance_id: self.minter.mint(),
            entity_map: outcome.uuid_map.clone(),
        };
        world.insert_component(root, instance)?;
        log_outcome(&outcome, AssetKind::Prefab, asset.metadata.guid);
        Ok(outcome)
    }

    // -- save internals -------------------------------------------------------

    fn capture(&mut self, world: &mut World, roots: &[Entity], guid: Uuid) -> Result<Captured, SceneError> {
        register_scene_components(world)?;
        if roots.is_empty() {
            return Err(SceneError::NoRoots);
        }
        if let Some(&dead) = roots.iter().find(|&&r| !world.is_alive(r)) {
            return Err(EcsError::StaleEntity(dead).into());
        }

        let collected = collect_subgraph(world, roots);
        let uuids = self.assign_uuids(world, &collected)?;

        let mut stripped = Stripped::default();
        let walked = tag_and_walk(world, &collected, &uuids, roots, &mut stripped);
        let nested_scenes = nested(stripped.members.iter().map(|(_, m)| m.scene_guid), guid);
        let nested_prefabs = nested(stripped.instances.iter().map(|(_, p)| p.source_guid), guid);
        let cleaned = cleanup(world, &collected, stripped);
        let mut serialized = walked?;
        cleaned?;

        let mut entity_id_map = BTreeMap::new();
        for entity in &mut serialized.entities {
            let id = entity.id;
            let pos = entity
                .components
                .iter()
                .position(|c| c.type_name == SERIALIZATION_TAG)
                .ok_or(SceneError::MarkerMissing { id })?;
            let marker = entity.components.remove(pos);
            let tag: SerializationTag =
                serde_json::from_value(marker.data).map_err(|_| SceneError::MarkerMissing { id })?;
            entity_id_map.insert(id, tag.uuid);
        }

        let uuid_of: HashMap<Entity, Uuid> = collected.iter().copied().zip(uuids).collect();
        let serialized_uuids: HashSet<Uuid> = entity_id_map.values().copied().collect();
        let mut root_uuids: Vec<Uuid> = Vec::with_capacity(roots.len());
        for root in roots {
            let uuid = uuid_of
                .get(root)
                .copied()
                .filter(|u| serialized_uuids.contains(u))
                .ok_or(SceneError::RootNotSerialized { entity: *root })?;
            if !root_uuids.contains(&uuid) {
                root_uuids.push(uuid);
            }
        }

        Ok(Captured {
            world: serialized,
            entity_id_map,
            root_uuids,
            nested_scenes,
            nested_prefabs,
        })
    }

    /// Reuse each entity's [`StableId`], minting one where it is missing or
    /// already taken by another entity in the same save.
    fn assign_uuids(&mut self, world: &mut World, collected: &[Entity]) -> Result<Vec<Uuid>, SceneError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(collected.len());
        for &entity in collected {
            let previous = world.get_component::<StableId>(entity).map(|s| s.uuid);
            let uuid = match previous {
                Some(uuid) if seen.insert(uuid) => uuid,
                previous => {
                    if let Some(dup) = previous {
                        warn!(entity = ?entity, uuid = %dup, "duplicate stable id in subgraph; minting a new one");
                    }
                    let fresh = self.minter.mint();
                    seen.insert(fresh);
                    world.insert_component(entity, StableId { uuid: fresh })?;
                    fresh
                }
            };
            out.push(uuid);
        }
        Ok(out)
    }
}

/// Roots first, then each root's descendants; every entity once.
fn collect_subgraph(world: &World, roots: &[Entity]) -> Vec<Entity> {
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    for &root in roots {
        for entity in std::iter::once(root).chain(world.descendants(root)) {
            if visited.insert(entity) {
                out.push(entity);
            }
        }
    }
    out
}

fn nested(guids: impl Iterator<Item = Uuid>, own: Uuid) -> Vec<Uuid> {
    guids
        .filter(|g| *g != own)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn tag_and_walk(
    world: &mut World,
    collected: &[Entity],
    uuids: &[Uuid],
    roots: &[Entity],
    stripped: &mut Stripped,
) -> Result<SerializedWorld, SceneError> {
    for (&entity, &uuid) in collected.iter().zip(uuids) {
        world.insert_component(entity, SerializationTag { uuid })?;
    }

    let members: HashSet<Entity> = collected.iter().copied().collect();
    for &entity in collected {
        if let Some(member) = world.remove_component::<SceneMember>(entity)? {
            stripped.members.push((entity, member));
        }
        if let Some(instance) = world.remove_component::<PrefabInstance>(entity)? {
            stripped.instances.push((entity, instance));
        }
    }
    for &root in roots {
        let outside = world.parent(root).is_some_and(|p| !members.contains(&p));
        if outside {
            if let Some(parent) = world.remove_component::<Parent>(root)? {
                stripped.parents.push((root, parent));
            }
        }
    }

    walk_tagged(world, &members)
}

/// Serialize every tagged entity in storage order.
fn walk_tagged(world: &World, members: &HashSet<Entity>) -> Result<SerializedWorld, SceneError> {
    let order: Vec<Entity> = world
        .query::<(&SerializationTag,)>()
        .entities()
        .into_iter()
        .filter(|e| members.contains(e))
        .collect();
    let ids: HashMap<Entity, u32> = order.iter().copied().zip(0u32..).collect();

    let registry = world.registry();
    let mut entities = Vec::with_capacity(order.len());
    for (&entity, id) in order.iter().zip(0u32..) {
        let mut components = Vec::new();
        for (type_id, value) in world.get_all_components(entity)? {
            let ty = registry
                .get(type_id)
                .ok_or(EcsError::UnregisteredComponentId { id: type_id.raw() })?;
            if !ty.config().serializable {
                continue;
            }
            let data = encode_component(ty, ty.to_json(value)?, &ids)?;
            components.push(SerializedComponent {
                type_name: ty.name().to_owned(),
                data,
            });
        }
        components.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        entities.push(SerializedEntity { id, components });
    }
    Ok(SerializedWorld { entities })
}

fn cleanup(world: &mut World, collected: &[Entity], stripped: Stripped) -> Result<(), SceneError> {
    for &entity in collected {
        world.remove_component::<SerializationTag>(entity)?;
    }
    for (entity, member) in stripped.members {
        world.insert_component(entity, member)?;
    }
    for (entity, instance) in stripped.instances {
        world.insert_component(entity, instance)?;
    }
    for (entity, parent) in stripped.parents {
        world.insert_component(entity, parent)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Property encoding
// ---------------------------------------------------------------------------

/// Apply the type's property config to one component's native JSON: drop
/// unserializable properties, renumber entity handles to document IDs,
/// apply the null policy and run codecs.
fn encode_component(ty: &ComponentType, mut data: Value, ids: &HashMap<Entity, u32>) -> Result<Value, SceneError> {
    let Value::Object(map) = &mut data else {
        return Ok(data);
    };
    for (property, cfg) in &ty.config().properties {
        let Some(mut value) = map.remove(property) else {
            continue;
        };
        if !cfg.serializable {
            continue;
        }
        if let Some(kind) = cfg.entity_ref {
            value = renumber(value, kind, |raw| {
                let id = raw
                    .as_u64()
                    .map(Entity::from_raw)
                    .and_then(|e| ids.get(&e).copied());
                if id.is_none() {
                    warn!(component = %ty.name(), property = %property, reference = %raw, "entity reference leaves the saved subgraph");
                }
                id.map(Value::from)
            });
        }
        if value.is_null() {
            if cfg.null_policy == NullPolicy::Preserve {
                map.insert(property.clone(), value);
            }
            continue;
        }
        if let Some(codec) = &cfg.codec {
            value = codec.encode(&value).map_err(|source| SceneError::PropertyEncode {
                component: ty.name().to_owned(),
                property: property.clone(),
                source,
            })?;
        }
        map.insert(property.clone(), value);
    }
    Ok(data)
}

/// Map an entity-reference property through `resolve`. A single reference
/// that does not resolve becomes `null`; unresolved list items are dropped.
fn renumber(value: Value, kind: EntityRefKind, mut resolve: impl FnMut(&Value) -> Option<Value>) -> Value {
    match kind {
        EntityRefKind::Single if value.is_null() => Value::Null,
        EntityRefKind::Single => resolve(&value).unwrap_or(Value::Null),
        EntityRefKind::List => match value {
            Value::Array(items) => Value::Array(items.iter().filter_map(&mut resolve).collect()),
            Value::Null => Value::Null,
            other => {
                warn!(value = %other, "entity list property is not an array; emptied");
                Value::Array(Vec::new())
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Load internals
// ---------------------------------------------------------------------------

fn load_world(
    world: &mut World,
    data: &SerializedWorld,
    id_map: &BTreeMap<u32, Uuid>,
    roots: &[Uuid],
) -> Result<LoadOutcome, SceneError> {
    register_scene_components(world)?;

    let mut ids = HashSet::new();
    for entity in &data.entities {
        if !ids.insert(entity.id) {
            return Err(SceneError::DuplicateEntityId { id: entity.id });
        }
    }
    let id_of: HashMap<Uuid, u32> = id_map.iter().map(|(&id, &uuid)| (uuid, id)).collect();
    for root in roots {
        if !id_of.get(root).is_some_and(|id| ids.contains(id)) {
            return Err(SceneError::UnknownRootUuid { uuid: *root });
        }
    }

    // Every handle exists before any component is built, so references to
    // later entities resolve.
    let handles: HashMap<u32, Entity> = data
        .entities
        .iter()
        .map(|e| (e.id, world.spawn()))
        .collect();

    let mut outcome = LoadOutcome::default();
    for serialized in &data.entities {
        let Some(&entity) = handles.get(&serialized.id) else {
            continue;
        };
        let components: Vec<(ComponentTypeId, BoxedComponent)> = serialized
            .components
            .iter()
            .filter_map(|c| build_component(world.registry(), serialized.id, c, &handles, &mut outcome.skipped))
            .collect();
        world.insert_many_boxed(entity, components)?;

        if let Some(&uuid) = id_map.get(&serialized.id) {
            world.insert_component(entity, StableId { uuid })?;
            outcome.uuid_map.insert(uuid, entity);
        }
        outcome.entities.push(entity);
    }
    reconcile_hierarchy(world, &outcome.entities)?;
    outcome.roots = roots
        .iter()
        .filter_map(|uuid| outcome.uuid_map.get(uuid).copied())
        .collect();
    Ok(outcome)
}

fn build_component(
    registry: &ComponentRegistry,
    entity_id: u32,
    component: &SerializedComponent,
    handles: &HashMap<u32, Entity>,
    skipped: &mut Vec<SkippedItem>,
) -> Option<(ComponentTypeId, BoxedComponent)> {
    let name = &component.type_name;
    let Some(ty) = registry.get_by_name(name) else {
        warn!(component = %name, entity_id, "unknown component type; skipped");
        skipped.push(SkippedItem {
            entity_id,
            component: name.clone(),
            reason: SkipReason::UnknownComponent,
        });
        return None;
    };

    let reported = skipped.len();
    let mut data = component.data.clone();
    if let Value::Object(map) = &mut data {
        decode_properties(ty, entity_id, map, handles, skipped);
        if let Some(Value::Object(mut merged)) = ty.default_json() {
            merged.extend(std::mem::take(map));
            *map = merged;
        }
    }

    match ty.from_json(data) {
        Ok(boxed) => Some((ty.id(), boxed)),
        // A required reference that did not resolve is the cause, and is
        // already reported.
        Err(e)
            if skipped[reported..]
                .iter()
                .any(|s| matches!(s.reason, SkipReason::UnresolvedReference { .. })) =>
        {
            debug!(component = %name, entity_id, error = %e, "component dropped after unresolved reference");
            None
        }
        Err(e) => {
            warn!(component = %name, entity_id, error = %e, "component could not be built; skipped");
            skipped.push(SkippedItem {
                entity_id,
                component: name.clone(),
                reason: SkipReason::ComponentConstruction {
                    details: e.to_string(),
                },
            });
            None
        }
    }
}

/// Make `Parent` and `Children` agree among `loaded`, trusting `Parent`.
fn reconcile_hierarchy(world: &mut World, loaded: &[Entity]) -> Result<(), SceneError> {
    for &entity in loaded {
        let Some(children) = world.get_component::<Children>(entity) else {
            continue;
        };
        let listed = children.entities.len();
        let kept: Vec<Entity> = children
            .entities
            .iter()
            .copied()
            .filter(|&child| world.parent(child) == Some(entity))
            .collect();
        if kept.len() != listed {
            warn!(parent = %entity, dropped = listed - kept.len(), "children whose Parent disagrees were dropped");
            world.insert_component(entity, Children { entities: kept })?;
        }
    }
    for &entity in loaded {
        let Some(parent) = world.parent(entity) else {
            continue;
        };
        if !world.is_alive(parent) || world.children(parent).contains(&entity) {
            continue;
        }
        warn!(parent = %parent, child = %entity, "child missing from its parent's Children; added");
        match world.get_component_mut::<Children>(parent) {
            Some(children) => children.entities.push(entity),
            None => world.insert_component(parent, Children { entities: vec![entity] })?,
        }
    }
    Ok(())
}

/// Inverse of [`encode_component`]: run codecs, then renumber document IDs
/// to fresh handles. Failures drop the property and are reported.
fn decode_properties(
    ty: &ComponentType,
    entity_id: u32,
    map: &mut Map<String, Value>,
    handles: &HashMap<u32, Entity>,
    skipped: &mut Vec<SkippedItem>,
) {
    for (property, cfg) in &ty.config().properties {
        let Some(mut value) = map.remove(property) else {
            continue;
        };
        let skip = |reason| SkippedItem {
            entity_id,
            component: ty.name().to_owned(),
            reason,
        };

        if !value.is_null() {
            if let Some(codec) = &cfg.codec {
                match codec.decode(&value) {
                    Ok(decoded) => value = decoded,
                    Err(e) => {
                        warn!(component = %ty.name(), property = %property, entity_id, error = %e, "property failed to decode; default used");
                        skipped.push(skip(SkipReason::PropertyDecode {
                            property: property.clone(),
                            details: e.to_string(),
                        }));
                        continue;
                    }
                }
            }
        }

        if let Some(kind) = cfg.entity_ref {
            let mut unresolved = Vec::new();
            value = renumber(value, kind, |raw| {
                let entity = raw
                    .as_u64()
                    .and_then(|id| u32::try_from(id).ok())
                    .and_then(|id| handles.get(&id));
                match entity {
                    Some(e) => Some(Value::from(e.to_raw())),
                    None => {
                        unresolved.push(raw.clone());
                        None
                    }
                }
            });
            for reference in unresolved {
                warn!(component = %ty.name(), property = %property, entity_id, reference = %reference, "unresolved entity reference");
                skipped.push(skip(SkipReason::UnresolvedReference {
                    property: property.clone(),
                    reference,
                }));
            }
        }

        if value.is_null() && cfg.null_policy == NullPolicy::Omit {
            continue;
        }
        map.insert(property.clone(), value);
    }
}

fn log_outcome(outcome: &LoadOutcome, kind: AssetKind, guid: Uuid) {
    if outcome.is_complete() {
        debug!(%kind, guid = %guid, entities = outcome.entities.len(), "asset loaded");
    } else {
        warn!(
            %kind,
            guid = %guid,
            entities = outcome.entities.len(),
            skipped = outcome.skipped_count(),
            "asset loaded with skipped items"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Name(String);

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Follow {
        target: Option<Entity>,
        speed: f32,
    }

    fn setup() -> World {
        let mut world = World::new();
        world.register_component::<Name>("Name");
        world
            .register(
                ComponentDescriptor::<Follow>::new("Follow")
                    .config(ComponentConfig::new().property("target", PropertyConfig::new().entity_ref()))
                    .with_default(),
            )
            .unwrap();
        world
    }

    #[test]
    fn walk_renumbers_references_inside_the_subgraph() {
        let mut world = setup();
        let root = world.spawn_with(Name("root".into())).unwrap();
        let child = world.spawn_with(Name("child".into())).unwrap();
        world.add_child(root, child).unwrap();
        world
            .insert_component(child, Follow { target: Some(root), speed: 1.0 })
            .unwrap();

        let mut serializer = SceneSerializer::new(UuidSource::Seeded(1));
        let asset = serializer.save_prefab(&mut world, root, SaveOptions::default()).unwrap();

        let root_id = asset
            .prefab
            .entity_id_map
            .iter()
            .find(|(_, u)| **u == asset.prefab.root_entity_id)
            .map(|(id, _)| *id)
            .unwrap();
        let child_row = asset
            .world
            .entities
            .iter()
            .find(|e| e.component("Follow").is_some())
            .unwrap();
        assert_eq!(child_row.component("Follow").unwrap()["target"], json!(root_id));
        assert_eq!(child_row.component("Parent").unwrap()["entity"], json!(root_id));
    }

    #[test]
    fn references_leaving_the_subgraph_become_null() {
        let mut world = setup();
        let outsider = world.spawn();
        let root = world
            .spawn_with(Follow { target: Some(outsider), speed: 2.0 })
            .unwrap();
        let mut serializer = SceneSerializer::new(UuidSource::Seeded(2));
        let asset = serializer.save_prefab(&mut world, root, SaveOptions::default()).unwrap();
        assert_eq!(asset.world.entities[0].component("Follow").unwrap()["target"], Value::Null);
    }

    #[test]
    fn save_leaves_no_tags_and_restores_stripped_components() {
        let mut world = setup();
        let holder = world.spawn();
        let root = world.spawn_with(Name("r".into())).unwrap();
        world.add_child(holder, root).unwrap();
        let scene = Uuid::from_u128(42);
        register_scene_components(&mut world).unwrap();
        world.insert_component(root, SceneMember { scene_guid: scene }).unwrap();

        let mut serializer = SceneSerializer::new(UuidSource::Seeded(3));
        let asset = serializer
            .save_prefab(&mut world, root, SaveOptions::default())
            .unwrap();

        assert_eq!(world.query::<(&SerializationTag,)>().count(), 0);
        assert_eq!(world.parent(root), Some(holder));
        assert_eq!(world.get_component::<SceneMember>(root).map(|m| m.scene_guid), Some(scene));
        assert!(world.has_component::<StableId>(root));
        assert_eq!(asset.metadata.nested_scenes, vec![scene]);
        assert!(asset.world.entities[0].component("Parent").is_none());
        assert!(asset.world.entities[0].component(SERIALIZATION_TAG).is_none());
    }

    #[test]
    fn unresolved_reference_on_load_is_reported() {
        let mut world = setup();
        let uuid = Uuid::from_u128(7);
        let world_data: SerializedWorld = serde_json::from_value(json!({
            "entities": [
                { "id": 0, "components": [ { "typeName": "Follow", "data": { "target": 99, "speed": 3.0 } } ] }
            ]
        }))
        .unwrap();
        let outcome = load_world(&mut world, &world_data, &BTreeMap::from([(0, uuid)]), &[uuid]).unwrap();

        assert_eq!(outcome.skipped_count(), 1);
        assert!(matches!(
            outcome.skipped[0].reason,
            SkipReason::UnresolvedReference { .. }
        ));
        let follow = world.get_component::<Follow>(outcome.roots[0]).unwrap();
        assert_eq!(follow.target, None);
        assert_eq!(follow.speed, 3.0);
    }

    #[test]
    fn structural_errors_spawn_nothing() {
        let mut world = setup();
        let before = world.entity_count();
        let data: SerializedWorld = serde_json::from_value(json!({
            "entities": [ { "id": 0, "components": [] }, { "id": 0, "components": [] } ]
        }))
        .unwrap();
        assert!(matches!(
            load_world(&mut world, &data, &BTreeMap::new(), &[]),
            Err(SceneError::DuplicateEntityId { id: 0 })
        ));
        let data = SerializedWorld::default();
        assert!(matches!(
            load_world(&mut world, &data, &BTreeMap::new(), &[Uuid::nil()]),
            Err(SceneError::UnknownRootUuid { .. })
        ));
        assert_eq!(world.entity_count(), before);
    }
}
