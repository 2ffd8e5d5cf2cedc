//! The [`World`] owns every entity, every component instance, the component
//! registry, resources and event queues.
//!
//! Components can be reached two ways: typed (`get_component::<T>`) for
//! systems, and by registered name with JSON values (`component_json`,
//! `set_component_json`) for the command buffer, bundles, the editor and the
//! scene serializer.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde_json::Value;
use tracing::trace;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{
    BoxedComponent, Component, ComponentDescriptor, ComponentRegistry, ComponentType,
    ComponentTypeId,
};
use crate::entity::{Entity, EntityAllocator};
use crate::event::Events;
use crate::hierarchy;
use crate::resource::Resources;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity location
// ---------------------------------------------------------------------------

/// Which archetype and row an entity's data lives in.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityLocation {
    /// Table holding the entity's row.
    pub archetype_id: ArchetypeId,
    /// Row within that table; changes on swap-remove.
    pub row: usize,
}

// ---------------------------------------------------------------------------
// ComponentBundle
// ---------------------------------------------------------------------------

enum PendingComponent {
    Typed {
        type_id: TypeId,
        type_name: &'static str,
        value: BoxedComponent,
    },
    Json {
        name: String,
        value: Value,
    },
}

/// A set of components to spawn together.
///
/// Typed values and name-keyed JSON values can be mixed; both are resolved
/// against the registry when the bundle is spawned. If the same type is added
/// twice the later value wins.
///
/// ```
/// use voidscript_ecs::prelude::*;
///
/// #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// struct Speed(f32);
///
/// let mut world = World::new();
/// world.register_component::<Speed>("Speed");
/// let e = world
///     .spawn_bundle(ComponentBundle::new().with(Speed(1.0)))
///     .unwrap();
/// assert_eq!(world.get_component::<Speed>(e), Some(&Speed(1.0)));
/// ```
#[derive(Default)]
pub struct ComponentBundle {
    entries: Vec<PendingComponent>,
}

impl ComponentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed component.
    pub fn add<T: Component>(&mut self, value: T) -> &mut Self {
        self.entries.push(PendingComponent::Typed {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        });
        self
    }

    /// Add a component by registered name; resolved at spawn time.
    pub fn add_json(&mut self, name: &str, value: Value) -> &mut Self {
        self.entries.push(PendingComponent::Json {
            name: name.to_owned(),
            value,
        });
        self
    }

    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.add(value);
        self
    }

    pub fn with_json(mut self, name: &str, value: Value) -> Self {
        self.add_json(name, value);
        self
    }

    /// Entries added so far, before deduplication.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every entry to a registered type, deduplicated and sorted.
    pub(crate) fn resolve(
        self,
        registry: &ComponentRegistry,
    ) -> Result<Vec<(ComponentTypeId, BoxedComponent)>, EcsError> {
        let mut resolved: Vec<(ComponentTypeId, BoxedComponent)> = Vec::with_capacity(self.len());
        for entry in self.entries {
            let (id, value) = match entry {
                PendingComponent::Typed {
                    type_id,
                    type_name,
                    value,
                } => {
                    let id = registry
                        .lookup_type_id(type_id)
                        .ok_or_else(|| unknown_component(registry, type_name))?;
                    (id, value)
                }
                PendingComponent::Json { name, value } => {
                    let ty = registry
                        .get_by_name(&name)
                        .ok_or_else(|| unknown_component(registry, &name))?;
                    (ty.id(), ty.from_json(value)?)
                }
            };
            match resolved.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = value,
                None => resolved.push((id, value)),
            }
        }
        resolved.sort_by_key(|(id, _)| *id);
        Ok(resolved)
    }
}

pub(crate) fn unknown_component(registry: &ComponentRegistry, name: &str) -> EcsError {
    EcsError::UnknownComponent {
        name: name.to_owned(),
        registered: registry.registered_names().join(", "),
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entity/component storage plus the registry, resources and events that
/// systems reach through [`Commands`](crate::commands::Commands).
pub struct World {
    pub(crate) allocator: EntityAllocator,
    pub(crate) registry: ComponentRegistry,
    /// Indexed by `ArchetypeId`; creation order.
    pub(crate) archetypes: Vec<Archetype>,
    archetype_index: HashMap<Vec<ComponentTypeId>, ArchetypeId>,
    pub(crate) entity_locations: HashMap<Entity, EntityLocation>,
    pub(crate) resources: Resources,
    pub(crate) events: Events,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_locations.len())
            .field("archetype_count", &self.archetypes.len())
            .field("component_types", &self.registry.len())
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// An empty world with the built-in [`Parent`](crate::hierarchy::Parent)
    /// and [`Children`](crate::hierarchy::Children) components registered.
    pub fn new() -> Self {
        let mut world = Self {
            allocator: EntityAllocator::new(),
            registry: ComponentRegistry::new(),
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            entity_locations: HashMap::new(),
            resources: Resources::new(),
            events: Events::new(),
        };
        hierarchy::register_hierarchy(&mut world);
        world
    }

    // -- registration ---------------------------------------------------------

    /// Registered component types.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register (or re-register) a component type. See
    /// [`ComponentRegistry::get_or_register`].
    pub fn register<T: Component>(
        &mut self,
        descriptor: ComponentDescriptor<T>,
    ) -> Result<ComponentTypeId, EcsError> {
        self.registry.get_or_register(descriptor)
    }

    /// Register `T` under `name` with default config.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered for a different Rust type.
    pub fn register_component<T: Component>(&mut self, name: &str) -> ComponentTypeId {
        match self.register(ComponentDescriptor::<T>::new(name)) {
            Ok(id) => id,
            Err(e) => panic!("{e}"),
        }
    }

    /// Insert a prebuilt [`ComponentType`]. See [`ComponentRegistry::register`].
    pub fn register_type(&mut self, ty: ComponentType) -> Result<ComponentTypeId, EcsError> {
        self.registry.register(ty)
    }

    /// ID registered for `T`, if any.
    pub fn component_type_id<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.registry.lookup::<T>()
    }

    fn require_type<T: 'static>(&self) -> Result<ComponentTypeId, EcsError> {
        self.registry
            .lookup::<T>()
            .ok_or_else(|| unknown_component(&self.registry, std::any::type_name::<T>()))
    }

    fn require_name(&self, name: &str) -> Result<&ComponentType, EcsError> {
        self.registry
            .get_by_name(name)
            .ok_or_else(|| unknown_component(&self.registry, name))
    }

    // -- archetypes -----------------------------------------------------------

    /// Find or create the archetype for a sorted type set.
    fn archetype_for(&mut self, type_ids: &[ComponentTypeId]) -> ArchetypeId {
        if let Some(&id) = self.archetype_index.get(type_ids) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        trace!(archetype = id.0, types = ?type_ids, "created archetype");
        self.archetypes.push(Archetype::new(id, type_ids.to_vec()));
        self.archetype_index.insert(type_ids.to_vec(), id);
        id
    }

    /// Every archetype table, in creation order, including empty ones.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub(crate) fn place(&mut self, entity: Entity, components: Vec<(ComponentTypeId, BoxedComponent)>) {
        let types: Vec<ComponentTypeId> = components.iter().map(|(id, _)| *id).collect();
        let archetype_id = self.archetype_for(&types);
        let row = self.archetypes[archetype_id.index()].push(entity, components);
        self.entity_locations
            .insert(entity, EntityLocation { archetype_id, row });
    }

    /// Take an entity's row out of its archetype, fixing the location of
    /// whichever entity was swapped into its place.
    fn unplace(&mut self, loc: EntityLocation) -> Vec<(ComponentTypeId, BoxedComponent)> {
        let (components, moved) = self.archetypes[loc.archetype_id.index()].swap_remove(loc.row);
        if let Some(moved) = moved {
            if let Some(moved_loc) = self.entity_locations.get_mut(&moved) {
                moved_loc.row = loc.row;
            }
        }
        components
    }

    /// Swap an entity's whole component set for `components` in one move.
    pub(crate) fn replace_all(
        &mut self,
        entity: Entity,
        mut components: Vec<(ComponentTypeId, BoxedComponent)>,
    ) -> Result<(), EcsError> {
        for (id, value) in &components {
            self.check_boxed(*id, value)?;
        }
        let loc = self.location(entity)?;
        drop(self.unplace(loc));
        components.sort_by_key(|(id, _)| *id);
        components.dedup_by_key(|(id, _)| *id);
        self.place(entity, components);
        Ok(())
    }

    /// Drop every entity and archetype. Registry, resources and events stay.
    pub(crate) fn clear_storage(&mut self) {
        self.archetypes.clear();
        self.archetype_index.clear();
        self.entity_locations.clear();
    }

    fn location(&self, entity: Entity) -> Result<EntityLocation, EcsError> {
        self.entity_locations
            .get(&entity)
            .copied()
            .ok_or(EcsError::StaleEntity(entity))
    }

    // -- entity lifecycle -----------------------------------------------------

    /// Spawn an entity with no components.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.place(entity, Vec::new());
        entity
    }

    /// Spawn an entity holding a single component.
    pub fn spawn_with<T: Component>(&mut self, component: T) -> Result<Entity, EcsError> {
        self.spawn_bundle(ComponentBundle::new().with(component))
    }

    /// Spawn an entity with every component of `bundle` in one placement.
    ///
    /// Nothing is allocated if any component fails to resolve.
    pub fn spawn_bundle(&mut self, bundle: ComponentBundle) -> Result<Entity, EcsError> {
        let components = bundle.resolve(&self.registry)?;
        self.spawn_boxed(components)
    }

    /// Spawn from already type-erased values.
    pub fn spawn_boxed(
        &mut self,
        mut components: Vec<(ComponentTypeId, BoxedComponent)>,
    ) -> Result<Entity, EcsError> {
        for (id, value) in &components {
            self.check_boxed(*id, value)?;
        }
        components.sort_by_key(|(id, _)| *id);
        components.dedup_by_key(|(id, _)| *id);
        let entity = self.allocator.allocate();
        self.place(entity, components);
        Ok(entity)
    }

    /// Despawn one entity. Handles stored elsewhere (for example in
    /// `Children`) are left dangling; use
    /// [`despawn_recursive`](Self::despawn_recursive) to keep a hierarchy
    /// consistent.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        let loc = self.location(entity)?;
        self.entity_locations.remove(&entity);
        drop(self.unplace(loc));
        self.allocator.deallocate(entity);
        Ok(())
    }

    /// Whether `entity` is live with a current generation.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entity_locations.len()
    }

    /// Every live entity, in storage order.
    pub fn entities(&self) -> Vec<Entity> {
        self.archetypes
            .iter()
            .flat_map(|a| a.entities().iter().copied())
            .collect()
    }

    // -- typed component access -----------------------------------------------

    /// `entity`'s `T` component, or `None` if it is dead, lacks `T`, or `T` is unregistered.
    pub fn get_component<T: 'static>(&self, entity: Entity) -> Option<&T> {
        let loc = self.entity_locations.get(&entity)?;
        let id = self.registry.lookup::<T>()?;
        self.archetypes[loc.archetype_id.index()].get::<T>(loc.row, id)
    }

    /// Mutable form of [`get_component`](Self::get_component).
    pub fn get_component_mut<T: 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        let loc = *self.entity_locations.get(&entity)?;
        let id = self.registry.lookup::<T>()?;
        self.archetypes[loc.archetype_id.index()].get_mut::<T>(loc.row, id)
    }

    pub fn has_component<T: 'static>(&self, entity: Entity) -> bool {
        self.registry
            .lookup::<T>()
            .is_some_and(|id| self.has_component_id(entity, id))
    }

    /// Like [`has_component`](Self::has_component), by type ID.
    pub fn has_component_id(&self, entity: Entity, id: ComponentTypeId) -> bool {
        self.entity_locations
            .get(&entity)
            .is_some_and(|loc| self.archetypes[loc.archetype_id.index()].has_component(id))
    }

    /// Insert or overwrite a component. Adding a new type migrates the
    /// entity to the matching archetype.
    pub fn insert_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        let id = self.require_type::<T>()?;
        self.insert_boxed(entity, id, Box::new(value))
    }

    /// Insert or overwrite a type-erased component value.
    pub fn insert_boxed(
        &mut self,
        entity: Entity,
        id: ComponentTypeId,
        value: BoxedComponent,
    ) -> Result<(), EcsError> {
        self.insert_many_boxed(entity, vec![(id, value)])
    }

    /// Insert several components with at most one archetype migration.
    pub fn insert_many_boxed(
        &mut self,
        entity: Entity,
        components: Vec<(ComponentTypeId, BoxedComponent)>,
    ) -> Result<(), EcsError> {
        for (id, value) in &components {
            self.check_boxed(*id, value)?;
        }
        let loc = self.location(entity)?;
        let archetype = &mut self.archetypes[loc.archetype_id.index()];
        let mut new_types = Vec::new();
        let mut pending = Vec::new();
        for (id, value) in components {
            if archetype.has_component(id) {
                archetype.replace(loc.row, id, value);
            } else if let Some(slot) = pending.iter_mut().find(|(p, _)| *p == id) {
                *slot = (id, value);
            } else {
                new_types.push(id);
                pending.push((id, value));
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        let mut row = self.unplace(loc);
        row.extend(pending);
        row.sort_by_key(|(id, _)| *id);
        self.place(entity, row);
        trace!(entity = ?entity, added = ?new_types, "entity migrated");
        Ok(())
    }

    /// Remove a component, returning its value.
    pub fn remove_component<T: 'static>(&mut self, entity: Entity) -> Result<Option<T>, EcsError> {
        let id = self.require_type::<T>()?;
        Ok(self
            .remove_by_id(entity, id)?
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed))
    }

    /// Remove a component by type ID. `Ok(None)` if the entity lacked it.
    pub fn remove_by_id(
        &mut self,
        entity: Entity,
        id: ComponentTypeId,
    ) -> Result<Option<BoxedComponent>, EcsError> {
        let loc = self.location(entity)?;
        if !self.archetypes[loc.archetype_id.index()].has_component(id) {
            return Ok(None);
        }
        let mut row = self.unplace(loc);
        let pos = row.iter().position(|(t, _)| *t == id);
        let removed = pos.map(|p| row.remove(p).1);
        self.place(entity, row);
        Ok(removed)
    }

    fn check_boxed(&self, id: ComponentTypeId, value: &BoxedComponent) -> Result<(), EcsError> {
        let ty = self
            .registry
            .get(id)
            .ok_or(EcsError::UnregisteredComponentId { id: id.raw() })?;
        if (**value).type_id() != ty.type_id() {
            return Err(EcsError::ComponentTypeMismatch {
                name: ty.name().to_owned(),
                registered: ty.type_name(),
                requested: "<boxed value>",
            });
        }
        Ok(())
    }

    // -- untyped access -------------------------------------------------------

    /// A stored value by type ID.
    pub fn get_any(&self, entity: Entity, id: ComponentTypeId) -> Option<&dyn Any> {
        let loc = self.entity_locations.get(&entity)?;
        self.archetypes[loc.archetype_id.index()].get_any(loc.row, id)
    }

    /// Every `(type, value)` pair on an entity, in type-ID order.
    pub fn get_all_components(&self, entity: Entity) -> Result<Vec<(ComponentTypeId, &dyn Any)>, EcsError> {
        let loc = self.location(entity)?;
        Ok(self.archetypes[loc.archetype_id.index()].row(loc.row).collect())
    }

    /// Sorted type IDs held by `entity`.
    pub fn component_ids(&self, entity: Entity) -> Result<&[ComponentTypeId], EcsError> {
        let loc = self.location(entity)?;
        Ok(self.archetypes[loc.archetype_id.index()].component_types())
    }

    /// JSON form of a component, by registered name.
    pub fn component_json(&self, entity: Entity, name: &str) -> Result<Value, EcsError> {
        let ty = self.require_name(name)?;
        let loc = self.location(entity)?;
        let value = self.archetypes[loc.archetype_id.index()]
            .get_any(loc.row, ty.id())
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                component: name.to_owned(),
            })?;
        ty.to_json(value)
    }

    /// Insert or overwrite a component from JSON, by registered name.
    pub fn set_component_json(&mut self, entity: Entity, name: &str, value: &Value) -> Result<(), EcsError> {
        let ty = self.require_name(name)?;
        let id = ty.id();
        let boxed = ty.from_json(value.clone())?;
        self.insert_boxed(entity, id, boxed)
    }

    /// Remove a component by registered name. Returns whether it was present.
    pub fn remove_component_by_name(&mut self, entity: Entity, name: &str) -> Result<bool, EcsError> {
        let id = self.require_name(name)?.id();
        Ok(self.remove_by_id(entity, id)?.is_some())
    }

    // -- resources and events -------------------------------------------------

    /// Insert or replace the `R` resource.
    pub fn insert_resource<R: Send + Sync + 'static>(&mut self, resource: R) {
        self.resources.insert(resource);
    }

    pub fn resource<R: Send + Sync + 'static>(&self) -> Option<&R> {
        self.resources.get::<R>()
    }

    pub fn resource_mut<R: Send + Sync + 'static>(&mut self) -> Option<&mut R> {
        self.resources.get_mut::<R>()
    }

    /// Take the `R` resource out of the world.
    pub fn remove_resource<R: Send + Sync + 'static>(&mut self) -> Option<R> {
        self.resources.remove::<R>()
    }

    pub fn has_resource<R: Send + Sync + 'static>(&self) -> bool {
        self.resources.contains::<R>()
    }

    /// Queue an event for the rest of this frame.
    pub fn send_event<E: Send + Sync + 'static>(&mut self, event: E) {
        self.events.send(event);
    }

    /// Events of type `E` sent this frame, oldest first.
    pub fn read_events<E: Send + Sync + 'static>(&self) -> &[E] {
        self.events.read::<E>()
    }

    /// Drop every queued event. Called once per frame by the scheduler.
    pub fn clear_events(&mut self) {
        self.events.clear_all();
    }

    /// Direct access to the event queues.
    pub fn events_mut(&mut self) -> &mut Events {
        &mut self.events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
