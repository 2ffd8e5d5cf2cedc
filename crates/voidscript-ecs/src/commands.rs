//! The facade systems use to touch the world.
//!
//! [`Commands`] wraps `&mut World` together with a deferred
//! [`CommandBuffer`]. Accessors come in two flavours: the plain ones return
//! `Err` when the entity, component or resource is absent (a caller bug),
//! the `try_` ones return `None` for the common defensive check.
//!
//! Structural changes made while iterating go through
//! [`split`](Commands::split), which hands out a shared world for the query
//! and the buffer for recording; [`flush`](Commands::flush) applies them.

use serde_json::Value;

use crate::command::{ApplyReport, CommandBuffer};
use crate::component::Component;
use crate::entity::Entity;
use crate::event::{EventReader, EventWriter};
use crate::query::{Query, QueryData, QueryMut, ReadOnlyQueryData};
use crate::world::{ComponentBundle, World};
use crate::EcsError;

/// Mutable access to a [`World`] for one system, plus its deferred buffer.
///
/// Created per system run by the scheduler; deferred commands are applied
/// when the scheduler calls [`flush`](Self::flush) after the system returns.
pub struct Commands<'w> {
    world: &'w mut World,
    buffer: CommandBuffer,
}

impl<'w> Commands<'w> {
    /// Wrap `world` with an empty deferred buffer.
    pub fn new(world: &'w mut World) -> Self {
        Self {
            world,
            buffer: CommandBuffer::new(),
        }
    }

    /// Like [`new`](Self::new), stamping deferred commands with `system`.
    pub fn for_system(world: &'w mut World, system: &str) -> Self {
        let mut commands = Self::new(world);
        commands.buffer.set_issuer(Some(system));
        commands
    }

    /// The wrapped world.
    pub fn world(&self) -> &World {
        &*self.world
    }

    /// The wrapped world, mutably. Bypasses the deferred buffer.
    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    // -- entities ---------------------------------------------------------

    /// Start building an entity. Nothing is spawned until
    /// [`EntityBuilder::build`].
    pub fn spawn(&mut self) -> EntityBuilder<'_> {
        EntityBuilder {
            world: &mut *self.world,
            bundle: ComponentBundle::new(),
            parent: None,
        }
    }

    /// Spawn an entity with no components, immediately.
    pub fn spawn_empty(&mut self) -> Entity {
        self.world.spawn()
    }

    /// Despawn `entity` immediately. Its children are left in place.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.world.despawn(entity)
    }

    /// Despawn `entity` and its descendants. Returns how many were despawned.
    pub fn despawn_recursive(&mut self, entity: Entity) -> Result<usize, EcsError> {
        self.world.despawn_recursive(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.world.is_alive(entity)
    }

    // -- queries ----------------------------------------------------------

    /// Read-only query. See [`World::query`].
    pub fn query<D: ReadOnlyQueryData>(&self) -> Query<'_, D> {
        self.world.query::<D>()
    }

    /// Query that may bind `&mut T`. See [`World::query_mut`].
    pub fn query_mut<D: QueryData>(&mut self) -> QueryMut<'_, D> {
        self.world.query_mut::<D>()
    }

    // -- components -------------------------------------------------------

    /// The `T` component of `entity`.
    ///
    /// Fails with [`EcsError::StaleEntity`] or [`EcsError::MissingComponent`].
    pub fn get_component<T: 'static>(&self, entity: Entity) -> Result<&T, EcsError> {
        self.check_alive(entity)?;
        self.world
            .get_component::<T>(entity)
            .ok_or_else(|| self.missing_component::<T>(entity))
    }

    /// The `T` component of `entity`, or `None` for any reason.
    pub fn try_get_component<T: 'static>(&self, entity: Entity) -> Option<&T> {
        self.world.get_component::<T>(entity)
    }

    /// Mutable form of [`get_component`](Self::get_component).
    pub fn get_component_mut<T: 'static>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        self.check_alive(entity)?;
        let missing = self.missing_component::<T>(entity);
        self.world.get_component_mut::<T>(entity).ok_or(missing)
    }

    pub fn try_get_component_mut<T: 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        self.world.get_component_mut::<T>(entity)
    }

    pub fn has_component<T: 'static>(&self, entity: Entity) -> bool {
        self.world.has_component::<T>(entity)
    }

    /// Add or replace `entity`'s `T` component, immediately.
    pub fn insert_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        self.world.insert_component(entity, value)
    }

    /// Remove and return `entity`'s `T` component, immediately.
    pub fn remove_component<T: 'static>(&mut self, entity: Entity) -> Result<Option<T>, EcsError> {
        self.world.remove_component::<T>(entity)
    }

    fn check_alive(&self, entity: Entity) -> Result<(), EcsError> {
        if self.world.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleEntity(entity))
        }
    }

    fn missing_component<T: 'static>(&self, entity: Entity) -> EcsError {
        let registry = self.world.registry();
        let component = match registry.lookup::<T>() {
            Some(id) => registry.name_of(id).to_owned(),
            None => std::any::type_name::<T>().to_owned(),
        };
        EcsError::MissingComponent { entity, component }
    }

    // -- resources --------------------------------------------------------

    /// The `R` resource, or [`EcsError::MissingResource`].
    pub fn resource<R: Send + Sync + 'static>(&self) -> Result<&R, EcsError> {
        self.world.resource::<R>().ok_or(EcsError::MissingResource {
            resource: std::any::type_name::<R>(),
        })
    }

    pub fn try_resource<R: Send + Sync + 'static>(&self) -> Option<&R> {
        self.world.resource::<R>()
    }

    /// Mutable form of [`resource`](Self::resource).
    pub fn resource_mut<R: Send + Sync + 'static>(&mut self) -> Result<&mut R, EcsError> {
        self.world.resource_mut::<R>().ok_or(EcsError::MissingResource {
            resource: std::any::type_name::<R>(),
        })
    }

    pub fn try_resource_mut<R: Send + Sync + 'static>(&mut self) -> Option<&mut R> {
        self.world.resource_mut::<R>()
    }

    /// Insert or replace the `R` resource.
    pub fn insert_resource<R: Send + Sync + 'static>(&mut self, resource: R) {
        self.world.insert_resource(resource);
    }

    // -- events -----------------------------------------------------------

    /// Writer for this frame's `E` events.
    pub fn event_writer<E: Send + Sync + 'static>(&mut self) -> EventWriter<'_, E> {
        self.world.events_mut().writer::<E>()
    }

    /// Every `E` event sent so far this frame, including by earlier systems.
    pub fn event_reader<E: Send + Sync + 'static>(&self) -> EventReader<'_, E> {
        self.world.events.reader::<E>()
    }

    /// Send one `E` event; visible until the end of the frame.
    pub fn send_event<E: Send + Sync + 'static>(&mut self, event: E) {
        self.world.send_event(event);
    }

    // -- hierarchy --------------------------------------------------------

    /// Make `child` a child of `parent`. See [`World::add_child`].
    pub fn add_child(&mut self, parent: Entity, child: Entity) -> Result<(), EcsError> {
        self.world.add_child(parent, child)
    }

    /// Detach `child` from `parent`. Returns whether it was attached.
    pub fn remove_child(&mut self, parent: Entity, child: Entity) -> Result<bool, EcsError> {
        self.world.remove_child(parent, child)
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.world.parent(entity)
    }

    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.world.children(entity)
    }

    // -- deferred ---------------------------------------------------------

    /// A shared view of the world plus the deferred buffer, for recording
    /// changes while iterating.
    ///
    /// ```
    /// use voidscript_ecs::prelude::*;
    ///
    /// #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    /// struct Health(i32);
    ///
    /// let mut world = World::new();
    /// world.register_component::<Health>("Health");
    /// world.spawn_with(Health(0)).unwrap();
    /// world.spawn_with(Health(3)).unwrap();
    ///
    /// let mut commands = Commands::new(&mut world);
    /// let (world_ref, deferred) = commands.split();
    /// world_ref.query::<(&Health,)>().each(|e, (h,)| {
    ///     if h.0 <= 0 {
    ///         deferred.despawn(e);
    ///     }
    /// });
    /// commands.flush();
    /// assert_eq!(world.entity_count(), 1);
    /// ```
    pub fn split(&mut self) -> (&World, &mut CommandBuffer) {
        (&*self.world, &mut self.buffer)
    }

    /// The deferred buffer on its own, when no world access is needed alongside.
    pub fn deferred(&mut self) -> &mut CommandBuffer {
        &mut self.buffer
    }

    /// Record a component write for later, by registered name.
    pub fn defer_set(&mut self, entity: Entity, component: &str, value: Value) {
        self.buffer.set_component(entity, component, value);
    }

    /// Apply every deferred command now.
    pub fn flush(&mut self) -> ApplyReport {
        if self.buffer.is_empty() {
            return ApplyReport::default();
        }
        self.buffer.apply(&mut *self.world);
        self.buffer.last_apply_report().clone()
    }

    /// Deferred commands not yet applied.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// ---------------------------------------------------------------------------
// EntityBuilder
// ---------------------------------------------------------------------------

/// Collects components for one entity; [`build`](Self::build) spawns them in
/// a single storage operation.
#[must_use = "nothing is spawned until `build` is called"]
pub struct EntityBuilder<'a> {
    world: &'a mut World,
    bundle: ComponentBundle,
    parent: Option<Entity>,
}

impl EntityBuilder<'_> {
    /// Add a typed component.
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.bundle.add(value);
        self
    }

    /// Add a component by registered name from its JSON form.
    pub fn with_json(mut self, name: &str, value: Value) -> Self {
        self.bundle.add_json(name, value);
        self
    }

    /// Attach the new entity under `parent` once it is spawned.
    pub fn child_of(mut self, parent: Entity) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Spawn the entity with every collected component.
    ///
    /// A dead `parent` is rejected before anything is spawned.
    pub fn build(self) -> Result<Entity, EcsError> {
        if let Some(parent) = self.parent {
            if !self.world.is_alive(parent) {
                return Err(EcsError::StaleEntity(parent));
            }
        }
        let entity = self.world.spawn_bundle(self.bundle)?;
        if let Some(parent) = self.parent {
            self.world.add_child(parent, entity)?;
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health(i32);

    #[derive(Debug, PartialEq)]
    struct Score(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Hit(Entity);

    fn setup() -> World {
        let mut world = World::new();
        world.register_component::<Position>("Position");
        world.register_component::<Health>("Health");
        world
    }

    #[test]
    fn builder_spawns_all_components_at_once() {
        let mut world = setup();
        let mut commands = Commands::new(&mut world);
        let parent = commands.spawn_empty();
        let e = commands
            .spawn()
            .with(Position { x: 1.0, y: 2.0 })
            .with_json("Health", json!(10))
            .child_of(parent)
            .build()
            .unwrap();

        assert_eq!(commands.get_component::<Health>(e).unwrap(), &Health(10));
        assert_eq!(commands.parent(e), Some(parent));
        assert_eq!(commands.children(parent), &[e]);
        // One placement: the entity went straight to its final archetype.
        let full = world
            .archetypes()
            .iter()
            .filter(|a| a.len() == 1 && a.component_types().len() == 3)
            .count();
        assert_eq!(full, 1);
    }

    #[test]
    fn failed_build_spawns_nothing() {
        let mut world = setup();
        let mut commands = Commands::new(&mut world);
        let err = commands.spawn().with_json("Nope", json!(1)).build().unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponent { .. }));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn strict_and_try_accessors() {
        let mut world = setup();
        let e = world.spawn_with(Health(5)).unwrap();
        let mut commands = Commands::new(&mut world);

        assert!(commands.try_get_component::<Position>(e).is_none());
        match commands.get_component::<Position>(e) {
            Err(EcsError::MissingComponent { component, .. }) => assert_eq!(component, "Position"),
            other => panic!("unexpected: {other:?}"),
        }

        commands.get_component_mut::<Health>(e).unwrap().0 -= 1;
        assert_eq!(commands.try_get_component::<Health>(e), Some(&Health(4)));

        commands.despawn(e).unwrap();
        assert!(matches!(
            commands.get_component::<Health>(e),
            Err(EcsError::StaleEntity(_))
        ));

        assert!(matches!(
            commands.resource::<Score>(),
            Err(EcsError::MissingResource { .. })
        ));
        commands.insert_resource(Score(1));
        commands.resource_mut::<Score>().unwrap().0 += 1;
        assert_eq!(commands.try_resource::<Score>(), Some(&Score(2)));
    }

    #[test]
    fn events_flow_through_the_facade() {
        let mut world = setup();
        let target = world.spawn();
        let mut commands = Commands::new(&mut world);
        commands.event_writer::<Hit>().send(Hit(target));
        commands.send_event(Hit(target));
        let hits: Vec<Hit> = commands.event_reader::<Hit>().iter().cloned().collect();
        assert_eq!(hits, vec![Hit(target), Hit(target)]);
    }

    #[test]
    fn split_defers_until_flush() {
        let mut world = setup();
        let dead = world.spawn_with(Health(0)).unwrap();
        let alive = world.spawn_with(Health(3)).unwrap();

        let mut commands = Commands::for_system(&mut world, "reaper");
        let (view, deferred) = commands.split();
        view.query::<(&Health,)>().each(|e, (h,)| {
            if h.0 <= 0 {
                deferred.despawn(e);
            } else {
                deferred.set_component(e, "Health", json!(h.0 - 1));
            }
        });
        assert_eq!(commands.pending(), 2);
        assert!(commands.is_alive(dead));

        let report = commands.flush();
        assert_eq!(report.success_count, 2);
        assert_eq!(commands.pending(), 0);
        assert!(!commands.is_alive(dead));
        assert_eq!(commands.try_get_component::<Health>(alive), Some(&Health(2)));
    }

    #[test]
    fn mutable_queries_through_the_facade() {
        let mut world = setup();
        let e = world.spawn_with(Position { x: 0.0, y: 0.0 }).unwrap();
        let mut commands = Commands::new(&mut world);
        commands
            .query_mut::<(&mut Position,)>()
            .each(|_, (p,)| p.x += 1.5);
        assert_eq!(commands.query::<(&Position,)>().count(), 1);
        assert_eq!(commands.get_component::<Position>(e).unwrap().x, 1.5);
    }
}
