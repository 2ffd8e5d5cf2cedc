//! VoidScript ECS -- archetype storage, typed queries and the command facade.
//!
//! Entities are generational handles. Components are plain serde-capable
//! structs registered under a stable name; the registry carries each type's
//! serialization config and editor metadata, which the scene serializer and
//! editor panels read. Entities with the same component set share an
//! archetype, stored column-wise.
//!
//! # Quick Start
//!
//! ```
//! use voidscript_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! world.register_component::<Position>("Position");
//! world.register_component::<Velocity>("Velocity");
//!
//! let mut commands = Commands::new(&mut world);
//! let entity = commands
//!     .spawn()
//!     .with(Position { x: 0.0, y: 0.0 })
//!     .with(Velocity { dx: 1.0, dy: 0.0 })
//!     .build()
//!     .unwrap();
//!
//! commands
//!     .query_mut::<(&mut Position, &Velocity)>()
//!     .each(|_, (pos, vel)| pos.x += vel.dx);
//!
//! assert_eq!(world.get_component::<Position>(entity), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod bundle;
pub mod command;
pub mod commands;
pub mod component;
pub mod config;
pub mod editor;
pub mod entity;
pub mod event;
pub mod hierarchy;
pub mod query;
pub mod resource;
pub mod snapshot;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity was despawned or never allocated.
    #[error("entity {0} does not exist (stale or never allocated)")]
    StaleEntity(entity::Entity),

    /// A component name was used that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// A component type ID was used that the registry never issued.
    #[error("no component type registered with id {id}")]
    UnregisteredComponentId { id: u32 },

    /// Converting a stored component value to JSON failed.
    #[error("failed to serialize component '{component}': {details}")]
    ComponentSerialization { component: String, details: String },

    /// Building a component value from JSON failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    /// A prebuilt type reused an ID the registry already holds.
    #[error("component id {id} is already registered")]
    DuplicateComponentId { id: u32 },

    /// A prebuilt type reused a name the registry already holds.
    #[error("component name '{name}' is already registered")]
    DuplicateComponentName { name: String },

    /// A name is registered for one Rust type and was used with another.
    #[error("component '{name}' is registered as `{registered}`, not `{requested}`")]
    ComponentTypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },

    /// A Rust type already registered under `existing` was offered under
    /// a second name.
    #[error("`{type_name}` is already registered as '{existing}', cannot register it as '{name}'")]
    DuplicateComponentType {
        /// The rejected name.
        name: String,
        /// The name the type is registered under.
        existing: String,
        type_name: &'static str,
    },

    /// The entity is live but does not hold the requested component.
    #[error("entity {entity} has no '{component}' component")]
    MissingComponent {
        entity: entity::Entity,
        component: String,
    },

    /// No resource of the requested type has been inserted.
    #[error("resource `{resource}` is not present")]
    MissingResource { resource: &'static str },

    /// `child` is `parent` itself or one of its ancestors.
    #[error("making {child} a child of {parent} would create a cycle")]
    HierarchyCycle {
        parent: entity::Entity,
        child: entity::Entity,
    },

    /// No bundle is registered under this name.
    #[error("bundle '{name}' is not registered")]
    UnknownBundle { name: String },

    /// A required bundle property was given no value.
    #[error("bundle '{bundle}' requires {component}.{property}")]
    MissingBundleProperty {
        bundle: String,
        component: String,
        property: String,
    },

    /// A value was given for a property the bundle keeps hidden.
    #[error("bundle '{bundle}' does not expose {component}.{property}")]
    HiddenBundleProperty {
        bundle: String,
        component: String,
        property: String,
    },

    /// A value was given for a property the bundle does not declare.
    #[error("bundle '{bundle}' declares no property {component}.{property}")]
    UnknownBundleProperty {
        bundle: String,
        component: String,
        property: String,
    },

    /// A world snapshot disagrees with itself (allocator state or entity list).
    #[error("invalid world snapshot: {details}")]
    InvalidSnapshot { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::bundle::{
        Bundle, BundleComponent, BundleOverrides, BundleRegistry, DefaultValue, PropertyVisibility,
    };
    pub use crate::command::{ApplyReport, Command, CommandBuffer, CommandKind};
    pub use crate::commands::{Commands, EntityBuilder};
    pub use crate::component::{
        Component, ComponentDescriptor, ComponentRegistry, ComponentType, ComponentTypeId,
    };
    pub use crate::config::{
        CodecError, ComponentConfig, EntityRefKind, NullPolicy, PropertyCodec, PropertyConfig,
    };
    pub use crate::editor::{ComponentInspector, EditorMetadata, InspectorRegistry};
    pub use crate::entity::Entity;
    pub use crate::event::{EventReader, EventWriter, Events};
    pub use crate::hierarchy::{Children, Parent};
    pub use crate::query::{ComponentSet, Query, QueryFilter, QueryIter, QueryMut};
    pub use crate::resource::Resources;
    pub use crate::snapshot::{EntitySnapshot, WorldSnapshot};
    pub use crate::world::{ComponentBundle, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health(u32);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Position>("Position");
        world.register_component::<Velocity>("Velocity");
        world.register_component::<Health>("Health");
        world
    }

    #[test]
    fn full_frame_of_gameplay() {
        let mut world = setup_world();
        let mut commands = Commands::new(&mut world);
        let player = commands
            .spawn()
            .with(Position { x: 0.0, y: 0.0 })
            .with(Velocity { dx: 2.0, dy: 1.0 })
            .with(Health(3))
            .build()
            .unwrap();
        let wall = commands.spawn().with(Position { x: 5.0, y: 0.0 }).build().unwrap();

        commands
            .query_mut::<(&mut Position, &Velocity)>()
            .each(|_, (p, v)| {
                p.x += v.dx;
                p.y += v.dy;
            });

        let (view, deferred) = commands.split();
        view.query::<(&Health,)>().each(|e, (h,)| {
            deferred.set_component(e, "Health", json!(h.0 - 1));
        });
        let report = commands.flush();
        assert_eq!(report.success_count, 1);

        assert_eq!(
            world.get_component::<Position>(player),
            Some(&Position { x: 2.0, y: 1.0 })
        );
        assert_eq!(world.get_component::<Health>(player), Some(&Health(2)));
        assert!(world.query::<(&Position,)>().none::<(Velocity,)>().entities() == vec![wall]);
    }

    #[test]
    fn display_formats_are_readable() {
        let e = Entity::new(4, 2);
        let err = EcsError::MissingComponent {
            entity: e,
            component: "Health".into(),
        };
        assert_eq!(err.to_string(), "entity 4v2 has no 'Health' component");
    }

    #[test]
    fn registry_is_shared_by_json_and_typed_paths() {
        let mut world = setup_world();
        let e = world
            .spawn_bundle(ComponentBundle::new().with_json("Health", json!(7)))
            .unwrap();
        assert_eq!(world.get_component::<Health>(e), Some(&Health(7)));
        assert_eq!(world.component_json(e, "Health").unwrap(), json!(7));
        assert!(world.remove_component_by_name(e, "Health").unwrap());
        assert!(matches!(
            world.component_json(e, "Health"),
            Err(EcsError::MissingComponent { .. })
        ));
    }
}
