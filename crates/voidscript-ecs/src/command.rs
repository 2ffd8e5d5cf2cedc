//! Deferred world mutations.
//!
//! A [`CommandBuffer`] records structural changes while the world is
//! borrowed (typically inside a query callback) and applies them later, in
//! the order they were recorded. Component values are carried as
//! [`serde_json::Value`] keyed by registered component name, and resolved
//! through the registry at apply time.
//!
//! ```
//! use voidscript_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//!
//! let mut world = World::new();
//! world.register_component::<Health>("Health");
//! let entity = world.spawn_with(Health(100)).unwrap();
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.set_component(entity, "Health", serde_json::json!(50));
//!
//! let applied = cmds.apply(&mut world);
//! assert_eq!(applied.len(), 1);
//! assert_eq!(world.get_component::<Health>(entity), Some(&Health(50)));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::entity::Entity;
use crate::world::{ComponentBundle, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// What mutation to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Spawn an entity with `(name, JSON)` components, optionally under a
    /// parent.
    Spawn {
        components: Vec<(String, Value)>,
        parent: Option<Entity>,
    },
    /// Insert or overwrite a component.
    SetComponent { component: String, value: Value },
    /// Remove a component if present; removing an absent one is not a failure.
    RemoveComponent { component: String },
    /// Despawn only the target; its children keep dangling `Parent` handles.
    Despawn,
    /// Despawn the target and its whole subtree.
    DespawnRecursive,
    /// Attach the target under `parent`.
    AddChild { parent: Entity },
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single deferred mutation.
///
/// `target` is `None` for spawns; after [`CommandBuffer::apply`] the new
/// handle is in `spawned_entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Entity the command acts on; `None` for spawns.
    pub target: Option<Entity>,
    /// The mutation itself.
    pub kind: CommandKind,
    /// Label of the system that recorded the command, if any.
    pub issued_by: Option<String>,
    /// Position within the buffer.
    pub command_index: u32,
    /// Handle created by a spawn, filled in by apply.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spawned_entity: Option<Entity>,
    /// Whether the last apply of this command succeeded.
    #[serde(default)]
    pub applied_successfully: bool,
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Summary of the last [`CommandBuffer::apply`] call.
///
/// A conflict is an (entity, component) pair targeted by more than one
/// set/remove command in the same apply; the last one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Same (entity, component) pairs written more than once.
    pub conflict_count: usize,
    /// Commands that failed and were skipped.
    pub failed_count: usize,
    /// Commands that took effect.
    pub success_count: usize,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// FIFO queue of deferred mutations.
///
/// [`apply`](Self::apply) drains the queue. A failing command is logged and
/// counted, and the remaining commands still run.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
    issuer: Option<String>,
    last_apply_report: ApplyReport,
}

impl CommandBuffer {
    /// An empty buffer with no issuer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Label stamped on commands recorded from now on.
    pub fn set_issuer(&mut self, label: Option<&str>) {
        self.issuer = label.map(str::to_owned);
    }

    /// Label currently stamped on new commands.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Queue a spawn from `(name, JSON)` components.
    pub fn spawn(&mut self, components: Vec<(String, Value)>) {
        self.push(None, CommandKind::Spawn { components, parent: None });
    }

    /// Queue a spawn that is attached under `parent` once created.
    pub fn spawn_child_of(&mut self, parent: Entity, components: Vec<(String, Value)>) {
        self.push(
            None,
            CommandKind::Spawn {
                components,
                parent: Some(parent),
            },
        );
    }

    /// Queue an insert or overwrite of `component` on `target`.
    pub fn set_component(&mut self, target: Entity, component: &str, value: Value) {
        self.push(
            Some(target),
            CommandKind::SetComponent {
                component: component.to_owned(),
                value,
            },
        );
    }

    /// Queue removal of `component` from `target`.
    pub fn remove_component(&mut self, target: Entity, component: &str) {
        self.push(
            Some(target),
            CommandKind::RemoveComponent {
                component: component.to_owned(),
            },
        );
    }

    /// Queue a despawn of `target` alone.
    pub fn despawn(&mut self, target: Entity) {
        self.push(Some(target), CommandKind::Despawn);
    }

    /// Queue a despawn of `target` and its descendants.
    pub fn despawn_recursive(&mut self, target: Entity) {
        self.push(Some(target), CommandKind::DespawnRecursive);
    }

    /// Queue attaching `child` under `parent`.
    pub fn add_child(&mut self, parent: Entity, child: Entity) {
        self.push(Some(child), CommandKind::AddChild { parent });
    }

    /// Queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Report from the last [`apply`](Self::apply); all zeros before the
    /// first one.
    pub fn last_apply_report(&self) -> &ApplyReport {
        &self.last_apply_report
    }

    /// Apply every queued command in insertion order and return them, each
    /// marked with whether it succeeded.
    pub fn apply(&mut self, world: &mut World) -> Vec<Command> {
        let mut commands = std::mem::take(&mut self.commands);
        self.next_index = 0;

        // --- Conflict detection ---
        let mut seen: HashMap<(Entity, &str), Vec<u32>> = HashMap::new();
        for cmd in &commands {
            let component = match &cmd.kind {
                CommandKind::SetComponent { component, .. } => component,
                CommandKind::RemoveComponent { component } => component,
                _ => continue,
            };
            if let Some(target) = cmd.target {
                seen.entry((target, component.as_str()))
                    .or_default()
                    .push(cmd.command_index);
            }
        }
        let mut conflict_count = 0;
        for ((entity, component), indices) in &seen {
            if indices.len() > 1 {
                conflict_count += 1;
                warn!(
                    entity = ?entity,
                    component = %component,
                    command_indices = ?indices,
                    "{} commands target the same entity and component (last write wins)",
                    indices.len()
                );
            }
        }

        // --- Apply loop ---
        let mut success_count = 0;
        let mut failed_count = 0;
        for cmd in &mut commands {
            match Self::apply_one(world, cmd) {
                Ok(()) => {
                    cmd.applied_successfully = true;
                    success_count += 1;
                }
                Err(e) => {
                    failed_count += 1;
                    warn!(
                        command_index = cmd.command_index,
                        target = ?cmd.target,
                        issued_by = cmd.issued_by.as_deref().unwrap_or("-"),
                        error = %e,
                        "command application failed"
                    );
                }
            }
        }

        self.last_apply_report = ApplyReport {
            conflict_count,
            failed_count,
            success_count,
        };
        commands
    }

    fn apply_one(world: &mut World, cmd: &mut Command) -> Result<(), EcsError> {
        if let CommandKind::Spawn { components, parent } = &cmd.kind {
            let mut bundle = ComponentBundle::new();
            for (name, value) in components {
                bundle.add_json(name, value.clone());
            }
            let entity = world.spawn_bundle(bundle)?;
            cmd.spawned_entity = Some(entity);
            if let Some(parent) = *parent {
                world.add_child(parent, entity)?;
            }
            return Ok(());
        }

        // Every other kind is recorded with a target.
        let Some(target) = cmd.target else {
            return Ok(());
        };
        match &cmd.kind {
            CommandKind::SetComponent { component, value } => {
                world.set_component_json(target, component, value)
            }
            CommandKind::RemoveComponent { component } => {
                world.remove_component_by_name(target, component).map(drop)
            }
            CommandKind::Despawn => world.despawn(target),
            CommandKind::DespawnRecursive => world.despawn_recursive(target).map(drop),
            CommandKind::AddChild { parent } => world.add_child(*parent, target),
            CommandKind::Spawn { .. } => Ok(()),
        }
    }

    /// Move every command out of `other` onto the end of this buffer,
    /// renumbering them.
    pub fn append(&mut self, other: &mut CommandBuffer) {
        for cmd in other.commands.drain(..) {
            self.push_raw(cmd);
        }
        other.next_index = 0;
    }

    /// Push a pre-built command; its index is reassigned.
    pub fn push_raw(&mut self, mut cmd: Command) {
        cmd.command_index = self.next_index;
        self.next_index += 1;
        self.commands.push(cmd);
    }

    /// Drop every queued command without applying it.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    fn push(&mut self, target: Option<Entity>, kind: CommandKind) {
        let index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            target,
            kind,
            issued_by: self.issuer.clone(),
            command_index: index,
            spawned_entity: None,
            applied_successfully: false,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health(u32);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Position>("Position");
        world.register_component::<Health>("Health");
        world
    }

    #[test]
    fn commands_are_indexed_in_order() {
        let e = Entity::new(0, 0);
        let mut buf = CommandBuffer::new();
        buf.set_issuer(Some("movement"));
        buf.set_component(e, "Position", json!({"x": 1.0, "y": 2.0}));
        buf.remove_component(e, "Health");
        buf.set_issuer(None);
        buf.despawn(e);

        let cmds = buf.commands();
        assert_eq!(cmds.len(), 3);
        assert_eq!(
            cmds.iter().map(|c| c.command_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(cmds[0].issued_by.as_deref(), Some("movement"));
        assert_eq!(cmds[2].issued_by, None);
        assert!(matches!(cmds[1].kind, CommandKind::RemoveComponent { .. }));
    }

    #[test]
    fn apply_runs_fifo_and_clears() {
        let mut world = setup_world();
        let e = world.spawn_with(Health(100)).unwrap();

        let mut buf = CommandBuffer::new();
        buf.set_component(e, "Health", json!(80));
        buf.set_component(e, "Health", json!(60));
        buf.set_component(e, "Position", json!({"x": 3.0, "y": 4.0}));

        let applied = buf.apply(&mut world);
        assert_eq!(applied.len(), 3);
        assert!(applied.iter().all(|c| c.applied_successfully));
        assert!(buf.is_empty());
        assert_eq!(world.get_component::<Health>(e), Some(&Health(60)));
        assert_eq!(
            world.get_component::<Position>(e),
            Some(&Position { x: 3.0, y: 4.0 })
        );

        let report = buf.last_apply_report();
        assert_eq!(report.conflict_count, 1);
        assert_eq!(report.success_count, 3);
        assert_eq!(report.failed_count, 0);
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let mut world = setup_world();
        let live = world.spawn();
        let dead = world.spawn();
        world.despawn(dead).unwrap();

        let mut buf = CommandBuffer::new();
        buf.set_component(dead, "Health", json!(1));
        buf.set_component(live, "Mana", json!(1));
        buf.set_component(live, "Health", json!("not a number"));
        buf.set_component(live, "Health", json!(7));

        let applied = buf.apply(&mut world);
        let ok: Vec<bool> = applied.iter().map(|c| c.applied_successfully).collect();
        assert_eq!(ok, vec![false, false, false, true]);
        assert_eq!(world.get_component::<Health>(live), Some(&Health(7)));
        assert_eq!(buf.last_apply_report().failed_count, 3);
    }

    #[test]
    fn spawn_records_the_new_entity() {
        let mut world = setup_world();
        let parent = world.spawn();

        let mut buf = CommandBuffer::new();
        buf.spawn(vec![("Health".to_owned(), json!(5))]);
        buf.spawn_child_of(parent, vec![("Health".to_owned(), json!(6))]);
        buf.spawn(vec![("Unknown".to_owned(), json!(null))]);

        let applied = buf.apply(&mut world);
        let first = applied[0].spawned_entity.unwrap();
        let child = applied[1].spawned_entity.unwrap();
        assert_eq!(world.get_component::<Health>(first), Some(&Health(5)));
        assert_eq!(world.parent(child), Some(parent));
        // A spawn with an unresolvable component creates nothing.
        assert!(!applied[2].applied_successfully);
        assert_eq!(applied[2].spawned_entity, None);
        assert_eq!(world.entity_count(), 3);
    }

    #[test]
    fn hierarchy_commands() {
        let mut world = setup_world();
        let (p, c, g) = (world.spawn(), world.spawn(), world.spawn());

        let mut buf = CommandBuffer::new();
        buf.add_child(p, c);
        buf.add_child(c, g);
        buf.despawn_recursive(c);
        buf.apply(&mut world);

        assert!(world.is_alive(p));
        assert!(!world.is_alive(c));
        assert!(!world.is_alive(g));
        assert!(world.children(p).is_empty());
    }

    #[test]
    fn append_renumbers() {
        let e = Entity::new(1, 0);
        let mut a = CommandBuffer::new();
        a.despawn(e);
        let mut b = CommandBuffer::new();
        b.despawn(e);
        b.despawn(e);
        a.append(&mut b);
        assert!(b.is_empty());
        assert_eq!(
            a.commands().iter().map(|c| c.command_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn commands_round_trip_through_json() {
        let mut buf = CommandBuffer::new();
        buf.set_component(Entity::new(2, 1), "Health", json!(3));
        let text = serde_json::to_string(&buf.commands()[0]).unwrap();
        let back: Command = serde_json::from_str(&text).unwrap();
        assert_eq!(back, buf.commands()[0]);
    }
}
