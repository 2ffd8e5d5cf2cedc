//! Parent/child relations.
//!
//! The storage layer knows nothing about hierarchy; it is two ordinary
//! components kept consistent by the helpers below. If `a`'s [`Children`]
//! contains `b`, then `b`'s [`Parent`] points at `a`.
//!
//! Both components declare their handle fields as entity references, which
//! is how the scene serializer renumbers and rebuilds hierarchy.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::component::ComponentDescriptor;
use crate::config::{ComponentConfig, PropertyConfig};
use crate::editor::EditorMetadata;
use crate::entity::Entity;
use crate::world::World;
use crate::EcsError;

/// Registered name of [`Parent`].
pub const PARENT: &str = "Parent";
/// Registered name of [`Children`].
pub const CHILDREN: &str = "Children";

/// Points at the entity that owns this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    pub entity: Entity,
}

/// Owned entities, in attach order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Children {
    pub entities: Vec<Entity>,
}

pub(crate) fn register_hierarchy(world: &mut World) {
    let parent = ComponentDescriptor::<Parent>::new(PARENT)
        .config(ComponentConfig::new().property("entity", PropertyConfig::new().entity_ref()))
        .metadata(EditorMetadata::at("Core/Hierarchy").description("Owning entity"));
    let children = ComponentDescriptor::<Children>::new(CHILDREN)
        .config(ComponentConfig::new().property("entities", PropertyConfig::new().entity_ref_list()))
        .metadata(EditorMetadata::at("Core/Hierarchy").description("Owned entities"))
        .with_default();
    for result in [world.register(parent), world.register(children)] {
        if let Err(e) = result {
            error!(error = %e, "failed to register hierarchy components");
        }
    }
}

impl World {
    /// Make `child` a child of `parent`, detaching it from any previous
    /// parent. Updates both sides.
    pub fn add_child(&mut self, parent: Entity, child: Entity) -> Result<(), EcsError> {
        for entity in [parent, child] {
            if !self.is_alive(entity) {
                return Err(EcsError::StaleEntity(entity));
            }
        }
        if parent == child || self.is_ancestor_of(child, parent) {
            return Err(EcsError::HierarchyCycle { parent, child });
        }

        match self.parent(child) {
            Some(old) if old == parent => {}
            Some(old) => self.detach_from(old, child),
            None => {}
        }
        self.insert_component(child, Parent { entity: parent })?;
        match self.get_component_mut::<Children>(parent) {
            Some(children) => {
                if !children.entities.contains(&child) {
                    children.entities.push(child);
                }
            }
            None => self.insert_component(parent, Children { entities: vec![child] })?,
        }
        trace!(parent = ?parent, child = ?child, "child attached");
        Ok(())
    }

    /// Break the `parent` -> `child` link. Returns whether it existed.
    pub fn remove_child(&mut self, parent: Entity, child: Entity) -> Result<bool, EcsError> {
        if !self.is_alive(parent) {
            return Err(EcsError::StaleEntity(parent));
        }
        let linked = self.parent(child) == Some(parent);
        if linked {
            self.remove_component::<Parent>(child)?;
        }
        let listed = self.children(parent).contains(&child);
        self.detach_from(parent, child);
        Ok(linked || listed)
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.get_component::<Parent>(entity).map(|p| p.entity)
    }

    /// Direct children, in attach order.
    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.get_component::<Children>(entity)
            .map(|c| c.entities.as_slice())
            .unwrap_or(&[])
    }

    /// Every entity below `root`, depth-first pre-order, excluding `root`.
    /// Dead handles are skipped and a malformed hierarchy with cycles still
    /// terminates.
    pub fn descendants(&self, root: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([root]);
        let mut stack: Vec<Entity> = self.children(root).iter().rev().copied().collect();
        while let Some(entity) = stack.pop() {
            if !visited.insert(entity) || !self.is_alive(entity) {
                continue;
            }
            out.push(entity);
            stack.extend(self.children(entity).iter().rev().copied());
        }
        out
    }

    /// Despawn `root` and its whole subtree, and unlink `root` from its
    /// parent. Returns how many entities were despawned.
    pub fn despawn_recursive(&mut self, root: Entity) -> Result<usize, EcsError> {
        if !self.is_alive(root) {
            return Err(EcsError::StaleEntity(root));
        }
        if let Some(parent) = self.parent(root) {
            self.detach_from(parent, root);
        }
        let mut doomed = vec![root];
        doomed.extend(self.descendants(root));
        let mut count = 0;
        for entity in doomed {
            if self.despawn(entity).is_ok() {
                count += 1;
            }
        }
        trace!(root = ?root, count, "despawned subtree");
        Ok(count)
    }

    /// Whether `ancestor` is reachable from `entity` by following `Parent`.
    fn is_ancestor_of(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut seen = HashSet::new();
        let mut current = self.parent(entity);
        while let Some(e) = current {
            if e == ancestor {
                return true;
            }
            if !seen.insert(e) {
                return false;
            }
            current = self.parent(e);
        }
        false
    }

    /// Drop `child` from `parent`'s `Children`, removing the component when
    /// it becomes empty.
    fn detach_from(&mut self, parent: Entity, child: Entity) {
        let now_empty = match self.get_component_mut::<Children>(parent) {
            Some(children) => {
                children.entities.retain(|&c| c != child);
                children.entities.is_empty()
            }
            None => return,
        };
        if now_empty {
            let _ = self.remove_component::<Children>(parent);
        }
    }
}
