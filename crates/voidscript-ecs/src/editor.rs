//! Editor-facing component metadata and inspector hooks.
//!
//! The registry only stores plain [`EditorMetadata`]. Custom inspector UI is
//! a separate, optional capability: hosts register a [`ComponentInspector`]
//! per component name in an [`InspectorRegistry`], and components without
//! one get whatever generic property editor the host provides.

use std::any::Any;
use std::collections::HashMap;

use serde_json::Value;

use crate::entity::Entity;
use crate::world::World;
use crate::EcsError;

/// Display information for component browsers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorMetadata {
    /// Label shown instead of the registered name.
    pub display_name: Option<String>,
    /// Browser folder, segments separated by `/` or `.`. Empty is the root.
    pub path: String,
    /// Tooltip text.
    pub description: Option<String>,
}

impl EditorMetadata {
    /// Metadata placing the component at `path` in the browser.
    pub fn at(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            ..Self::default()
        }
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_owned());
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_owned());
        self
    }
}

/// Custom editor UI for one component type.
///
/// `ui` is the host's UI context, passed through untouched. Implementations
/// edit the component's JSON form and return `true` when they changed it.
pub trait ComponentInspector: Send + Sync {
    /// Draw the editor for `value`, returning whether it was edited.
    fn draw(&self, ui: &mut dyn Any, value: &mut Value) -> bool;
}

/// Inspectors keyed by registered component name.
#[derive(Default)]
pub struct InspectorRegistry {
    inspectors: HashMap<String, Box<dyn ComponentInspector>>,
}

impl InspectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an inspector, returning the one it replaced.
    pub fn register(
        &mut self,
        component: &str,
        inspector: impl ComponentInspector + 'static,
    ) -> Option<Box<dyn ComponentInspector>> {
        self.inspectors
            .insert(component.to_owned(), Box::new(inspector))
    }

    pub fn remove(&mut self, component: &str) -> Option<Box<dyn ComponentInspector>> {
        self.inspectors.remove(component)
    }

    /// Inspector for `component`, if one is installed.
    pub fn get(&self, component: &str) -> Option<&dyn ComponentInspector> {
        self.inspectors.get(component).map(|b| b.as_ref())
    }

    pub fn contains(&self, component: &str) -> bool {
        self.inspectors.contains_key(component)
    }

    pub fn len(&self) -> usize {
        self.inspectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inspectors.is_empty()
    }

    /// Run the inspector for `component` on `entity` and write the result
    /// back if it reported an edit.
    ///
    /// Returns `Ok(false)` when no inspector is registered for the type.
    pub fn inspect(
        &self,
        world: &mut World,
        entity: Entity,
        component: &str,
        ui: &mut dyn Any,
    ) -> Result<bool, EcsError> {
        let Some(inspector) = self.get(component) else {
            return Ok(false);
        };
        let mut value = world.component_json(entity, component)?;
        if !inspector.draw(ui, &mut value) {
            return Ok(false);
        }
        world.set_component_json(entity, component, &value)?;
        Ok(true)
    }
}

impl std::fmt::Debug for InspectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.inspectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("InspectorRegistry")
            .field("components", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health {
        current: i32,
    }

    /// Clamps health to zero and counts invocations in the UI context.
    struct ClampInspector;

    impl ComponentInspector for ClampInspector {
        fn draw(&self, ui: &mut dyn Any, value: &mut Value) -> bool {
            if let Some(calls) = ui.downcast_mut::<u32>() {
                *calls += 1;
            }
            let current = value["current"].as_i64().unwrap_or(0);
            if current < 0 {
                value["current"] = Value::from(0);
                return true;
            }
            false
        }
    }

    #[test]
    fn inspector_edits_are_written_back() {
        let mut world = World::new();
        world.register_component::<Health>("Health");
        let e = world.spawn_with(Health { current: -5 }).unwrap();

        let mut inspectors = InspectorRegistry::new();
        inspectors.register("Health", ClampInspector);

        let mut calls = 0u32;
        assert!(inspectors.inspect(&mut world, e, "Health", &mut calls).unwrap());
        assert_eq!(world.get_component::<Health>(e), Some(&Health { current: 0 }));
        assert!(!inspectors.inspect(&mut world, e, "Health", &mut calls).unwrap());
        assert_eq!(calls, 2);
    }

    #[test]
    fn missing_inspector_is_not_an_error() {
        let mut world = World::new();
        world.register_component::<Health>("Health");
        let e = world.spawn_with(Health { current: 1 }).unwrap();
        let inspectors = InspectorRegistry::new();
        assert!(!inspectors.inspect(&mut world, e, "Health", &mut ()).unwrap());
    }

    #[test]
    fn register_replaces_previous() {
        let mut inspectors = InspectorRegistry::new();
        assert!(inspectors.register("Health", ClampInspector).is_none());
        assert!(inspectors.register("Health", ClampInspector).is_some());
        assert_eq!(inspectors.len(), 1);
        assert!(inspectors.remove("Health").is_some());
        assert!(inspectors.is_empty());
    }
}
