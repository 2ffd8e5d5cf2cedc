//! Named spawn templates.
//!
//! A [`Bundle`] lists the components an entity gets and, per property,
//! whether the caller must supply it, may override it, or never sees it.
//! Values are merged over the component type's registered default, turned
//! into typed components through the registry, and spawned together.
//!
//! ```
//! use serde_json::json;
//! use voidscript_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Sprite { texture: String, layer: i32, tint: Vec<f32> }
//!
//! let mut world = World::new();
//! world
//!     .register(ComponentDescriptor::<Sprite>::new("Sprite").with_default())
//!     .unwrap();
//!
//! let bundle = Bundle::new("SpriteBundle").component(
//!     BundleComponent::new("Sprite")
//!         .required("texture")
//!         .optional("tint", DefaultValue::factory(|| json!([1.0, 1.0, 1.0, 1.0])))
//!         .hidden("layer", json!(2)),
//! );
//!
//! let overrides = BundleOverrides::new().set("Sprite", "texture", json!("hero.png"));
//! let e = bundle.instantiate(&mut world, &overrides).unwrap();
//! let sprite = world.get_component::<Sprite>(e).unwrap();
//! assert_eq!(sprite.layer, 2);
//! assert_eq!(sprite.tint.len(), 4);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::component::{BoxedComponent, ComponentTypeId};
use crate::entity::Entity;
use crate::world::{unknown_component, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Property rules
// ---------------------------------------------------------------------------

/// Default for an optional property.
///
/// Use a factory for values that should not be shared between spawns.
#[derive(Clone)]
pub enum DefaultValue {
    /// The same value for every spawn.
    Static(Value),
    /// Called once per spawn.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// A fixed default.
    pub fn value(value: Value) -> Self {
        Self::Static(value)
    }

    /// A default computed per spawn.
    pub fn factory(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Factory(Arc::new(f))
    }

    fn produce(&self) -> Value {
        match self {
            Self::Static(v) => v.clone(),
            Self::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(v) => f.debug_tuple("Static").field(v).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

#[derive(Debug, Clone)]
enum PropertyRule {
    Required,
    Optional(DefaultValue),
    Hidden(Value),
}

/// How a property is exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyVisibility {
    Required,
    Optional,
    Hidden,
}

// ---------------------------------------------------------------------------
// BundleComponent / Bundle
// ---------------------------------------------------------------------------

/// One component of a bundle and its property contract. Properties not
/// mentioned keep the component default.
#[derive(Debug, Clone)]
pub struct BundleComponent {
    component: String,
    properties: Vec<(String, PropertyRule)>,
}

impl BundleComponent {
    /// Contract for the component registered as `component`, with no properties yet.
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_owned(),
            properties: Vec::new(),
        }
    }

    /// Callers must supply `property`.
    pub fn required(self, property: &str) -> Self {
        self.rule(property, PropertyRule::Required)
    }

    /// Callers may supply `property`; `default` is used otherwise.
    pub fn optional(self, property: &str, default: DefaultValue) -> Self {
        self.rule(property, PropertyRule::Optional(default))
    }

    /// `property` is always `value`; callers may not set it.
    pub fn hidden(self, property: &str, value: Value) -> Self {
        self.rule(property, PropertyRule::Hidden(value))
    }

    fn rule(mut self, property: &str, rule: PropertyRule) -> Self {
        match self.properties.iter_mut().find(|(name, _)| name == property) {
            Some(slot) => slot.1 = rule,
            None => self.properties.push((property.to_owned(), rule)),
        }
        self
    }

    /// Registered name of the component.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Declared properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, PropertyVisibility)> {
        self.properties.iter().map(|(name, rule)| {
            let visibility = match rule {
                PropertyRule::Required => PropertyVisibility::Required,
                PropertyRule::Optional(_) => PropertyVisibility::Optional,
                PropertyRule::Hidden(_) => PropertyVisibility::Hidden,
            };
            (name.as_str(), visibility)
        })
    }

    fn find(&self, property: &str) -> Option<&PropertyRule> {
        self.properties
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, rule)| rule)
    }
}

/// A named spawn template: a list of components and which of their
/// properties callers must, may, or may not set.
///
/// Instantiation merges, per component, the registered default, then hidden
/// and optional values, then caller overrides.
#[derive(Debug, Clone)]
pub struct Bundle {
    name: String,
    components: Vec<BundleComponent>,
}

impl Bundle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Vec::new(),
        }
    }

    /// Add a component. A second entry for the same type replaces the first.
    pub fn component(mut self, component: BundleComponent) -> Self {
        match self
            .components
            .iter_mut()
            .find(|c| c.component == component.component)
        {
            Some(slot) => *slot = component,
            None => self.components.push(component),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &[BundleComponent] {
        &self.components
    }

    /// Every `(component, property)` the caller may or must set.
    pub fn exposed_properties(&self) -> Vec<(&str, &str, PropertyVisibility)> {
        self.components
            .iter()
            .flat_map(|c| {
                c.properties()
                    .filter(|(_, vis)| *vis != PropertyVisibility::Hidden)
                    .map(move |(p, vis)| (c.component(), p, vis))
            })
            .collect()
    }

    /// Check `overrides` and build every component value, without touching
    /// the world.
    pub fn materialize(
        &self,
        world: &World,
        overrides: &BundleOverrides,
    ) -> Result<Vec<(ComponentTypeId, BoxedComponent)>, EcsError> {
        self.check_overrides(overrides)?;

        let registry = world.registry();
        let mut out = Vec::with_capacity(self.components.len());
        for spec in &self.components {
            let ty = registry
                .get_by_name(&spec.component)
                .ok_or_else(|| unknown_component(registry, &spec.component))?;

            let mut fields = match ty.default_json() {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            for (property, rule) in &spec.properties {
                let supplied = overrides.get(&spec.component, property);
                let value = match rule {
                    PropertyRule::Required => match supplied {
                        Some(v) => v.clone(),
                        None => {
                            return Err(EcsError::MissingBundleProperty {
                                bundle: self.name.clone(),
                                component: spec.component.clone(),
                                property: property.clone(),
                            })
                        }
                    },
                    PropertyRule::Optional(default) => match supplied {
                        Some(v) => v.clone(),
                        None => default.produce(),
                    },
                    PropertyRule::Hidden(fixed) => fixed.clone(),
                };
                fields.insert(property.clone(), value);
            }
            out.push((ty.id(), ty.from_json(Value::Object(fields))?));
        }
        Ok(out)
    }

    /// Validate, build and spawn in one storage operation.
    pub fn instantiate(&self, world: &mut World, overrides: &BundleOverrides) -> Result<Entity, EcsError> {
        let components = self.materialize(world, overrides)?;
        let entity = world.spawn_boxed(components)?;
        debug!(bundle = %self.name, entity = ?entity, "bundle instantiated");
        Ok(entity)
    }

    fn check_overrides(&self, overrides: &BundleOverrides) -> Result<(), EcsError> {
        for (component, property) in overrides.keys() {
            let rule = self
                .components
                .iter()
                .find(|c| c.component == component)
                .and_then(|c| c.find(property));
            let (bundle, component, property) =
                (self.name.clone(), component.to_owned(), property.to_owned());
            match rule {
                Some(PropertyRule::Hidden(_)) => {
                    return Err(EcsError::HiddenBundleProperty {
                        bundle,
                        component,
                        property,
                    })
                }
                Some(_) => {}
                None => {
                    return Err(EcsError::UnknownBundleProperty {
                        bundle,
                        component,
                        property,
                    })
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BundleOverrides
// ---------------------------------------------------------------------------

/// Caller-supplied values keyed by `(component, property)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleOverrides {
    values: BTreeMap<(String, String), Value>,
}

impl BundleOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn set(mut self, component: &str, property: &str, value: Value) -> Self {
        self.insert(component, property, value);
        self
    }

    /// Set `component.property`, replacing an earlier value.
    pub fn insert(&mut self, component: &str, property: &str, value: Value) {
        self.values
            .insert((component.to_owned(), property.to_owned()), value);
    }

    /// Value given for `component.property`, if any.
    pub fn get(&self, component: &str, property: &str) -> Option<&Value> {
        self.values.get(&(component.to_owned(), property.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.keys().map(|(c, p)| (c.as_str(), p.as_str()))
    }
}

// ---------------------------------------------------------------------------
// BundleRegistry
// ---------------------------------------------------------------------------

/// Bundles by name, for spawn-by-name and editor listings.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bundles: HashMap<String, Bundle>,
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a bundle, returning the one it replaced.
    pub fn register(&mut self, bundle: Bundle) -> Option<Bundle> {
        self.bundles.insert(bundle.name.clone(), bundle)
    }

    /// Bundle registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Bundle> {
        self.bundles.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Bundle> {
        self.bundles.remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bundles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Instantiate the bundle registered under `name`.
    ///
    /// Fails with [`EcsError::UnknownBundle`] before touching the world if
    /// there is no such bundle.
    pub fn spawn(&self, world: &mut World, name: &str, overrides: &BundleOverrides) -> Result<Entity, EcsError> {
        self.get(name)
            .ok_or_else(|| EcsError::UnknownBundle {
                name: name.to_owned(),
            })?
            .instantiate(world, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDescriptor;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Transform {
        x: f32,
        y: f32,
        scale: f32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Body {
        mass: f32,
        shapes: Vec<String>,
        kind: String,
    }

    /// No registered default: every field must come from the bundle.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        label: String,
    }

    fn setup() -> World {
        let mut world = World::new();
        world
            .register(ComponentDescriptor::<Transform>::new("Transform").with_default())
            .unwrap();
        world
            .register(ComponentDescriptor::<Body>::new("Body").with_default())
            .unwrap();
        world.register_component::<Tag>("Tag");
        world
    }

    fn physics_bundle() -> Bundle {
        Bundle::new("PhysicsBundle")
            .component(
                BundleComponent::new("Transform")
                    .required("x")
                    .optional("y", DefaultValue::value(json!(5.0)))
                    .hidden("scale", json!(1.0)),
            )
            .component(
                BundleComponent::new("Body")
                    .required("mass")
                    .optional("shapes", DefaultValue::factory(|| json!(["box"])))
                    .hidden("kind", json!("dynamic")),
            )
    }

    #[test]
    fn merges_defaults_and_overrides() {
        let mut world = setup();
        let overrides = BundleOverrides::new()
            .set("Transform", "x", json!(3.0))
            .set("Body", "mass", json!(2.5));
        let e = physics_bundle().instantiate(&mut world, &overrides).unwrap();

        assert_eq!(
            world.get_component::<Transform>(e),
            Some(&Transform { x: 3.0, y: 5.0, scale: 1.0 })
        );
        let body = world.get_component::<Body>(e).unwrap();
        assert_eq!(body.shapes, vec!["box".to_owned()]);
        assert_eq!(body.kind, "dynamic");
    }

    #[test]
    fn missing_required_names_the_property() {
        let mut world = setup();
        let overrides = BundleOverrides::new().set("Transform", "x", json!(0.0));
        let err = physics_bundle().instantiate(&mut world, &overrides).unwrap_err();
        match err {
            EcsError::MissingBundleProperty {
                bundle,
                component,
                property,
            } => {
                assert_eq!(bundle, "PhysicsBundle");
                assert_eq!(component, "Body");
                assert_eq!(property, "mass");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn hidden_and_undeclared_overrides_are_rejected() {
        let mut world = setup();
        let base = BundleOverrides::new()
            .set("Transform", "x", json!(0.0))
            .set("Body", "mass", json!(1.0));

        let hidden = base.clone().set("Body", "kind", json!("static"));
        assert!(matches!(
            physics_bundle().instantiate(&mut world, &hidden),
            Err(EcsError::HiddenBundleProperty { .. })
        ));

        let unknown = base.set("Body", "friction", json!(0.3));
        assert!(matches!(
            physics_bundle().instantiate(&mut world, &unknown),
            Err(EcsError::UnknownBundleProperty { .. })
        ));
    }

    #[test]
    fn factory_defaults_are_fresh_per_spawn() {
        let mut world = setup();
        let bundle = physics_bundle();
        let overrides = BundleOverrides::new()
            .set("Transform", "x", json!(0.0))
            .set("Body", "mass", json!(1.0));
        let a = bundle.instantiate(&mut world, &overrides).unwrap();
        let b = bundle.instantiate(&mut world, &overrides).unwrap();
        world.get_component_mut::<Body>(a).unwrap().shapes.push("circle".into());
        assert_eq!(world.get_component::<Body>(b).unwrap().shapes.len(), 1);
    }

    #[test]
    fn components_without_defaults_need_every_field() {
        let mut world = setup();
        let complete = Bundle::new("Tagged").component(BundleComponent::new("Tag").required("label"));
        let e = complete
            .instantiate(&mut world, &BundleOverrides::new().set("Tag", "label", json!("enemy")))
            .unwrap();
        assert_eq!(world.get_component::<Tag>(e).unwrap().label, "enemy");

        let incomplete = Bundle::new("Empty").component(BundleComponent::new("Tag"));
        assert!(matches!(
            incomplete.instantiate(&mut world, &BundleOverrides::new()),
            Err(EcsError::ComponentDeserialization { .. })
        ));
    }

    #[test]
    fn unknown_component_type() {
        let mut world = setup();
        let bundle = Bundle::new("Ghost").component(BundleComponent::new("Ghost"));
        assert!(matches!(
            bundle.instantiate(&mut world, &BundleOverrides::new()),
            Err(EcsError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn registry_spawns_by_name() {
        let mut world = setup();
        let mut bundles = BundleRegistry::new();
        assert!(bundles.register(physics_bundle()).is_none());
        assert_eq!(bundles.names(), vec!["PhysicsBundle"]);

        let overrides = BundleOverrides::new()
            .set("Transform", "x", json!(1.0))
            .set("Body", "mass", json!(1.0));
        let e = bundles.spawn(&mut world, "PhysicsBundle", &overrides).unwrap();
        assert!(world.has_component::<Body>(e));
        assert!(matches!(
            bundles.spawn(&mut world, "Nope", &overrides),
            Err(EcsError::UnknownBundle { .. })
        ));
    }

    #[test]
    fn exposed_properties_skip_hidden() {
        let bundle = physics_bundle();
        assert_eq!(
            bundle.exposed_properties(),
            vec![
                ("Transform", "x", PropertyVisibility::Required),
                ("Transform", "y", PropertyVisibility::Optional),
                ("Body", "mass", PropertyVisibility::Required),
                ("Body", "shapes", PropertyVisibility::Optional),
            ]
        );
    }
}
