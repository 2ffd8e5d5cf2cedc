//! Component type registration and metadata.
//!
//! Every component kind is registered once in a [`ComponentRegistry`], which
//! hands out a [`ComponentTypeId`] and keeps the type's name, serialization
//! [`ComponentConfig`], optional [`EditorMetadata`] and a [`ComponentVtable`]
//! of type-erased operations. Storage keys columns by ID; serialized data is
//! keyed by *name*, since IDs depend on registration order and are not stable
//! across runs.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ComponentConfig;
use crate::editor::EditorMetadata;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Any plain data type that can be cloned, shared across threads and
/// round-tripped through serde can be a component.
pub trait Component: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Component for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A component value with its concrete type erased.
pub type BoxedComponent = Box<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Registry-assigned identifier for a component type. Process-local.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Wrap a raw ID. Only meaningful against the registry that issued it.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentVtable
// ---------------------------------------------------------------------------

type ToJsonFn = fn(&dyn Any) -> Result<Value, String>;
type FromJsonFn = fn(Value) -> Result<BoxedComponent, String>;
type CloneFn = fn(&dyn Any) -> Option<BoxedComponent>;
type DefaultJsonFn = fn() -> Result<Value, String>;

/// Type-erased operations for one component type, monomorphized at
/// registration.
#[derive(Clone, Copy)]
pub struct ComponentVtable {
    to_json: ToJsonFn,
    from_json: FromJsonFn,
    clone_boxed: CloneFn,
    default_json: Option<DefaultJsonFn>,
}

impl ComponentVtable {
    /// JSON conversion and cloning for `T`, with no default value factory.
    pub fn of<T: Component>() -> Self {
        Self {
            to_json: to_json_of::<T>,
            from_json: from_json_of::<T>,
            clone_boxed: clone_of::<T>,
            default_json: None,
        }
    }

    /// Use `T::default()` as the default value factory.
    pub fn with_default<T: Component + Default>(mut self) -> Self {
        self.default_json = Some(default_json_of::<T>);
        self
    }
}

impl fmt::Debug for ComponentVtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVtable")
            .field("has_default", &self.default_json.is_some())
            .finish()
    }
}

fn to_json_of<T: Component>(value: &dyn Any) -> Result<Value, String> {
    let typed = value
        .downcast_ref::<T>()
        .ok_or_else(|| format!("stored value is not a `{}`", std::any::type_name::<T>()))?;
    serde_json::to_value(typed).map_err(|e| e.to_string())
}

fn from_json_of<T: Component>(value: Value) -> Result<BoxedComponent, String> {
    serde_json::from_value::<T>(value)
        .map(|typed| Box::new(typed) as BoxedComponent)
        .map_err(|e| e.to_string())
}

fn clone_of<T: Component>(value: &dyn Any) -> Option<BoxedComponent> {
    value
        .downcast_ref::<T>()
        .map(|typed| Box::new(typed.clone()) as BoxedComponent)
}

fn default_json_of<T: Component + Default>() -> Result<Value, String> {
    serde_json::to_value(T::default()).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// ComponentType
// ---------------------------------------------------------------------------

/// A registered component schema: identity, serialization config, editor
/// metadata and type-erased operations.
#[derive(Debug, Clone)]
pub struct ComponentType {
    id: ComponentTypeId,
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    config: ComponentConfig,
    metadata: Option<EditorMetadata>,
    vtable: ComponentVtable,
}

impl ComponentType {
    /// Describe `T` under `name` with the given ID and default config.
    pub fn new<T: Component>(id: ComponentTypeId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            config: ComponentConfig::default(),
            metadata: None,
            vtable: ComponentVtable::of::<T>(),
        }
    }

    /// Replace the serialization config.
    pub fn with_config(mut self, config: ComponentConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach editor metadata, making the type browsable.
    pub fn with_metadata(mut self, metadata: EditorMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_vtable(mut self, vtable: ComponentVtable) -> Self {
        self.vtable = vtable;
        self
    }

    /// Registry-assigned ID.
    pub fn id(&self) -> ComponentTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name, for diagnostics only.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// How the scene serializer treats this type.
    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn metadata(&self) -> Option<&EditorMetadata> {
        self.metadata.as_ref()
    }

    /// Display name for editor UI, falling back to the registered name.
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.display_name.as_deref())
            .unwrap_or(&self.name)
    }

    /// Whether loads and bundles can merge over a default value.
    pub fn has_default(&self) -> bool {
        self.vtable.default_json.is_some()
    }

    /// Serialize a stored value of this type to JSON.
    pub fn to_json(&self, value: &dyn Any) -> Result<Value, EcsError> {
        (self.vtable.to_json)(value).map_err(|details| EcsError::ComponentSerialization {
            component: self.name.clone(),
            details,
        })
    }

    /// Build a boxed value of this type from JSON.
    pub fn from_json(&self, value: Value) -> Result<BoxedComponent, EcsError> {
        (self.vtable.from_json)(value).map_err(|details| EcsError::ComponentDeserialization {
            component: self.name.clone(),
            details,
        })
    }

    /// Deep-copy a stored value of this type.
    pub fn clone_value(&self, value: &dyn Any) -> Option<BoxedComponent> {
        (self.vtable.clone_boxed)(value)
    }

    /// JSON form of the type's default value, if it was registered with one.
    pub fn default_json(&self) -> Option<Value> {
        let make = self.vtable.default_json?;
        match make() {
            Ok(value) => Some(value),
            Err(details) => {
                warn!(component = %self.name, %details, "default value failed to serialize");
                None
            }
        }
    }

    fn path_segments(&self) -> Option<Vec<&str>> {
        self.metadata.as_ref().map(|m| split_path(&m.path))
    }
}

// ---------------------------------------------------------------------------
// ComponentDescriptor
// ---------------------------------------------------------------------------

/// Input to [`ComponentRegistry::get_or_register`].
///
/// `config` and `metadata` left as `None` keep whatever an earlier
/// registration stored.
pub struct ComponentDescriptor<T> {
    name: String,
    config: Option<ComponentConfig>,
    metadata: Option<EditorMetadata>,
    default_json: Option<DefaultJsonFn>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentDescriptor<T> {
    /// Describe `T` under `name`, leaving everything else as registered before.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            config: None,
            metadata: None,
            default_json: None,
            _marker: PhantomData,
        }
    }

    /// Serialization config to register, replacing any earlier one.
    pub fn config(mut self, config: ComponentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Editor metadata to register, replacing any earlier one.
    pub fn metadata(mut self, metadata: EditorMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Component + Default> ComponentDescriptor<T> {
    /// Use `T::default()` as the default value factory.
    pub fn with_default(mut self) -> Self {
        self.default_json = Some(default_json_of::<T>);
        self
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Maps component names, Rust types and IDs to [`ComponentType`]s.
///
/// All three lookups are hash-map backed. IDs grow monotonically for the
/// lifetime of the registry; [`reset`](Self::reset) starts over from zero.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    types: HashMap<ComponentTypeId, ComponentType>,
    by_name: HashMap<String, ComponentTypeId>,
    by_type: HashMap<TypeId, ComponentTypeId>,
    next_id: u32,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next unused ID.
    pub fn next_id(&mut self) -> ComponentTypeId {
        let id = ComponentTypeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a fully built type.
    ///
    /// IDs are normally handed out by the registry itself, so a collision
    /// means the caller is misusing it and is reported rather than ignored.
    pub fn register(&mut self, ty: ComponentType) -> Result<ComponentTypeId, EcsError> {
        if self.types.contains_key(&ty.id) {
            return Err(EcsError::DuplicateComponentId { id: ty.id.0 });
        }
        if self.by_name.contains_key(&ty.name) {
            return Err(EcsError::DuplicateComponentName {
                name: ty.name.clone(),
            });
        }
        let id = ty.id;
        self.next_id = self.next_id.max(id.0 + 1);
        self.by_type.entry(ty.type_id).or_insert(id);
        self.by_name.insert(ty.name.clone(), id);
        debug!(component = %ty.name, id = id.0, "registered component type");
        self.types.insert(id, ty);
        Ok(id)
    }

    /// Idempotent registration by name.
    ///
    /// An existing type with the same name is returned with its config,
    /// metadata and default factory replaced by whichever of them the
    /// descriptor carries, so re-evaluating registration code keeps IDs
    /// stable. Registering the same name for a different Rust type fails,
    /// and so does registering an already known Rust type under a new name:
    /// each name maps to exactly one id and each id to exactly one name.
    pub fn get_or_register<T: Component>(
        &mut self,
        descriptor: ComponentDescriptor<T>,
    ) -> Result<ComponentTypeId, EcsError> {
        if let Some(&id) = self.by_name.get(&descriptor.name) {
            let ty = self
                .types
                .get_mut(&id)
                .ok_or(EcsError::UnregisteredComponentId { id: id.0 })?;
            if ty.type_id != TypeId::of::<T>() {
                return Err(EcsError::ComponentTypeMismatch {
                    name: descriptor.name,
                    registered: ty.type_name,
                    requested: std::any::type_name::<T>(),
                });
            }
            if let Some(config) = descriptor.config {
                ty.config = config;
            }
            if let Some(metadata) = descriptor.metadata {
                ty.metadata = Some(metadata);
            }
            if descriptor.default_json.is_some() {
                ty.vtable.default_json = descriptor.default_json;
            }
            return Ok(id);
        }

        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            let existing = self.name_of(id).to_owned();
            warn!(
                requested = %descriptor.name,
                existing = %existing,
                "rust type already registered under another name"
            );
            return Err(EcsError::DuplicateComponentType {
                name: descriptor.name,
                existing,
                type_name: std::any::type_name::<T>(),
            });
        }

        let id = self.next_id();
        let mut ty = ComponentType::new::<T>(id, &descriptor.name);
        ty.vtable.default_json = descriptor.default_json;
        if let Some(config) = descriptor.config {
            ty.config = config;
        }
        ty.metadata = descriptor.metadata;
        self.register(ty)
    }

    /// Type registered under `id`.
    pub fn get(&self, id: ComponentTypeId) -> Option<&ComponentType> {
        self.types.get(&id)
    }

    /// Type registered under `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&ComponentType> {
        self.by_name.get(name).and_then(|id| self.types.get(id))
    }

    /// ID of the Rust type `T`, if registered.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn lookup_type_id(&self, type_id: TypeId) -> Option<ComponentTypeId> {
        self.by_type.get(&type_id).copied()
    }

    /// ID registered under `name`.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Name registered for `id`, or `"?"` for diagnostics on unknown IDs.
    pub fn name_of(&self, id: ComponentTypeId) -> &str {
        self.types.get(&id).map(|t| t.name.as_str()).unwrap_or("?")
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All registered names, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered types in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentType> {
        let mut types: Vec<&ComponentType> = self.types.values().collect();
        types.sort_by_key(|t| t.id);
        types.into_iter()
    }

    /// Forget every registration and restart IDs at zero.
    pub fn reset(&mut self) {
        self.types.clear();
        self.by_name.clear();
        self.by_type.clear();
        self.next_id = 0;
    }

    // -- editor browsing ----------------------------------------------------

    /// Types whose editor path is exactly `path`, sorted by name.
    ///
    /// Both `/` and `.` separate path segments. Types without editor
    /// metadata are not browsable.
    pub fn components_at_path(&self, path: &str) -> Vec<&ComponentType> {
        let wanted = split_path(path);
        let mut found: Vec<&ComponentType> = self
            .types
            .values()
            .filter(|t| t.path_segments().is_some_and(|segs| segs == wanted))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// The distinct next-level folder names below `path`, sorted.
    pub fn folders_at_path(&self, path: &str) -> Vec<String> {
        let prefix = split_path(path);
        let folders: BTreeSet<&str> = self
            .types
            .values()
            .filter_map(|t| {
                let segs = t.path_segments()?;
                (segs.len() > prefix.len() && segs[..prefix.len()] == prefix[..])
                    .then(|| segs[prefix.len()])
            })
            .collect();
        folders.into_iter().map(str::to_owned).collect()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split(|c| c == '/' || c == '.')
        .filter(|seg| !seg.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropertyConfig;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    fn browsable(reg: &mut ComponentRegistry, name: &str, path: &str) {
        let id = reg.next_id();
        reg.register(ComponentType::new::<Value>(id, name).with_metadata(EditorMetadata::at(path)))
            .unwrap();
    }

    #[test]
    fn get_or_register_is_idempotent() {
        let mut reg = ComponentRegistry::new();
        let first = reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        let second = reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn reregistering_updates_config_in_place() {
        let mut reg = ComponentRegistry::new();
        let id = reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        assert!(reg.get(id).unwrap().config().get("x").is_none());

        let updated = reg
            .get_or_register(
                ComponentDescriptor::<Pos>::new("Position")
                    .config(ComponentConfig::new().property("x", PropertyConfig::new().skip())),
            )
            .unwrap();

        assert_eq!(updated, id);
        assert_eq!(reg.len(), 1);
        assert!(!reg.get(id).unwrap().config().get("x").unwrap().serializable);
    }

    #[test]
    fn reregistering_without_config_keeps_old_config() {
        let mut reg = ComponentRegistry::new();
        let id = reg
            .get_or_register(ComponentDescriptor::<Pos>::new("Position").config(ComponentConfig::transient()))
            .unwrap();
        reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        assert!(!reg.get(id).unwrap().config().serializable);
    }

    #[test]
    fn same_name_different_type_is_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        let err = reg
            .get_or_register(ComponentDescriptor::<Vel>::new("Position"))
            .unwrap_err();
        assert!(matches!(err, EcsError::ComponentTypeMismatch { .. }));
    }

    #[test]
    fn same_type_under_second_name_is_rejected() {
        let mut reg = ComponentRegistry::new();
        let a = reg.get_or_register(ComponentDescriptor::<Pos>::new("A")).unwrap();
        let err = reg.get_or_register(ComponentDescriptor::<Pos>::new("B")).unwrap_err();
        assert!(matches!(
            err,
            EcsError::DuplicateComponentType { ref name, ref existing, .. } if name == "B" && existing == "A"
        ));
        assert_eq!(reg.lookup_by_name("A"), Some(a));
        assert_eq!(reg.lookup_by_name("B"), None);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let mut reg = ComponentRegistry::new();
        let id = reg.next_id();
        reg.register(ComponentType::new::<Pos>(id, "Position")).unwrap();
        let err = reg.register(ComponentType::new::<Vel>(id, "Velocity")).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentId { .. }));
    }

    #[test]
    fn explicit_ids_advance_the_counter() {
        let mut reg = ComponentRegistry::new();
        reg.register(ComponentType::new::<Pos>(ComponentTypeId::new(10), "Position"))
            .unwrap();
        assert_eq!(reg.next_id(), ComponentTypeId::new(11));
    }

    #[test]
    fn lookups_agree() {
        let mut reg = ComponentRegistry::new();
        let p = reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        let v = reg.get_or_register(ComponentDescriptor::<Vel>::new("Velocity")).unwrap();
        assert_ne!(p, v);
        assert_eq!(reg.lookup::<Pos>(), Some(p));
        assert_eq!(reg.lookup_by_name("Velocity"), Some(v));
        assert_eq!(reg.get_by_name("Position").unwrap().id(), p);
        assert_eq!(reg.registered_names(), vec!["Position", "Velocity"]);
    }

    #[test]
    fn reset_restarts_ids() {
        let mut reg = ComponentRegistry::new();
        reg.get_or_register(ComponentDescriptor::<Pos>::new("Position")).unwrap();
        reg.reset();
        assert!(reg.is_empty());
        let id = reg.get_or_register(ComponentDescriptor::<Vel>::new("Velocity")).unwrap();
        assert_eq!(id, ComponentTypeId::new(0));
    }

    #[test]
    fn default_factory_and_json_roundtrip() {
        let mut reg = ComponentRegistry::new();
        let id = reg
            .get_or_register(ComponentDescriptor::<Pos>::new("Position").with_default())
            .unwrap();
        let ty = reg.get(id).unwrap();
        assert_eq!(ty.default_json(), Some(serde_json::json!({"x": 0.0, "y": 0.0})));

        let boxed = ty.from_json(serde_json::json!({"x": 1.0, "y": 2.0})).unwrap();
        assert_eq!(boxed.downcast_ref::<Pos>(), Some(&Pos { x: 1.0, y: 2.0 }));
        assert_eq!(
            ty.to_json(&*boxed).unwrap(),
            serde_json::json!({"x": 1.0, "y": 2.0})
        );
        assert!(ty.from_json(serde_json::json!("nope")).is_err());
    }

    #[test]
    fn components_at_path_is_exact_match() {
        let mut reg = ComponentRegistry::new();
        browsable(&mut reg, "Sprite", "Rendering/2D");
        browsable(&mut reg, "Mesh", "Rendering.3D");
        browsable(&mut reg, "Camera", "Rendering");
        browsable(&mut reg, "Rigidbody", "Physics");

        let names: Vec<_> = reg
            .components_at_path("Rendering")
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["Camera"]);

        let names: Vec<_> = reg
            .components_at_path("Rendering/3D")
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["Mesh"]);
    }

    #[test]
    fn folders_at_path_are_deduplicated_and_sorted() {
        let mut reg = ComponentRegistry::new();
        browsable(&mut reg, "Sprite", "Rendering/2D");
        browsable(&mut reg, "Tilemap", "Rendering/2D/Tiles");
        browsable(&mut reg, "Mesh", "Rendering.3D");
        browsable(&mut reg, "Rigidbody", "Physics");

        assert_eq!(reg.folders_at_path(""), vec!["Physics", "Rendering"]);
        assert_eq!(reg.folders_at_path("Rendering"), vec!["2D", "3D"]);
        assert_eq!(reg.folders_at_path("Rendering.2D"), vec!["Tiles"]);
        assert!(reg.folders_at_path("Physics").is_empty());
    }
}
