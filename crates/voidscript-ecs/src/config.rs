//! Per-component serialization configuration.
//!
//! A [`ComponentConfig`] tells the scene serializer which components are
//! persisted at all, and for each property of a persisted component whether
//! it is written, how it is encoded, what happens to `null`, and whether it
//! holds entity handles that must be renumbered.
//!
//! Properties are the top-level keys of a component's JSON object form.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Error returned by a [`PropertyCodec`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Custom encoding for one property, applied between the component's native
/// serde form and the on-disk form.
///
/// Codecs are never called with `Value::Null`; null handling is governed by
/// the property's [`NullPolicy`].
pub trait PropertyCodec: Send + Sync {
    /// Native form -> persisted form.
    fn encode(&self, value: &Value) -> Result<Value, CodecError>;
    /// Persisted form -> native form.
    fn decode(&self, value: &Value) -> Result<Value, CodecError>;
}

/// What to do with a property whose value is `null` (or becomes `null`
/// because an entity reference could not be resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullPolicy {
    /// Keep the `null` as a placeholder.
    #[default]
    Preserve,
    /// Drop the key so the component default fills it on load.
    Omit,
}

/// Shape of an entity-handle property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRefKind {
    /// A single handle (or `null`).
    Single,
    /// An array of handles.
    List,
}

// ---------------------------------------------------------------------------
// PropertyConfig
// ---------------------------------------------------------------------------

/// Serialization rules for one property.
#[derive(Clone)]
pub struct PropertyConfig {
    pub serializable: bool,
    /// Applied to non-null values on save (encode) and load (decode).
    pub codec: Option<Arc<dyn PropertyCodec>>,
    /// What a `null` value turns into on save and load.
    pub null_policy: NullPolicy,
    /// Set when the property holds entity handles to renumber.
    pub entity_ref: Option<EntityRefKind>,
}

impl PropertyConfig {
    pub fn new() -> Self {
        Self {
            serializable: true,
            codec: None,
            null_policy: NullPolicy::Preserve,
            entity_ref: None,
        }
    }

    /// Never write this property.
    pub fn skip(mut self) -> Self {
        self.serializable = false;
        self
    }

    /// Encode and decode this property with `codec`.
    pub fn codec(mut self, codec: impl PropertyCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Set what happens to `null` values.
    pub fn null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// The property holds one entity handle.
    pub fn entity_ref(mut self) -> Self {
        self.entity_ref = Some(EntityRefKind::Single);
        self
    }

    /// The property holds an array of entity handles.
    pub fn entity_ref_list(mut self) -> Self {
        self.entity_ref = Some(EntityRefKind::List);
        self
    }
}

impl Default for PropertyConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PropertyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyConfig")
            .field("serializable", &self.serializable)
            .field("codec", &self.codec.is_some())
            .field("null_policy", &self.null_policy)
            .field("entity_ref", &self.entity_ref)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentConfig
// ---------------------------------------------------------------------------

/// Serialization settings for a component type.
///
/// Properties without an entry use [`PropertyConfig::default`]: written
/// as-is, `null` preserved.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub serializable: bool,
    /// Per-property rules, by top-level JSON key.
    pub properties: BTreeMap<String, PropertyConfig>,
}

impl ComponentConfig {
    pub fn new() -> Self {
        Self {
            serializable: true,
            properties: BTreeMap::new(),
        }
    }

    /// A component that lives only at runtime and is never saved.
    pub fn transient() -> Self {
        Self {
            serializable: false,
            properties: BTreeMap::new(),
        }
    }

    /// Set the rules for property `name`.
    pub fn property(mut self, name: &str, config: PropertyConfig) -> Self {
        self.properties.insert(name.to_owned(), config);
        self
    }

    /// Config for `name`, if one was declared.
    pub fn get(&self, name: &str) -> Option<&PropertyConfig> {
        self.properties.get(name)
    }

    /// Properties declared as entity handles.
    pub fn entity_refs(&self) -> impl Iterator<Item = (&str, EntityRefKind)> {
        self.properties
            .iter()
            .filter_map(|(name, cfg)| cfg.entity_ref.map(|kind| (name.as_str(), kind)))
    }
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self::new()
    }
}
