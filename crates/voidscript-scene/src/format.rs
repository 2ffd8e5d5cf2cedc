//! On-disk scene and prefab documents.
//!
//! Both asset kinds share the same layout: a format `version`, a `metadata`
//! block, the serialized `world`, and one kind-specific block that maps
//! sequential entity IDs to stable UUIDs and names the roots. Keys are
//! camelCase.
//!
//! ```json
//! {
//!   "version": 1,
//!   "metadata": { "guid": "...", "path": null, "type": "prefab", "entityCount": 2,
//!                 "componentTypes": ["Children", "Parent"], "nestedScenes": [], "nestedPrefabs": [] },
//!   "world": { "entities": [ { "id": 0, "components": [ { "typeName": "Children", "data": { "entities": [1] } } ] } ] },
//!   "prefab": { "entityIdMap": { "0": "...", "1": "..." }, "rootEntityId": "..." }
//! }
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::SceneError;

/// Highest document version this crate reads and the version it writes.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Which of the two document shapes an asset is. Written as the metadata
/// `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Scene,
    Prefab,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Scene => f.write_str("scene"),
            AssetKind::Prefab => f.write_str("prefab"),
        }
    }
}

/// Header shared by scene and prefab documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    /// Identity of the asset itself, stable across saves.
    pub guid: Uuid,
    /// Where the asset was saved, relative to the asset root.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    /// Number of entries in `world.entities`.
    pub entity_count: usize,
    /// Sorted, de-duplicated names of every component type in `world`.
    #[serde(default)]
    pub component_types: Vec<String>,
    /// Scenes whose members were inlined into this document.
    #[serde(default)]
    pub nested_scenes: Vec<Uuid>,
    /// Prefabs whose instances were inlined into this document.
    #[serde(default)]
    pub nested_prefabs: Vec<Uuid>,
}

impl AssetMetadata {
    /// Every nested asset GUID, scenes first.
    pub fn nested_assets(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.nested_scenes
            .iter()
            .chain(self.nested_prefabs.iter())
            .copied()
    }
}

// ---------------------------------------------------------------------------
// World payload
// ---------------------------------------------------------------------------

/// One component of a serialized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedComponent {
    /// Registered component name.
    pub type_name: String,
    /// The component's JSON form after codecs and entity renumbering.
    pub data: Value,
}

/// One entity of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEntity {
    /// Sequential position in the document, not a runtime handle.
    pub id: u32,
    pub components: Vec<SerializedComponent>,
}

impl SerializedEntity {
    /// Stored data of the component named `type_name`, if present.
    pub fn component(&self, type_name: &str) -> Option<&Value> {
        self.components
            .iter()
            .find(|c| c.type_name == type_name)
            .map(|c| &c.data)
    }
}

/// The entity payload of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedWorld {
    /// In storage order at save time; IDs count up from 0.
    pub entities: Vec<SerializedEntity>,
}

impl SerializedWorld {
    /// Entity with document ID `id`.
    pub fn entity(&self, id: u32) -> Option<&SerializedEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

// ---------------------------------------------------------------------------
// Kind-specific blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneBlock {
    /// Document ID -> stable UUID, for every entity.
    pub entity_id_map: BTreeMap<u32, Uuid>,
    /// UUIDs of the saved roots in the order given, duplicates dropped.
    pub root_entity_local_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefabBlock {
    /// Document ID -> stable UUID, for every entity.
    pub entity_id_map: BTreeMap<u32, Uuid>,
    /// UUID of the single prefab root.
    pub root_entity_id: Uuid,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A saved scene: any number of roots, loaded as scene members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAsset {
    /// Format version the document was written with.
    pub version: u32,
    pub metadata: AssetMetadata,
    pub world: SerializedWorld,
    pub scene: SceneBlock,
}

/// A saved prefab: one root, instantiated any number of times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefabAsset {
    /// Format version the document was written with.
    pub version: u32,
    pub metadata: AssetMetadata,
    pub world: SerializedWorld,
    pub prefab: PrefabBlock,
}

impl SceneAsset {
    /// Parse a document, checking its version and kind.
    pub fn from_json_str(text: &str) -> Result<Self, SceneError> {
        parse_document(text, AssetKind::Scene)
    }

    /// Like [`from_json_str`](Self::from_json_str), from parsed JSON.
    pub fn from_value(value: Value) -> Result<Self, SceneError> {
        parse_value(value, AssetKind::Scene)
    }

    /// Pretty-printed JSON text.
    pub fn to_json_string(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl PrefabAsset {
    /// Parse a document, checking its version and kind.
    pub fn from_json_str(text: &str) -> Result<Self, SceneError> {
        parse_document(text, AssetKind::Prefab)
    }

    /// Like [`from_json_str`](Self::from_json_str), from parsed JSON.
    pub fn from_value(value: Value) -> Result<Self, SceneError> {
        parse_value(value, AssetKind::Prefab)
    }

    /// Pretty-printed JSON text.
    pub fn to_json_string(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Reject documents newer than [`FORMAT_VERSION`].
pub fn check_version(version: u32) -> Result<(), SceneError> {
    if version > FORMAT_VERSION {
        return Err(SceneError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// Read only the `metadata.type` of a document.
pub fn peek_kind(value: &Value) -> Option<AssetKind> {
    let kind = value.get("metadata")?.get("type")?.clone();
    serde_json::from_value(kind).ok()
}

fn parse_document<T: DeserializeOwned>(text: &str, expected: AssetKind) -> Result<T, SceneError> {
    let value: Value = serde_json::from_str(text)?;
    parse_value(value, expected)
}

// The version and kind are checked on the raw value first, so a newer
// document fails with a version error rather than a shape error.
fn parse_value<T: DeserializeOwned>(value: Value, expected: AssetKind) -> Result<T, SceneError> {
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| SceneError::Malformed {
            details: "missing numeric `version`".into(),
        })?;
    check_version(u32::try_from(version).unwrap_or(u32::MAX))?;
    if let Some(found) = peek_kind(&value) {
        if found != expected {
            return Err(SceneError::AssetKindMismatch { expected, found });
        }
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_prefab(version: u32) -> Value {
        let guid = Uuid::nil();
        json!({
            "version": version,
            "metadata": {
                "guid": guid,
                "type": "prefab",
                "entityCount": 1,
                "componentTypes": [],
            },
            "world": { "entities": [ { "id": 0, "components": [] } ] },
            "prefab": { "entityIdMap": { "0": guid }, "rootEntityId": guid },
        })
    }

    #[test]
    fn keys_are_camel_case() {
        let asset = PrefabAsset::from_value(minimal_prefab(1)).unwrap();
        let text = asset.to_json_string().unwrap();
        for key in ["entityCount", "componentTypes", "nestedPrefabs", "entityIdMap", "rootEntityId"] {
            assert!(text.contains(key), "missing {key}");
        }
        assert!(text.contains("\"type\": \"prefab\""));
    }

    #[test]
    fn entity_id_map_keys_round_trip_as_strings() {
        let asset = PrefabAsset::from_value(minimal_prefab(1)).unwrap();
        assert_eq!(asset.prefab.entity_id_map.get(&0), Some(&Uuid::nil()));
        let back: Value = serde_json::from_str(&asset.to_json_string().unwrap()).unwrap();
        assert!(back["prefab"]["entityIdMap"].get("0").is_some());
    }

    #[test]
    fn newer_versions_are_rejected() {
        let err = PrefabAsset::from_value(minimal_prefab(FORMAT_VERSION + 1)).unwrap_err();
        assert!(matches!(err, SceneError::UnsupportedVersion { found: 2, supported: 1 }));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let err = SceneAsset::from_value(minimal_prefab(1)).unwrap_err();
        assert!(matches!(
            err,
            SceneError::AssetKindMismatch {
                expected: AssetKind::Scene,
                found: AssetKind::Prefab
            }
        ));
    }

    #[test]
    fn malformed_text_is_a_json_error() {
        assert!(matches!(
            SceneAsset::from_json_str("{ not json"),
            Err(SceneError::Json(_))
        ));
        assert!(matches!(
            SceneAsset::from_json_str("{}"),
            Err(SceneError::Malformed { .. })
        ));
    }
}
