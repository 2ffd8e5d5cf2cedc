//! VoidScript scenes -- prefab and scene assets built on `voidscript-ecs`.
//!
//! A save turns the subgraph below some root entities into a JSON document
//! whose entities are numbered sequentially and mapped to stable UUIDs. A
//! load spawns fresh entities, renumbers entity references back to runtime
//! handles and reports anything it had to skip instead of failing.
//!
//! # Quick Start
//!
//! ```
//! use voidscript_scene::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//!
//! let mut world = World::new();
//! world.register_component::<Health>("Health");
//! let root = world.spawn_with(Health(10)).unwrap();
//! let child = world.spawn_with(Health(5)).unwrap();
//! world.add_child(root, child).unwrap();
//!
//! let mut serializer = SceneSerializer::new(UuidSource::Seeded(1));
//! let prefab = serializer.save_prefab(&mut world, root, SaveOptions::default()).unwrap();
//! assert_eq!(prefab.metadata.entity_count, 2);
//!
//! let copy = serializer.instantiate_prefab(&mut world, &prefab).unwrap();
//! let new_root = copy.root().unwrap();
//! assert_eq!(world.children(new_root).len(), 1);
//! assert!(copy.is_complete());
//! ```

#![deny(unsafe_code)]

pub mod components;
pub mod format;
pub mod io;
pub mod serializer;
pub mod uuid_source;

use uuid::Uuid;
use voidscript_ecs::config::CodecError;
use voidscript_ecs::entity::Entity;
use voidscript_ecs::EcsError;

use crate::format::AssetKind;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by saving, loading and asset I/O.
///
/// Problems confined to one component or property during a load are not
/// errors; they are reported in [`LoadOutcome::skipped`](serializer::LoadOutcome::skipped).
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// An ECS operation failed during save or load.
    #[error(transparent)]
    Ecs(#[from] EcsError),

    /// The document text is not valid JSON or does not fit the asset schema.
    #[error("malformed scene JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but its contents are unusable.
    #[error("malformed asset document: {details}")]
    Malformed { details: String },

    /// The document was written by a newer format version.
    #[error("asset format version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// A scene was read where a prefab was expected, or the reverse.
    #[error("expected a {expected} asset, found a {found}")]
    AssetKindMismatch { expected: AssetKind, found: AssetKind },

    /// A save was asked for with an empty root list.
    #[error("nothing to save: no root entities given")]
    NoRoots,

    /// A root was dead or otherwise left out of the walk.
    #[error("root {entity} was not serialized")]
    RootNotSerialized { entity: Entity },

    /// A declared root UUID has no entity in the document.
    #[error("root uuid {uuid} is not in the entity id map")]
    UnknownRootUuid { uuid: Uuid },

    /// Two serialized entities share a document ID.
    #[error("entity id {id} appears more than once")]
    DuplicateEntityId { id: u32 },

    /// A walked entity had no serialization tag, so its UUID is unknown.
    #[error("serialized entity #{id} lost its serialization marker")]
    MarkerMissing { id: u32 },

    /// A property codec rejected a value while saving.
    #[error("failed to encode {component}.{property}: {source}")]
    PropertyEncode {
        component: String,
        property: String,
        source: CodecError,
    },

    /// Reading or writing an asset file failed.
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The asset file does not exist.
    #[error("file '{path}' does not exist")]
    FileNotFound { path: String },

    /// No asset with this GUID is known to the library.
    #[error("asset {guid} is not registered")]
    UnknownAsset { guid: Uuid },

    /// The asset has no path, so the library cannot write it.
    #[error("asset {guid} has no path to save to")]
    NoAssetPath { guid: Uuid },

    /// Following nested assets leads back to this one.
    #[error("asset {guid} nests itself")]
    AssetCycle { guid: Uuid },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports, including the ECS prelude.
pub mod prelude {
    pub use voidscript_ecs::prelude::*;

    pub use crate::components::{
        register_scene_components, unload_scene, PrefabInstance, SceneMember, SerializationTag,
        StableId,
    };
    pub use crate::format::{
        AssetKind, AssetMetadata, PrefabAsset, PrefabBlock, SceneAsset, SceneBlock,
        SerializedComponent, SerializedEntity, SerializedWorld, FORMAT_VERSION,
    };
    pub use crate::io::{
        AssetLibrary, AssetResolver, AssetState, FileSystem, MemoryFileSystem, StdFileSystem,
    };
    pub use crate::serializer::{LoadOutcome, SaveOptions, SceneSerializer, SkipReason, SkippedItem};
    pub use crate::uuid_source::{UuidMinter, UuidSource};
    pub use crate::SceneError;
}
