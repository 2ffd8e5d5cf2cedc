//! File access and the asset library.
//!
//! The serializer never touches the file system. [`AssetLibrary`] maps asset
//! GUIDs to paths on a [`FileSystem`], parses documents on demand and tracks
//! a per-GUID [`AssetState`] that frame code can poll.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;
use voidscript_ecs::world::World;

use crate::format::{peek_kind, AssetKind, PrefabAsset, SceneAsset};
use crate::serializer::{LoadOutcome, SceneSerializer};
use crate::SceneError;

// ---------------------------------------------------------------------------
// FileSystem
// ---------------------------------------------------------------------------

/// Text file access used by the asset library.
pub trait FileSystem {
    fn read_text_file(&self, path: &str) -> Result<String, SceneError>;
    fn write_text_file(&mut self, path: &str, contents: &str) -> Result<(), SceneError>;
    fn exists(&self, path: &str) -> bool;
}

/// [`FileSystem`] over the real disk. Relative paths resolve against `root`.
#[derive(Debug, Clone)]
pub struct StdFileSystem {
    root: PathBuf,
}

impl StdFileSystem {
    /// File system rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileSystem for StdFileSystem {
    fn read_text_file(&self, path: &str) -> Result<String, SceneError> {
        std::fs::read_to_string(self.resolve(path)).map_err(|source| SceneError::Io {
            path: path.to_owned(),
            source,
        })
    }

    fn write_text_file(&mut self, path: &str, contents: &str) -> Result<(), SceneError> {
        let full = self.resolve(path);
        let io_err = |source| SceneError::Io {
            path: path.to_owned(),
            source,
        };
        if let Some(dir) = full.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        std::fs::write(&full, contents).map_err(io_err)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
}

/// In-memory [`FileSystem`] for tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, String>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seed of one file.
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_owned(), contents.to_owned());
        self
    }

    /// Every stored path, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_text_file(&self, path: &str) -> Result<String, SceneError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| SceneError::FileNotFound { path: path.to_owned() })
    }

    fn write_text_file(&mut self, path: &str, contents: &str) -> Result<(), SceneError> {
        self.files.insert(path.to_owned(), contents.to_owned());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

// ---------------------------------------------------------------------------
// AssetResolver
// ---------------------------------------------------------------------------

/// Resolves an asset GUID to its parsed JSON document.
pub trait AssetResolver {
    /// Read and parse the document registered for `guid`.
    fn resolve(&self, guid: Uuid) -> Result<Value, SceneError>;
}

// ---------------------------------------------------------------------------
// AssetLibrary
// ---------------------------------------------------------------------------

/// Load state of one asset, for polling from frame code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    /// Known but not loaded yet.
    Pending,
    Loaded,
    Failed,
}

/// GUID -> path registry over a [`FileSystem`].
#[derive(Debug)]
pub struct AssetLibrary<F: FileSystem> {
    fs: F,
    paths: BTreeMap<Uuid, String>,
    states: HashMap<Uuid, AssetState>,
}

impl<F: FileSystem> AssetLibrary<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            paths: BTreeMap::new(),
            states: HashMap::new(),
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    /// Record where `guid` lives. The asset starts out [`AssetState::Pending`].
    pub fn register(&mut self, guid: Uuid, path: impl Into<String>) {
        let path = path.into();
        debug!(guid = %guid, path = %path, "asset registered");
        self.paths.insert(guid, path);
        self.states.insert(guid, AssetState::Pending);
    }

    /// Registered path of `guid`.
    pub fn path_of(&self, guid: Uuid) -> Option<&str> {
        self.paths.get(&guid).map(String::as_str)
    }

    /// `None` for GUIDs that were never registered.
    pub fn state(&self, guid: Uuid) -> Option<AssetState> {
        self.states.get(&guid).copied()
    }

    pub fn contains(&self, guid: Uuid) -> bool {
        self.paths.contains_key(&guid)
    }

    /// Read and parse the scene `guid`, updating its [`AssetState`].
    ///
    /// Fails with [`SceneError::UnknownAsset`] if `guid` was never registered.
    pub fn load_scene(&mut self, guid: Uuid) -> Result<SceneAsset, SceneError> {
        let result = self.read(guid).and_then(SceneAsset::from_value);
        self.track(guid, result)
    }

    /// Prefab counterpart of [`load_scene`](Self::load_scene).
    pub fn load_prefab(&mut self, guid: Uuid) -> Result<PrefabAsset, SceneError> {
        let result = self.read(guid).and_then(PrefabAsset::from_value);
        self.track(guid, result)
    }

    /// Write `asset` to its metadata path, or to the path already registered
    /// for its GUID.
    pub fn save_scene(&mut self, asset: &SceneAsset) -> Result<(), SceneError> {
        let text = asset.to_json_string()?;
        self.write(asset.metadata.guid, asset.metadata.path.as_deref(), &text)
    }

    /// See [`save_scene`](Self::save_scene).
    pub fn save_prefab(&mut self, asset: &PrefabAsset) -> Result<(), SceneError> {
        let text = asset.to_json_string()?;
        self.write(asset.metadata.guid, asset.metadata.path.as_deref(), &text)
    }

    /// Load the prefab `guid` and spawn an instance of it.
    pub fn instantiate_prefab_by_guid(
        &mut self,
        serializer: &mut SceneSerializer,
        world: &mut World,
        guid: Uuid,
    ) -> Result<LoadOutcome, SceneError> {
        let asset = self.load_prefab(guid)?;
        serializer.instantiate_prefab(world, &asset)
    }

    /// Every asset nested (transitively) inside `guid`, dependencies before
    /// the assets that contain them. `guid` itself is not included.
    pub fn dependencies(&self, guid: Uuid) -> Result<Vec<Uuid>, SceneError> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut in_progress = HashSet::new();
        self.visit_dependencies(guid, &mut in_progress, &mut done, &mut order)?;
        order.retain(|g| *g != guid);
        Ok(order)
    }

    fn visit_dependencies(
        &self,
        guid: Uuid,
        in_progress: &mut HashSet<Uuid>,
        done: &mut HashSet<Uuid>,
        order: &mut Vec<Uuid>,
    ) -> Result<(), SceneError> {
        if done.contains(&guid) {
            return Ok(());
        }
        if !in_progress.insert(guid) {
            return Err(SceneError::AssetCycle { guid });
        }
        let document = self.resolve(guid)?;
        for nested in nested_guids(&document) {
            self.visit_dependencies(nested, in_progress, done, order)?;
        }
        in_progress.remove(&guid);
        done.insert(guid);
        order.push(guid);
        Ok(())
    }

    fn read(&self, guid: Uuid) -> Result<Value, SceneError> {
        let path = self.path_of(guid).ok_or(SceneError::UnknownAsset { guid })?;
        let text = self.fs.read_text_file(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write(&mut self, guid: Uuid, path: Option<&str>, text: &str) -> Result<(), SceneError> {
        let path = match path.or_else(|| self.path_of(guid)) {
            Some(p) => p.to_owned(),
            None => return Err(SceneError::NoAssetPath { guid }),
        };
        self.fs.write_text_file(&path, text)?;
        self.paths.insert(guid, path);
        self.states.insert(guid, AssetState::Loaded);
        Ok(())
    }

    fn track<T>(&mut self, guid: Uuid, result: Result<T, SceneError>) -> Result<T, SceneError> {
        let state = match &result {
            Ok(_) => AssetState::Loaded,
            Err(e) => {
                warn!(guid = %guid, error = %e, "asset failed to load");
                AssetState::Failed
            }
        };
        if self.paths.contains_key(&guid) {
            self.states.insert(guid, state);
        }
        result
    }
}

impl<F: FileSystem> AssetResolver for AssetLibrary<F> {
    fn resolve(&self, guid: Uuid) -> Result<Value, SceneError> {
        self.read(guid)
    }
}

fn nested_guids(document: &Value) -> Vec<Uuid> {
    let Some(metadata) = document.get("metadata") else {
        return Vec::new();
    };
    ["nestedScenes", "nestedPrefabs"]
        .iter()
        .filter_map(|key| metadata.get(*key))
        .filter_map(|list| serde_json::from_value::<Vec<Uuid>>(list.clone()).ok())
        .flatten()
        .collect()
}

/// Kind of the document stored for `guid`, without a full parse.
pub fn asset_kind(resolver: &impl AssetResolver, guid: Uuid) -> Result<Option<AssetKind>, SceneError> {
    Ok(peek_kind(&resolver.resolve(guid)?))
}
