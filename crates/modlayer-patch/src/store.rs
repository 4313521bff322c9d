//! Patch state stores

use crate::state::PatchState;
use crate::{Error, Result};
use modlayer_hub::{EngineConfig, StateFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Loads and saves a collection's [`PatchState`]
pub trait PatchStateStore: Send + Sync {
    /// Load the state of `collection`, `None` if nothing was saved yet
    fn load(&self, collection: &str) -> Result<Option<PatchState>>;

    /// Persist the state of `collection`, replacing any previous state
    fn save(&self, collection: &str, state: &PatchState) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, PatchState>>,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (for exercising retry paths)
    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    /// Store `state` directly, bypassing failure injection
    pub fn insert(&self, collection: &str, state: PatchState) -> Result<()> {
        self.states
            .lock()
            .map_err(|e| Error::Store(e.to_string()))?
            .insert(collection.to_string(), state);
        Ok(())
    }
}

impl PatchStateStore for MemoryStateStore {
    fn load(&self, collection: &str) -> Result<Option<PatchState>> {
        let states = self.states.lock().map_err(|e| Error::Store(e.to_string()))?;
        Ok(states.get(collection).cloned())
    }

    fn save(&self, collection: &str, state: &PatchState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Store(format!("save of {:?} rejected", collection)));
        }
        self.insert(collection, state.clone())
    }
}

/// Store writing one state file per collection under a root directory
///
/// The state of a collection lives at `<root>/<patch mod name>/state.<ext>`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
    config: EngineConfig,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> StateFormat {
        self.config.state_format
    }

    /// Path of the state file for `collection`
    pub fn state_path(&self, collection: &str) -> PathBuf {
        self.root
            .join(self.config.patch_mod_name(collection))
            .join(format!("state.{}", self.format().extension()))
    }
}

impl PatchStateStore for FileStateStore {
    fn load(&self, collection: &str) -> Result<Option<PatchState>> {
        let path = self.state_path(collection);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        PatchState::from_str_as(&text, self.format()).map(Some)
    }

    fn save(&self, collection: &str, state: &PatchState) -> Result<()> {
        let path = self.state_path(collection);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = state.to_string_as(self.format())?;
        // write then rename so a failed write never truncates the previous state
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(collection, path = %path.display(), "saved patch state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlayer_core::{Definition, IndexedDefinitions};

    fn state() -> PatchState {
        PatchState {
            load_order: vec!["m1".to_string()],
            conflicts: IndexedDefinitions::new(vec![Definition::new(
                "events/a.txt",
                "events",
                "a",
                "m1",
                "a = {}",
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        assert!(store.load("col").unwrap().is_none());

        store.save("col", &state()).unwrap();
        assert_eq!(store.load("col").unwrap(), Some(state()));

        store.set_failing(true);
        assert!(matches!(store.save("col", &state()), Err(Error::Store(_))));
        store.set_failing(false);
        assert!(store.save("col", &state()).is_ok());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), EngineConfig::default());
        assert!(store.load("My Collection").unwrap().is_none());

        store.save("My Collection", &state()).unwrap();
        let path = store.state_path("My Collection");
        assert!(path.ends_with("modlayer_patch_My Collection/state.ron"));
        assert!(path.exists());
        assert_eq!(store.load("My Collection").unwrap(), Some(state()));
    }

    #[test]
    fn test_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), EngineConfig::default());
        store.save("c", &state()).unwrap();

        let mut updated = state();
        updated.load_order.push("m2".to_string());
        store.save("c", &updated).unwrap();
        assert_eq!(store.load("c").unwrap().unwrap().load_order, vec!["m1", "m2"]);
    }

    #[test]
    fn test_file_store_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), EngineConfig::default());
        let path = store.state_path("c");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "definitely not ron (").unwrap();
        assert!(matches!(store.load("c"), Err(Error::Serialization(_))));
    }
}
