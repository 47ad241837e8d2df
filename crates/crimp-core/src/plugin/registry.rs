use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::plugin::{builtin_plugins, Algorithm, AlgorithmMetadata, RegisteredAlgorithm};
use crate::Result;

/// Thread-safe mapping from magic number to registered algorithm.
///
/// Lookups take a read lock; [`init`](Self::init) swaps the whole table
/// under the write lock, so re-initialization is safe while other threads
/// keep resolving algorithms.
pub struct PluginRegistry {
    entries: RwLock<HashMap<[u8; 4], RegisteredAlgorithm>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Clears the registry and registers `plugins` in order.
    ///
    /// Plugins with invalid metadata are skipped with a warning. When two
    /// plugins declare the same magic number or name, the first registration
    /// wins and the collision is logged.
    pub fn init(&self, plugins: Vec<Arc<dyn Algorithm>>) {
        let mut entries: HashMap<[u8; 4], RegisteredAlgorithm> =
            HashMap::with_capacity(plugins.len());
        let mut names: HashSet<String> = HashSet::with_capacity(plugins.len());

        for algorithm in plugins {
            let metadata = algorithm.metadata();
            if let Err(reason) = metadata.validate() {
                tracing::warn!(name = %metadata.name, reason, "skipping plugin with invalid metadata");
                continue;
            }
            if !names.insert(metadata.name.clone()) {
                tracing::warn!(name = %metadata.name, "duplicate plugin name, keeping first registration");
                continue;
            }
            match entries.entry(metadata.magic) {
                Entry::Occupied(existing) => {
                    tracing::warn!(
                        magic = ?metadata.magic,
                        kept = %existing.get().metadata.name,
                        rejected = %metadata.name,
                        "duplicate magic number, keeping first registration"
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(RegisteredAlgorithm {
                        metadata,
                        algorithm,
                    });
                }
            }
        }

        let count = entries.len();
        *self.write() = entries;
        tracing::debug!(count, "plugin registry initialized");
    }

    /// Registered metadata ordered by algorithm name.
    pub fn list(&self) -> Vec<AlgorithmMetadata> {
        let mut all: Vec<AlgorithmMetadata> = self
            .read()
            .values()
            .map(|entry| entry.metadata.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All registered algorithms ordered by name.
    pub fn snapshot(&self) -> Vec<RegisteredAlgorithm> {
        let mut all: Vec<RegisteredAlgorithm> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        all
    }

    pub fn lookup(&self, magic: [u8; 4]) -> Option<RegisteredAlgorithm> {
        self.read().get(&magic).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<RegisteredAlgorithm> {
        self.read()
            .values()
            .find(|entry| entry.metadata.name == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<[u8; 4], RegisteredAlgorithm>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<[u8; 4], RegisteredAlgorithm>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<PluginRegistry>> = OnceLock::new();

/// Process-wide registry shared by [`Engine::new`](crate::Engine::new).
pub fn global() -> Arc<PluginRegistry> {
    Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(PluginRegistry::new())))
}

/// Populates the global registry with the built-in algorithms. Re-entrant:
/// a later call rescans and replaces the table.
pub fn init_plugins() -> Result<()> {
    global().init(builtin_plugins());
    Ok(())
}

/// Metadata of every globally registered algorithm, ordered by name.
pub fn list_plugins() -> Vec<AlgorithmMetadata> {
    global().list()
}
