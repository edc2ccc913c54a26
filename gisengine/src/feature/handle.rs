//! Atomic publication of dataset versions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::dataset::{Dataset, DatasetId};
use crate::codec::ImportedCollection;
use crate::crs::CrsId;
use crate::error::{EngineError, Result};
use crate::geometry::Tolerance;
use crate::validation::{EditPolicy, IssueKind};

/// The current version of one dataset.
///
/// # Thread Safety
///
/// - Readers take a snapshot (`Arc<Dataset>`) and keep a consistent view for
///   as long as they hold it, regardless of later edits.
/// - Writers are serialised; each edit is computed from the latest version
///   outside the read lock and then swapped in atomically.
#[derive(Debug)]
pub struct DatasetHandle {
    current: RwLock<Arc<Dataset>>,
    writer: Mutex<()>,
    prebuild_index: bool,
}

impl DatasetHandle {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            current: RwLock::new(Arc::new(dataset)),
            writer: Mutex::new(()),
            prebuild_index: false,
        }
    }

    /// Build the spatial index of every published version in the background.
    pub fn with_index_prebuild(mut self, enabled: bool) -> Self {
        self.prebuild_index = enabled;
        if enabled {
            spawn_index_build(self.snapshot());
        }
        self
    }

    /// Latest published version.
    pub fn snapshot(&self) -> Arc<Dataset> {
        Arc::clone(&self.current.read())
    }

    pub fn id(&self) -> DatasetId {
        self.current.read().id()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    /// Apply an edit to the latest version and publish the result.
    ///
    /// `edit` receives the current version and returns the next one with a
    /// value for the caller. On error nothing is published.
    pub fn edit<T>(&self, edit: impl FnOnce(&Dataset) -> Result<(Dataset, T)>) -> Result<T> {
        let _writer = self.writer.lock();
        let base = self.snapshot();
        let (next, value) = edit(&base)?;
        if next.id() != base.id() || next.version() <= base.version() {
            return Err(EngineError::InvalidInput(format!(
                "edit of dataset {} v{} produced dataset {} v{}",
                base.id(),
                base.version(),
                next.id(),
                next.version()
            )));
        }
        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);
        debug!(dataset = next.id(), version = next.version(), "Dataset version published");
        if self.prebuild_index {
            spawn_index_build(next);
        }
        Ok(value)
    }
}

fn spawn_index_build(dataset: Arc<Dataset>) {
    rayon::spawn(move || {
        dataset.spatial_index();
    });
}

/// All live datasets, addressed by id.
#[derive(Debug)]
pub struct DatasetRegistry {
    datasets: DashMap<DatasetId, Arc<DatasetHandle>>,
    next_id: AtomicU64,
    prebuild_index: bool,
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self {
            datasets: DashMap::new(),
            next_id: AtomicU64::new(1),
            prebuild_index: false,
        }
    }

    /// Prebuild spatial indexes on every publish.
    pub fn with_index_prebuild(mut self, enabled: bool) -> Self {
        self.prebuild_index = enabled;
        self
    }

    fn allocate_id(&self) -> DatasetId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, dataset: Dataset) -> Arc<DatasetHandle> {
        let id = dataset.id();
        let handle =
            Arc::new(DatasetHandle::new(dataset).with_index_prebuild(self.prebuild_index));
        self.datasets.insert(id, Arc::clone(&handle));
        handle
    }

    /// Register a new empty dataset.
    pub fn create(&self, name: impl Into<String>, crs: CrsId) -> Arc<DatasetHandle> {
        let dataset = Dataset::new(self.allocate_id(), name, crs);
        info!(dataset = dataset.id(), name = dataset.name(), "Dataset created");
        self.insert(dataset)
    }

    /// Import a decoded feature collection as a new dataset.
    pub fn import(
        &self,
        name: impl Into<String>,
        collection: ImportedCollection,
        policy: &EditPolicy,
        tol: Tolerance,
    ) -> Result<(Arc<DatasetHandle>, Vec<(super::FeatureId, Vec<IssueKind>)>)> {
        let (dataset, repairs) =
            Dataset::import(self.allocate_id(), name, collection, policy, tol)?;
        Ok((self.insert(dataset), repairs))
    }

    /// Handle of a registered dataset.
    ///
    /// # Errors
    ///
    /// `DatasetNotFound` for unknown or dropped ids.
    pub fn get(&self, id: DatasetId) -> Result<Arc<DatasetHandle>> {
        self.datasets
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::DatasetNotFound(id))
    }

    /// Remove a dataset. Snapshots already handed out stay readable.
    ///
    /// # Errors
    ///
    /// `DatasetNotFound` for unknown ids.
    pub fn drop_dataset(&self, id: DatasetId) -> Result<()> {
        self.datasets
            .remove(&id)
            .map(|_| info!(dataset = id, "Dataset dropped"))
            .ok_or(EngineError::DatasetNotFound(id))
    }

    /// Registered ids, ascending.
    pub fn ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = self.datasets.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
