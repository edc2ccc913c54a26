//! Versioned, immutable feature collections.
//!
//! A [`Dataset`] value is one version. Edits never mutate it: they return a
//! new version that shares every untouched feature through `Arc` and starts
//! with no spatial index.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::attribute::{AttributeValue, Attributes, Schema};
use crate::codec::ImportedCollection;
use crate::crs::CrsId;
use crate::error::{EngineError, Result};
use crate::geometry::{Geometry, Tolerance};
use crate::index::SpatialIndex;
use crate::validation::{EditPolicy, IssueKind};

/// Dataset identifier, allocated by the registry.
pub type DatasetId = u64;

/// Stable feature identifier, unique within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(u64);

impl FeatureId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A geometry with attributes and a stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Geometry,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: FeatureId, geometry: Geometry, attributes: Attributes) -> Self {
        Self {
            id,
            geometry,
            attributes,
        }
    }

    /// Attribute value, `Null` when absent.
    pub fn attribute(&self, name: &str) -> &AttributeValue {
        static NULL: AttributeValue = AttributeValue::Null;
        self.attributes.get(name).unwrap_or(&NULL)
    }
}

/// Result of an edit: the new dataset version plus what happened.
#[derive(Debug)]
pub struct EditOutcome {
    pub dataset: Dataset,
    /// Feature added or updated
    pub feature_id: FeatureId,
    /// Issues repaired in the supplied geometry
    pub repaired: Vec<IssueKind>,
}

/// Changes applied by [`Dataset::update_feature`]. `None` keeps the
/// current value; supplied attributes replace the whole map.
#[derive(Debug, Clone, Default)]
pub struct FeatureUpdate {
    pub geometry: Option<Geometry>,
    pub attributes: Option<Attributes>,
}

impl FeatureUpdate {
    pub fn geometry(geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            attributes: None,
        }
    }

    pub fn attributes(attributes: Attributes) -> Self {
        Self {
            geometry: None,
            attributes: Some(attributes),
        }
    }
}

/// One version of a feature collection.
pub struct Dataset {
    id: DatasetId,
    version: u64,
    name: String,
    crs: CrsId,
    schema: Schema,
    features: Vec<Arc<Feature>>,
    positions: HashMap<FeatureId, usize>,
    /// Lowest id never handed out by this dataset's history
    next_id: u64,
    index: OnceLock<Arc<SpatialIndex>>,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("name", &self.name)
            .field("crs", &self.crs)
            .field("features", &self.features.len())
            .field("indexed", &self.index.get().is_some())
            .finish()
    }
}

impl Dataset {
    /// Empty dataset at version 1.
    pub fn new(id: DatasetId, name: impl Into<String>, crs: CrsId) -> Self {
        Self::assemble(id, 1, name.into(), crs, Schema::new(), Vec::new(), 1)
    }

    /// Dataset from already validated features.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when a feature's CRS differs from `crs`,
    /// `InvalidInput` on duplicate ids, `SchemaMismatch` on conflicting
    /// attribute types.
    pub fn from_features(
        id: DatasetId,
        name: impl Into<String>,
        crs: CrsId,
        features: Vec<Feature>,
    ) -> Result<Self> {
        let mut schema = Schema::new();
        let mut seen = HashSet::with_capacity(features.len());
        for feature in &features {
            check_crs(&crs, &feature.geometry)?;
            if !seen.insert(feature.id) {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate feature id {}",
                    feature.id
                )));
            }
            schema = schema.extended(&feature.attributes)?;
        }
        let features = features.into_iter().map(Arc::new).collect();
        Ok(Self::assemble(id, 1, name.into(), crs, schema, features, 1))
    }

    /// Build a dataset from a decoded feature collection.
    ///
    /// Every geometry passes through `policy`, in parallel. A feature keeps
    /// its document `id` when that id is positive and unique in the
    /// collection; the rest are numbered upwards from the largest kept id,
    /// in document order. Import is all-or-nothing.
    pub fn import(
        id: DatasetId,
        name: impl Into<String>,
        collection: ImportedCollection,
        policy: &EditPolicy,
        tol: Tolerance,
    ) -> Result<(Self, Vec<(FeatureId, Vec<IssueKind>)>)> {
        let name = name.into();
        let crs = collection.crs;
        let ids = import_ids(collection.features.iter().map(|f| f.source_id));
        let prepared: Vec<(Feature, Vec<IssueKind>)> = collection
            .features
            .into_par_iter()
            .zip(ids)
            .map(|(imported, fid)| {
                let geometry = Geometry::new(imported.shape, crs.clone());
                let (geometry, issues) = policy.apply(geometry, tol)?;
                Ok((Feature::new(fid, geometry, imported.attributes), issues))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut repairs = Vec::new();
        let mut features = Vec::with_capacity(prepared.len());
        for (feature, issues) in prepared {
            if !issues.is_empty() {
                repairs.push((feature.id, issues));
            }
            features.push(feature);
        }
        let dataset = Self::from_features(id, name, crs, features)?;
        info!(
            dataset = id,
            name = %dataset.name,
            crs = %dataset.crs,
            features = dataset.len(),
            repaired = repairs.len(),
            "Dataset imported"
        );
        Ok((dataset, repairs))
    }

    fn assemble(
        id: DatasetId,
        version: u64,
        name: String,
        crs: CrsId,
        schema: Schema,
        features: Vec<Arc<Feature>>,
        next_id: u64,
    ) -> Self {
        let positions = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
        let max = features.iter().map(|f| f.id.get()).max().unwrap_or(0);
        Self {
            id,
            version,
            name,
            crs,
            schema,
            features,
            positions,
            next_id: next_id.max(max + 1),
            index: OnceLock::new(),
        }
    }

    fn next_version(&self, schema: Schema, features: Vec<Arc<Feature>>) -> Self {
        Self::assemble(
            self.id,
            self.version + 1,
            self.name.clone(),
            self.crs.clone(),
            schema,
            features,
            self.next_id,
        )
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crs(&self) -> &CrsId {
        &self.crs
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Features in insertion order.
    pub fn features(&self) -> &[Arc<Feature>] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, id: FeatureId) -> Option<&Arc<Feature>> {
        self.positions.get(&id).map(|&i| &self.features[i])
    }

    /// Feature by id.
    ///
    /// # Errors
    ///
    /// `FeatureNotFound` for unknown ids.
    pub fn feature(&self, id: FeatureId) -> Result<&Arc<Feature>> {
        self.get(id).ok_or(EngineError::FeatureNotFound(id))
    }

    /// Id the next added feature receives.
    ///
    /// Ids of deleted features are never handed out again.
    pub fn next_feature_id(&self) -> FeatureId {
        FeatureId::new(self.next_id)
    }

    /// Features with the given ids, in the order first asked for, or every
    /// feature when `ids` is `None`. Repeated ids are ignored.
    ///
    /// # Errors
    ///
    /// `FeatureNotFound` for the first unknown id.
    pub fn select(&self, ids: Option<&[FeatureId]>) -> Result<Vec<Arc<Feature>>> {
        let Some(ids) = ids else {
            return Ok(self.features.clone());
        };
        let mut seen = HashSet::with_capacity(ids.len());
        ids.iter()
            .filter(|&&id| seen.insert(id))
            .map(|&id| self.feature(id).cloned())
            .collect()
    }

    /// This version restricted to `ids`, sharing the selected features.
    ///
    /// The view keeps the id, version and schema of the full dataset.
    ///
    /// # Errors
    ///
    /// As for [`Dataset::select`].
    pub fn subset(&self, ids: &[FeatureId]) -> Result<Dataset> {
        let features = self.select(Some(ids))?;
        Ok(Self::assemble(
            self.id,
            self.version,
            self.name.clone(),
            self.crs.clone(),
            self.schema.clone(),
            features,
            self.next_id,
        ))
    }

    /// Spatial index of this version, built on first use.
    ///
    /// Concurrent callers wait for the one in-flight build.
    pub fn spatial_index(&self) -> Arc<SpatialIndex> {
        Arc::clone(
            self.index
                .get_or_init(|| Arc::new(SpatialIndex::for_dataset(self))),
        )
    }

    /// Returns true when the index has already been built.
    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    /// New version with one more feature.
    ///
    /// # Errors
    ///
    /// `Validation` when `policy` rejects the geometry, `DimensionMismatch`
    /// on a CRS mismatch, `SchemaMismatch` on conflicting attribute types.
    pub fn add_feature(
        &self,
        geometry: Geometry,
        attributes: Attributes,
        policy: &EditPolicy,
        tol: Tolerance,
    ) -> Result<EditOutcome> {
        check_crs(&self.crs, &geometry)?;
        let schema = self.schema.extended(&attributes)?;
        let (geometry, repaired) = policy.apply(geometry, tol)?;
        let id = self.next_feature_id();

        let mut features = self.features.clone();
        features.push(Arc::new(Feature::new(id, geometry, attributes)));
        let dataset = self.next_version(schema, features);
        debug!(dataset = self.id, version = dataset.version, feature = %id, "Feature added");
        Ok(EditOutcome {
            dataset,
            feature_id: id,
            repaired,
        })
    }

    /// New version with one feature's geometry and/or attributes replaced.
    ///
    /// # Errors
    ///
    /// `FeatureNotFound` for unknown ids, otherwise as for
    /// [`Dataset::add_feature`].
    pub fn update_feature(
        &self,
        id: FeatureId,
        update: FeatureUpdate,
        policy: &EditPolicy,
        tol: Tolerance,
    ) -> Result<EditOutcome> {
        let position = *self
            .positions
            .get(&id)
            .ok_or(EngineError::FeatureNotFound(id))?;
        let current = &self.features[position];

        let schema = match &update.attributes {
            Some(attributes) => self.schema.extended(attributes)?,
            None => self.schema.clone(),
        };
        let (geometry, repaired) = match update.geometry {
            Some(geometry) => {
                check_crs(&self.crs, &geometry)?;
                policy.apply(geometry, tol)?
            }
            None => (current.geometry.clone(), Vec::new()),
        };
        let attributes = update
            .attributes
            .unwrap_or_else(|| current.attributes.clone());

        let mut features = self.features.clone();
        features[position] = Arc::new(Feature::new(id, geometry, attributes));
        let dataset = self.next_version(schema, features);
        debug!(dataset = self.id, version = dataset.version, feature = %id, "Feature updated");
        Ok(EditOutcome {
            dataset,
            feature_id: id,
            repaired,
        })
    }

    /// New version without the feature.
    ///
    /// # Errors
    ///
    /// `FeatureNotFound` for unknown ids.
    pub fn delete_feature(&self, id: FeatureId) -> Result<Dataset> {
        if !self.positions.contains_key(&id) {
            return Err(EngineError::FeatureNotFound(id));
        }
        let features = self
            .features
            .iter()
            .filter(|f| f.id != id)
            .cloned()
            .collect();
        let dataset = self.next_version(self.schema.clone(), features);
        debug!(dataset = self.id, version = dataset.version, feature = %id, "Feature deleted");
        Ok(dataset)
    }

    /// New version in `crs` with every geometry passed through `transform`.
    ///
    /// Feature ids and attributes are kept. Runs in parallel.
    ///
    /// # Errors
    ///
    /// The first error `transform` returns, or `DimensionMismatch` when it
    /// yields a geometry outside `crs`.
    pub fn transformed<F>(&self, crs: CrsId, transform: F) -> Result<Dataset>
    where
        F: Fn(&Geometry) -> Result<Geometry> + Sync,
    {
        let features = self
            .features
            .par_iter()
            .map(|feature| {
                let geometry = transform(&feature.geometry)?;
                check_crs(&crs, &geometry)?;
                Ok(Arc::new(Feature::new(
                    feature.id,
                    geometry,
                    feature.attributes.clone(),
                )))
            })
            .collect::<Result<Vec<_>>>()?;
        let dataset = Self::assemble(
            self.id,
            self.version + 1,
            self.name.clone(),
            crs,
            self.schema.clone(),
            features,
            self.next_id,
        );
        info!(
            dataset = self.id,
            version = dataset.version,
            from = %self.crs,
            to = %dataset.crs,
            features = dataset.len(),
            "Dataset transformed"
        );
        Ok(dataset)
    }
}

/// Feature ids for an imported collection, in document order.
fn import_ids(source_ids: impl Iterator<Item = Option<u64>>) -> Vec<FeatureId> {
    let source_ids: Vec<Option<u64>> = source_ids.collect();
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for id in source_ids.iter().flatten().filter(|&&id| id > 0) {
        *counts.entry(*id).or_default() += 1;
    }
    let keep = |id: &Option<u64>| id.filter(|id| counts.get(id) == Some(&1));
    let mut next = source_ids.iter().filter_map(keep).max().unwrap_or(0) + 1;
    source_ids
        .iter()
        .map(|id| match keep(id) {
            Some(id) => FeatureId::new(id),
            None => {
                next += 1;
                FeatureId::new(next - 1)
            }
        })
        .collect()
}

fn check_crs(expected: &CrsId, geometry: &Geometry) -> Result<()> {
    if &geometry.crs != expected {
        return Err(EngineError::DimensionMismatch(format!(
            "geometry CRS {} does not match dataset CRS {}",
            geometry.crs, expected
        )));
    }
    Ok(())
}
