//! Stored results of dataset operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::codec::features_to_geojson;
use crate::error::{EngineError, Result};
use crate::feature::{DatasetId, Feature};
use crate::ops::{OpOutput, OpWarning, ResultMetadata};

/// Analysis result identifier, allocated by [`AnalysisResults`].
pub type ResultId = u64;

/// One stored analysis: the output features and how they were produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub id: ResultId,
    pub dataset: DatasetId,
    /// Dataset version the operation read
    pub dataset_version: u64,
    pub features: Vec<Feature>,
    pub warnings: Vec<OpWarning>,
    pub metadata: ResultMetadata,
}

impl AnalysisRecord {
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Output features as a GeoJSON FeatureCollection.
    pub fn to_geojson(&self) -> Value {
        features_to_geojson(&self.features)
    }
}

/// Which stored results to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    /// Only results of this operation (e.g. `"buffer"`)
    pub operation: Option<String>,
    /// Only results computed from this dataset
    pub dataset: Option<DatasetId>,
}

impl ResultFilter {
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn dataset(mut self, dataset: DatasetId) -> Self {
        self.dataset = Some(dataset);
        self
    }

    fn matches(&self, record: &AnalysisRecord) -> bool {
        self.operation
            .as_deref()
            .map_or(true, |op| record.metadata.operation == op)
            && self.dataset.map_or(true, |id| record.dataset == id)
    }
}

/// All stored analysis results, addressed by id.
///
/// Records are immutable once stored and outlive the dataset version (and
/// the dataset) they were computed from.
#[derive(Debug)]
pub struct AnalysisResults {
    records: DashMap<ResultId, Arc<AnalysisRecord>>,
    next_id: AtomicU64,
}

impl Default for AnalysisResults {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisResults {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store an operation's output under a fresh id.
    pub fn insert(
        &self,
        dataset: DatasetId,
        dataset_version: u64,
        output: OpOutput<Vec<Feature>>,
    ) -> Arc<AnalysisRecord> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(AnalysisRecord {
            id,
            dataset,
            dataset_version,
            features: output.value,
            warnings: output.warnings,
            metadata: output.metadata,
        });
        info!(
            result = id,
            dataset,
            operation = %record.metadata.operation,
            features = record.feature_count(),
            "Analysis result stored"
        );
        self.records.insert(id, Arc::clone(&record));
        record
    }

    /// Stored result by id.
    ///
    /// # Errors
    ///
    /// `ResultNotFound` for unknown or deleted ids.
    pub fn get(&self, id: ResultId) -> Result<Arc<AnalysisRecord>> {
        self.records
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::ResultNotFound(id))
    }

    /// Results matching `filter`, newest first.
    pub fn list(&self, filter: &ResultFilter) -> Vec<Arc<AnalysisRecord>> {
        let mut records: Vec<Arc<AnalysisRecord>> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        records.sort_unstable_by(|a, b| b.id.cmp(&a.id));
        records
    }

    /// Remove a result. Returns false when the id was not stored.
    pub fn delete(&self, id: ResultId) -> bool {
        let removed = self.records.remove(&id).is_some();
        debug!(result = id, removed, "Analysis result delete");
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::feature::{Attributes, FeatureId};
    use crate::geometry::Geometry;
    use serde_json::json;

    fn output(operation: &str, features: usize) -> OpOutput<Vec<Feature>> {
        let features = (1..=features as u64)
            .map(|i| {
                Feature::new(
                    FeatureId::new(i),
                    Geometry::point(i as f64, 0.0, CrsId::web_mercator()),
                    Attributes::new(),
                )
            })
            .collect();
        OpOutput::new(
            features,
            ResultMetadata::new(operation, CrsId::web_mercator(), json!({})),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let results = AnalysisResults::new();
        let record = results.insert(3, 2, output("buffer", 2));
        assert_eq!(record.id, 1);
        assert_eq!(record.feature_count(), 2);

        let fetched = results.get(record.id).unwrap();
        assert!(Arc::ptr_eq(&record, &fetched));
        assert_eq!(fetched.dataset_version, 2);
        assert_eq!(fetched.to_geojson()["features"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_list_newest_first_and_filtered() {
        let results = AnalysisResults::new();
        results.insert(1, 1, output("buffer", 1));
        results.insert(1, 1, output("clip", 1));
        results.insert(2, 1, output("buffer", 1));

        let all: Vec<ResultId> = results
            .list(&ResultFilter::default())
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec![3, 2, 1]);

        let buffers: Vec<ResultId> = results
            .list(&ResultFilter::default().operation("buffer"))
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(buffers, vec![3, 1]);

        let scoped = results.list(&ResultFilter::default().operation("buffer").dataset(1));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, 1);
    }

    #[test]
    fn test_delete() {
        let results = AnalysisResults::new();
        let record = results.insert(1, 1, output("union", 1));
        assert!(results.delete(record.id));
        assert!(!results.delete(record.id));
        assert!(matches!(results.get(record.id), Err(EngineError::ResultNotFound(1))));
        assert!(results.is_empty());

        // Ids are not reused after a delete
        assert_eq!(results.insert(1, 1, output("union", 1)).id, 2);
    }
}
