//! Content fingerprints for cache keys.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::codec::to_wkb;
use crate::feature::{Dataset, DatasetId};
use crate::geometry::Geometry;

/// SHA-256 over an operation name, its inputs' content hashes and its
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Start a fingerprint for `operation`.
    pub fn builder(operation: &str) -> FingerprintBuilder {
        FingerprintBuilder::new(operation)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Content hash of a geometry: its WKB plus CRS.
pub fn geometry_hash(geometry: &Geometry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(geometry.crs.as_str());
    hasher.update([0u8]);
    hasher.update(to_wkb(&geometry.shape));
    format!("{:x}", hasher.finalize())
}

/// Identity of a dataset version. Versions are immutable, so id plus
/// version stands in for the content.
pub fn dataset_hash(dataset: &Dataset) -> String {
    format!("dataset:{}@v{}", dataset.id(), dataset.version())
}

/// Incremental fingerprint builder.
///
/// Every part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// never collide.
#[derive(Clone)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl fmt::Debug for FingerprintBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintBuilder").finish_non_exhaustive()
    }
}

impl FingerprintBuilder {
    fn new(operation: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.part(b"op", operation.as_bytes());
        builder
    }

    fn part(&mut self, tag: &[u8], data: &[u8]) {
        self.hasher.update(tag);
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }

    /// Add an input's content hash.
    pub fn input(mut self, content_hash: &str) -> Self {
        self.part(b"in", content_hash.as_bytes());
        self
    }

    /// Add a geometry input.
    pub fn geometry(self, geometry: &Geometry) -> Self {
        let hash = geometry_hash(geometry);
        self.input(&hash)
    }

    /// Add a dataset version input.
    pub fn dataset(self, dataset: &Dataset) -> Self {
        let hash = dataset_hash(dataset);
        self.input(&hash)
    }

    /// Add a named parameter, serialised as JSON.
    pub fn param(mut self, name: &str, value: impl Serialize) -> Self {
        let encoded = serde_json::to_vec(&value).unwrap_or_default();
        self.part(b"pn", name.as_bytes());
        self.part(b"pv", &encoded);
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}

/// Cache key: a fingerprint, optionally scoped to a dataset so that it can
/// be invalidated when the dataset changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: Option<DatasetId>,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            scope: None,
            fingerprint,
        }
    }

    pub fn scoped(dataset: DatasetId, fingerprint: Fingerprint) -> Self {
        Self {
            scope: Some(dataset),
            fingerprint,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(dataset) => write!(f, "{dataset}/{}", self.fingerprint),
            None => write!(f, "{}", self.fingerprint),
        }
    }
}
