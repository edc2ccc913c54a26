//! Features, schemas and versioned datasets.
//!
//! A dataset version is immutable. Edits go through a [`DatasetHandle`],
//! which computes the next version copy-on-write and publishes it
//! atomically, so readers never observe a half-applied edit.

mod attribute;
mod dataset;
mod handle;

pub use attribute::{AttributeKey, AttributeType, AttributeValue, Attributes, Schema};
pub use dataset::{Dataset, DatasetId, EditOutcome, Feature, FeatureId, FeatureUpdate};
pub use handle::{DatasetHandle, DatasetRegistry};
