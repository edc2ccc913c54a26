//! Async facade over the engine.
//!
//! [`SpatialEngine`] wires the dataset registry, CRS registry, result cache,
//! analysis result store and chunk store together from an
//! [`EngineConfig`](crate::config::EngineConfig) and exposes every operation
//! as an `async fn`. Each request runs on tokio's blocking pool behind a
//! [`RequestPool`] that caps how many run at once; the rest queue in arrival
//! order.

mod engine;
mod pool;
mod results;

pub use engine::{FeatureEdit, ImportReport, SpatialEngine};
pub use pool::RequestPool;
pub use results::{AnalysisRecord, AnalysisResults, ResultFilter, ResultId};
