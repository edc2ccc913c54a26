//! Operation result cache.
//!
//! Results are keyed by a SHA-256 [`Fingerprint`] of the operation name,
//! the content hashes of its inputs and its parameters. Keys may be scoped
//! to a dataset so that publishing a new version (or dropping the dataset)
//! can invalidate everything derived from it.
//!
//! # Example
//!
//! ```
//! use gisengine::cache::{CacheKey, Fingerprint, ResultCache};
//!
//! let cache = ResultCache::new(128);
//! let key = CacheKey::new(Fingerprint::builder("area").input("abc").finish());
//!
//! let first = cache.get_or_compute(key, || Ok(16.0_f64)).unwrap();
//! let second = cache.get_or_compute(key, || Ok(0.0_f64)).unwrap();
//! assert_eq!(*first, *second);
//! ```

mod fingerprint;
mod result;
mod stats;

pub use fingerprint::{dataset_hash, geometry_hash, CacheKey, Fingerprint, FingerprintBuilder};
pub use result::ResultCache;
pub use stats::{CacheStatistics, CacheStats};
