//! Chunk storage for raster tiles.
//!
//! A [`ChunkStore`] is a flat key/value store of byte chunks addressed by
//! [`ChunkKey`]. Raster grids hold only metadata plus a handle to their
//! store, so grids larger than memory work as long as the store does.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors reported by a chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem error
    #[error("chunk store I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored bytes do not decode to a tile of the expected size
    #[error("chunk {key} is corrupt: {reason}")]
    Corrupt { key: ChunkKey, reason: String },
}

/// Address of one tile of one band of one grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub grid: u64,
    pub band: u32,
    pub tile_row: u32,
    pub tile_col: u32,
}

impl ChunkKey {
    pub fn new(grid: u64, band: u32, tile_row: u32, tile_col: u32) -> Self {
        Self {
            grid,
            band,
            tile_row,
            tile_col,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "g{}/b{}/{}_{}",
            self.grid, self.band, self.tile_row, self.tile_col
        )
    }
}

/// Byte-chunk storage used by raster grids.
///
/// Implementations must be safe to share across rayon workers. A missing
/// chunk is not an error: `get` returns `None` and the reader treats the
/// tile as all nodata.
pub trait ChunkStore: Send + Sync {
    /// Fetch a chunk.
    fn get(&self, key: &ChunkKey) -> Result<Option<Bytes>, StoreError>;

    /// Store a chunk, replacing any previous value.
    fn put(&self, key: ChunkKey, data: Bytes) -> Result<(), StoreError>;

    /// Remove a chunk. Returns whether it existed.
    fn delete(&self, key: &ChunkKey) -> Result<bool, StoreError>;

    /// Number of stored chunks.
    fn chunk_count(&self) -> usize;
}

/// In-memory chunk store.
///
/// # Thread Safety
///
/// - Backed by a `DashMap`, so concurrent tile writers do not contend on
///   one lock
/// - Chunks are `Bytes`, cloning a hit is a reference-count bump
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: DashMap<ChunkKey, Bytes>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held.
    pub fn size_bytes(&self) -> usize {
        self.chunks.iter().map(|entry| entry.value().len()).sum()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn get(&self, key: &ChunkKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.chunks.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: ChunkKey, data: Bytes) -> Result<(), StoreError> {
        trace!(chunk = %key, bytes = data.len(), "Stored chunk in memory");
        self.chunks.insert(key, data);
        Ok(())
    }

    fn delete(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        Ok(self.chunks.remove(key).is_some())
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// File-backed chunk store.
///
/// Chunks are laid out hierarchically under the root directory:
///
/// ```text
/// <root>/g<grid>/b<band>/<tile_row>/<tile_col>.chunk
/// ```
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never sees a half-written chunk.
#[derive(Debug)]
pub struct DiskChunkStore {
    root: PathBuf,
}

impl DiskChunkStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        debug!(root = %root.display(), "Opened disk chunk store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a chunk file.
    pub fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        self.root
            .join(format!("g{}", key.grid))
            .join(format!("b{}", key.band))
            .join(key.tile_row.to_string())
            .join(format!("{}.chunk", key.tile_col))
    }

    fn count_files(dir: &Path) -> usize {
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    Self::count_files(&path)
                } else if path.extension().is_some_and(|ext| ext == "chunk") {
                    1
                } else {
                    0
                }
            })
            .sum()
    }
}

impl ChunkStore for DiskChunkStore {
    fn get(&self, key: &ChunkKey) -> Result<Option<Bytes>, StoreError> {
        match fs::read(self.chunk_path(key)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: ChunkKey, data: Bytes) -> Result<(), StoreError> {
        let path = self.chunk_path(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("chunk.tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &path)?;
        trace!(chunk = %key, bytes = data.len(), "Wrote chunk to disk");
        Ok(())
    }

    fn delete(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        match fs::remove_file(self.chunk_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn chunk_count(&self) -> usize {
        Self::count_files(&self.root)
    }
}
