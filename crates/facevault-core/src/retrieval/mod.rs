//! Radius retrieval over stored descriptors
//!
//! Two structures implement [`Retrieval`]:
//!
//! - [`Linear`]: exact scan over every stored point.
//! - [`Lsh`]: p-stable locality sensitive hashing, approximate but never
//!   returns a point outside the radius.
//!
//! Both run either in memory or out-of-core below a storage root. An
//! out-of-core structure restores its parameter file on construction, or
//! ingests every collection already present under the root.

mod linear;
mod lsh;

pub use linear::{Linear, LinearParams};
pub use lsh::{Lsh, LshParams, LshRecord, MIN_HASH_FUNCTIONS, MIN_HASH_TABLES};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::collection::{Collection, CollectionError};
use crate::distance::{distance, DistanceError};
use crate::persistence::{list_collection_files, read_collection, strip_collection_extension};

/// Subdirectory of the linear structure below its root
pub const LINEAR_DIR: &str = "linear";
/// Subdirectory of the LSH structure below its root
pub const LSH_DIR: &str = "lsh";
/// Internal directories never ingested as input
pub const STRUCTURE_DIRS: [&str; 2] = [LINEAR_DIR, LSH_DIR];

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Distance error: {0}")]
    Distance(#[from] DistanceError),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every retrieval structure
#[derive(Debug, Clone, Default)]
pub struct StructureState {
    root: Option<PathBuf>,
    dimension: Option<usize>,
    file_name_cache: BTreeSet<String>,
    distance_order: u32,
}

impl StructureState {
    pub fn in_memory(distance_order: u32) -> Self {
        Self {
            distance_order,
            ..Self::default()
        }
    }

    /// State rooted at `root`, creating the directory when missing.
    pub fn at_root(root: &Path, distance_order: u32) -> Result<Self, RetrievalError> {
        if root.as_os_str().is_empty() {
            return Ok(Self::in_memory(distance_order));
        }
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: Some(root.to_path_buf()),
            distance_order,
            ..Self::default()
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.root.is_none()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn file_name_cache(&self) -> &BTreeSet<String> {
        &self.file_name_cache
    }

    pub fn distance_order(&self) -> u32 {
        self.distance_order
    }

    /// `<root>/<name>`; only meaningful out-of-core
    pub(crate) fn path(&self, name: &str) -> PathBuf {
        self.root.as_deref().unwrap_or(Path::new("")).join(name)
    }

    pub(crate) fn restore(&mut self, dimension: usize, cache: BTreeSet<String>) {
        self.dimension = (dimension > 0).then_some(dimension);
        self.file_name_cache = cache;
    }

    /// Whether the basename of `source` was already ingested
    pub(crate) fn is_cached(&self, source: Option<&Path>) -> bool {
        source_name(source).is_some_and(|name| self.file_name_cache.contains(&name))
    }

    pub(crate) fn register(&mut self, source: Option<&Path>) {
        if let Some(name) = source_name(source) {
            self.file_name_cache.insert(name);
        }
    }

    pub(crate) fn register_name(&mut self, name: String) {
        self.file_name_cache.insert(name);
    }

    /// Check `collection` against the locked dimension. Returns `true` when
    /// this call locked it.
    pub(crate) fn lock_dimension(&mut self, collection: &Collection) -> Result<bool, RetrievalError> {
        let actual = collection
            .dimension()
            .ok_or_else(|| RetrievalError::InvalidInput("empty collection".to_string()))?;
        match self.dimension {
            None => {
                self.dimension = Some(actual);
                debug!(dimension = actual, "Locked structure dimension");
                Ok(true)
            }
            Some(expected) if expected == actual => Ok(false),
            Some(expected) => Err(RetrievalError::DimensionMismatch { expected, actual }),
        }
    }

    /// Validate a query point. `Ok(false)` means nothing was appended yet.
    pub(crate) fn check_query(&self, point: &[f64]) -> Result<bool, RetrievalError> {
        if point.is_empty() {
            return Err(RetrievalError::InvalidInput("query vector is empty".to_string()));
        }
        match self.dimension {
            None => Ok(false),
            Some(expected) if expected == point.len() => Ok(true),
            Some(expected) => Err(RetrievalError::DimensionMismatch {
                expected,
                actual: point.len(),
            }),
        }
    }
}

/// Basename used for idempotent ingestion
pub fn source_name(source: Option<&Path>) -> Option<String> {
    source
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

/// Rows of `collection` within `radius` of `query` under the p-norm `order`.
pub fn filter_collection(
    collection: &Collection,
    query: &[f64],
    radius: f64,
    order: u32,
) -> Result<Collection, RetrievalError> {
    let mut kept = Collection::empty();
    for (vector, metadata) in collection {
        if distance(query, vector, order)? <= radius {
            kept.append_point(vector.clone(), metadata.clone())?;
        }
    }
    Ok(kept)
}

/// Common contract of the retrieval structures
pub trait Retrieval {
    fn state(&self) -> &StructureState;

    /// Storage root, `None` when in memory
    fn root_path(&self) -> Option<&Path> {
        self.state().root()
    }

    fn dimension(&self) -> Option<usize> {
        self.state().dimension()
    }

    fn file_name_cache(&self) -> &BTreeSet<String> {
        self.state().file_name_cache()
    }

    /// Number of stored points
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ingest `collection`.
    ///
    /// A `source` whose basename was already ingested is skipped, as is an
    /// empty collection. The first non-empty append locks the dimension.
    fn append(&mut self, collection: Collection, source: Option<&Path>) -> Result<(), RetrievalError>;

    /// Read the collection stored at `path` (either file of the pair, or the
    /// prefix) and append it under that name.
    fn append_file(&mut self, path: &Path) -> Result<(), RetrievalError> {
        if path.as_os_str().is_empty() {
            return Err(RetrievalError::InvalidInput("empty file path".to_string()));
        }
        let prefix = strip_collection_extension(path);
        let collection = read_collection(&prefix);
        if collection.is_empty() {
            return Err(RetrievalError::InvalidInput(format!(
                "{} does not contain valid data",
                prefix.display()
            )));
        }
        self.append(collection, Some(prefix.as_path()))
    }

    /// Append every collection below `path`, skipping internal structure
    /// directories and empty files.
    fn append_folder(&mut self, path: &Path) -> Result<(), RetrievalError> {
        if !path.is_dir() {
            return Err(RetrievalError::InvalidInput(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        for prefix in list_collection_files(path, &STRUCTURE_DIRS) {
            match self.append_file(&prefix) {
                Err(RetrievalError::InvalidInput(reason)) => {
                    warn!(path = %prefix.display(), %reason, "Skipping collection file");
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Stored points within `radius` of `point`.
    fn query(&self, point: &[f64], radius: f64) -> Result<Collection, RetrievalError>;

    /// Persist structure parameters. `false` in memory or on I/O failure.
    fn write_params(&self) -> bool;

    /// Restore structure parameters. `false` in memory or when absent.
    fn read_params(&mut self) -> bool;
}
