//! Vector + metadata container
//!
//! A [`Collection`] pairs a list of fixed-dimension descriptors with a parallel
//! list of provenance sets. Every constructor and mutation keeps
//! `vectors.len() == metadata.len()` and a single shared dimension.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator line used by [`Collection::metadata_report`]
pub const REPORT_SEPARATOR: &str = "==================================================\n";

/// Process-wide insertion sequence, see [`Vector::sequence`]
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectionError {
    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Index out of bounds: {index} >= {count}")]
    IndexOutOfBounds { index: usize, count: usize },
}

// ============================================================================
// Vector
// ============================================================================

/// Immutable `f64` descriptor backed by a shared buffer.
///
/// Cloning is cheap and keeps the insertion sequence tag, so a vector that
/// travels through several buckets is still recognised as the same point.
#[derive(Debug, Clone)]
pub struct Vector {
    data: Arc<[f64]>,
    sequence: u64,
}

impl Vector {
    pub fn new(data: impl Into<Arc<[f64]>>) -> Self {
        Self {
            data: data.into(),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Insertion sequence tag assigned at creation, shared by clones.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Deref for Vector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.data
    }
}

impl AsRef<[f64]> for Vector {
    fn as_ref(&self) -> &[f64] {
        &self.data
    }
}

/// Value equality; the sequence tag is ignored.
impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.data[..] == other.data[..]
    }
}

impl From<Vec<f64>> for Vector {
    fn from(data: Vec<f64>) -> Self {
        Self::new(data)
    }
}

impl From<&[f64]> for Vector {
    fn from(data: &[f64]) -> Self {
        Self::new(data)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Integer pixel corner `(x, y)`
pub type Corner = (i64, i64);

/// Provenance of a single descriptor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataEntry {
    /// Descriptor without a location, e.g. a synthetic or imported point
    Point { source: String },
    /// Face box inside a still image
    Image {
        source: String,
        top_left: Corner,
        bottom_right: Corner,
    },
    /// Face box inside one frame of a video
    VideoFrame {
        source: String,
        frame_index: u64,
        top_left: Corner,
        bottom_right: Corner,
    },
}

impl MetadataEntry {
    pub fn point(source: impl Into<String>) -> Self {
        Self::Point {
            source: source.into(),
        }
    }

    pub fn image(source: impl Into<String>, top_left: Corner, bottom_right: Corner) -> Self {
        Self::Image {
            source: source.into(),
            top_left,
            bottom_right,
        }
    }

    pub fn video_frame(
        source: impl Into<String>,
        frame_index: u64,
        top_left: Corner,
        bottom_right: Corner,
    ) -> Self {
        Self::VideoFrame {
            source: source.into(),
            frame_index,
            top_left,
            bottom_right,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Point { source } | Self::Image { source, .. } | Self::VideoFrame { source, .. } => {
                source
            }
        }
    }
}

impl fmt::Display for MetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Point { source } => write!(f, "{source}"),
            Self::Image {
                source,
                top_left,
                bottom_right,
            } => write!(f, "{source} {top_left:?}-{bottom_right:?}"),
            Self::VideoFrame {
                source,
                frame_index,
                top_left,
                bottom_right,
            } => write!(f, "{source}#{frame_index} {top_left:?}-{bottom_right:?}"),
        }
    }
}

/// Provenance set attached 1:1 to a vector
pub type MetadataSet = BTreeSet<MetadataEntry>;

/// Union of two provenance sets
pub fn merge_metadata(a: &MetadataSet, b: &MetadataSet) -> MetadataSet {
    a.union(b).cloned().collect()
}

// ============================================================================
// Collection
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    vectors: Vec<Vector>,
    metadata: Vec<MetadataSet>,
}

impl Collection {
    /// Build a collection from parallel lists.
    ///
    /// An empty `metadata` list is filled with empty sets.
    pub fn new(vectors: Vec<Vector>, metadata: Vec<MetadataSet>) -> Result<Self, CollectionError> {
        let metadata = if metadata.is_empty() {
            vec![MetadataSet::new(); vectors.len()]
        } else {
            metadata
        };

        if metadata.len() != vectors.len() {
            return Err(CollectionError::Shape(format!(
                "{} vectors but {} metadata sets",
                vectors.len(),
                metadata.len()
            )));
        }

        if let Some(first) = vectors.first() {
            let dim = first.len();
            if dim == 0 {
                return Err(CollectionError::Shape("empty vector".to_string()));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(CollectionError::Shape(format!(
                    "vector of length {} in collection of dimension {}",
                    bad.len(),
                    dim
                )));
            }
        }

        Ok(Self { vectors, metadata })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble parts that already satisfy the invariants, e.g. rows taken
    /// from another collection.
    pub(crate) fn from_parts_unchecked(vectors: Vec<Vector>, metadata: Vec<MetadataSet>) -> Self {
        debug_assert_eq!(vectors.len(), metadata.len());
        debug_assert!(vectors.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { vectors, metadata }
    }

    /// Rows for which `keep` returns true, in order. Vectors are shared, not
    /// copied, so identity is preserved.
    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&Vector, &MetadataSet) -> bool,
    {
        let mut vectors = Vec::new();
        let mut metadata = Vec::new();
        for (v, m) in self.iter() {
            if keep(v, m) {
                vectors.push(v.clone());
                metadata.push(m.clone());
            }
        }
        Self::from_parts_unchecked(vectors, metadata)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Shared vector length, `None` while empty
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(|v| v.len())
    }

    pub fn vectors(&self) -> &[Vector] {
        &self.vectors
    }

    pub fn metadata_sets(&self) -> &[MetadataSet] {
        &self.metadata
    }

    pub fn get(&self, index: usize) -> Result<(&Vector, &MetadataSet), CollectionError> {
        match (self.vectors.get(index), self.metadata.get(index)) {
            (Some(v), Some(m)) => Ok((v, m)),
            _ => Err(CollectionError::IndexOutOfBounds {
                index,
                count: self.len(),
            }),
        }
    }

    pub fn vector(&self, index: usize) -> Result<&Vector, CollectionError> {
        self.get(index).map(|(v, _)| v)
    }

    pub fn metadata(&self, index: usize) -> Result<&MetadataSet, CollectionError> {
        self.get(index).map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Vector, &MetadataSet)> + '_ {
        self.vectors.iter().zip(self.metadata.iter())
    }

    pub fn into_parts(self) -> (Vec<Vector>, Vec<MetadataSet>) {
        (self.vectors, self.metadata)
    }

    /// Push one point, checking its shape against the collection.
    pub fn append_point(
        &mut self,
        vector: impl Into<Vector>,
        metadata: MetadataSet,
    ) -> Result<(), CollectionError> {
        let vector = vector.into();
        if vector.is_empty() {
            return Err(CollectionError::Shape("empty vector".to_string()));
        }
        if let Some(dim) = self.dimension() {
            if vector.len() != dim {
                return Err(CollectionError::Shape(format!(
                    "vector of length {} appended to collection of dimension {}",
                    vector.len(),
                    dim
                )));
            }
        }

        self.vectors.push(vector);
        self.metadata.push(metadata);
        Ok(())
    }

    /// Concatenate `other` onto this collection.
    pub fn append_collection(&mut self, other: Collection) -> Result<(), CollectionError> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.dimension() != other.dimension() {
            return Err(CollectionError::Shape(format!(
                "cannot append dimension {:?} to dimension {:?}",
                other.dimension(),
                self.dimension()
            )));
        }

        self.vectors.extend(other.vectors);
        self.metadata.extend(other.metadata);
        Ok(())
    }

    /// Every metadata entry across all points
    pub fn all_metadata(&self) -> MetadataSet {
        self.metadata.iter().flatten().cloned().collect()
    }

    /// Human readable listing of every metadata entry, one block per point.
    pub fn metadata_report(&self, headline: &str) -> String {
        let mut out = String::new();
        out.push_str(headline);
        out.push('\n');
        out.push_str(REPORT_SEPARATOR);
        out.push_str(REPORT_SEPARATOR);

        for set in &self.metadata {
            for entry in set {
                out.push_str(&format!("\nFile name: {}\n", entry.source()));
                match entry {
                    MetadataEntry::Point { .. } => {}
                    MetadataEntry::Image {
                        top_left,
                        bottom_right,
                        ..
                    } => {
                        out.push_str(&format!(
                            "\nBounding box:\n\tTop left: {top_left:?}\n\tBottom right: {bottom_right:?}"
                        ));
                    }
                    MetadataEntry::VideoFrame {
                        frame_index,
                        top_left,
                        bottom_right,
                        ..
                    } => {
                        out.push_str(&format!("Frame number: {frame_index}"));
                        out.push_str(&format!(
                            "\nBounding box:\n\tTop left: {top_left:?}\n\tBottom right: {bottom_right:?}"
                        ));
                    }
                }
                out.push_str("\n\n");
            }
            out.push_str(REPORT_SEPARATOR);
        }
        out
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = (&'a Vector, &'a MetadataSet);
    type IntoIter = std::iter::Zip<std::slice::Iter<'a, Vector>, std::slice::Iter<'a, MetadataSet>>;

    fn into_iter(self) -> Self::IntoIter {
        self.vectors.iter().zip(self.metadata.iter())
    }
}
