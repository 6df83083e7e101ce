//! Exact duplicate removal
//!
//! Rows are stably sorted under one of two orderings, adjacent equal rows are
//! coalesced and their metadata sets merged.

use std::cmp::Ordering;

use tracing::debug;

use crate::collection::{merge_metadata, Collection, MetadataSet, Vector};
use crate::comparison::{ordering_by_identity, ordering_by_value};

/// Which rows count as duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOrdering {
    /// Same vector instance (shared insertion sequence tag). Cheap, only valid
    /// for collections assembled in memory from shared vectors.
    Identity,
    /// Component-wise equal values. Use for anything read back from disk.
    Value,
}

impl DedupOrdering {
    fn compare(self, a: &Vector, b: &Vector) -> Ordering {
        match self {
            Self::Identity => ordering_by_identity(a, b),
            Self::Value => ordering_by_value(a, b),
        }
    }
}

/// Remove duplicate rows, merging the metadata of every coalesced group.
///
/// The result is ordered by the chosen ordering.
pub fn deduplicate(collection: &Collection, ordering: DedupOrdering) -> Collection {
    if collection.len() < 2 {
        return collection.clone();
    }

    let mut rows: Vec<(&Vector, &MetadataSet)> = collection.iter().collect();
    rows.sort_by(|(a, _), (b, _)| ordering.compare(a, b));

    let mut vectors: Vec<Vector> = Vec::with_capacity(rows.len());
    let mut metadata: Vec<MetadataSet> = Vec::with_capacity(rows.len());

    for (vector, md) in rows {
        match (vectors.last(), metadata.last_mut()) {
            (Some(prev), Some(prev_md)) if ordering.compare(prev, vector) == Ordering::Equal => {
                *prev_md = merge_metadata(prev_md, md);
            }
            _ => {
                vectors.push(vector.clone());
                metadata.push(md.clone());
            }
        }
    }

    debug!(
        before = collection.len(),
        after = vectors.len(),
        ?ordering,
        "Deduplicated collection"
    );
    Collection::from_parts_unchecked(vectors, metadata)
}
