//! Orderings and collection comparison

use std::cmp::Ordering;

use crate::collection::{Collection, MetadataSet, Vector};
use crate::distance::all_close;

/// Relative and absolute tolerances of [`is_equal`]
pub const RELATIVE_TOLERANCE: f64 = 1e-5;
pub const ABSOLUTE_TOLERANCE: f64 = 1e-8;

/// Order two vectors by their insertion sequence tag.
///
/// FRAGILE: only meaningful while every vector involved was created once and
/// then shared by clone. A vector rebuilt from the same values mid-pass (for
/// example read back from disk) gets a fresh tag and no longer matches.
pub fn ordering_by_identity(a: &Vector, b: &Vector) -> Ordering {
    a.sequence().cmp(&b.sequence())
}

/// Lexicographic component order.
///
/// Components are equal iff numerically equal, so `-0.0` and `0.0` tie.
/// Everything else follows `f64::total_cmp`, which keeps NaN sortable.
pub fn ordering_by_value(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = if x == y { Ordering::Equal } else { x.total_cmp(y) };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Sizes of the one-sided differences between the metadata entries of `a`
/// and `b`, taken over all points: `(only_in_a, only_in_b)`.
pub fn compare(a: &Collection, b: &Collection) -> (usize, usize) {
    let left = a.all_metadata();
    let right = b.all_metadata();
    (
        left.difference(&right).count(),
        right.difference(&left).count(),
    )
}

fn sorted_by_value(c: &Collection) -> Vec<(&Vector, &MetadataSet)> {
    let mut rows: Vec<_> = c.iter().collect();
    rows.sort_by(|(x, _), (y, _)| ordering_by_value(x, y));
    rows
}

/// True when both collections hold the same `(vector, metadata)` pairs in
/// any order, vectors compared with `allclose` tolerances.
pub fn is_equal(a: &Collection, b: &Collection) -> bool {
    if a.len() != b.len() {
        return false;
    }

    sorted_by_value(a)
        .into_iter()
        .zip(sorted_by_value(b))
        .all(|((va, ma), (vb, mb))| {
            all_close(va, vb, RELATIVE_TOLERANCE, ABSOLUTE_TOLERANCE) && ma == mb
        })
}
