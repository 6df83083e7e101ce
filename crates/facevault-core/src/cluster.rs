//! Chinese Whispers clustering
//!
//! Builds an unweighted graph with an edge between every pair of points at
//! Euclidean distance `<= threshold`, then propagates labels: each pass visits
//! the nodes in a fresh random order and gives every node the label held by
//! most of its neighbours. See Biemann, "Chinese Whispers" (2006).
//!
//! Each final label group is collapsed into one point: the mean vector and the
//! union of the members' metadata.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::collection::{merge_metadata, Collection, MetadataSet, Vector};
use crate::distance::{l2_distance, mean};

/// Number of label propagation passes suggested by Biemann
pub const DEFAULT_ITERATIONS: usize = 30;

/// Cluster with a thread-local RNG.
pub fn cluster(collection: &Collection, threshold: f64, iterations: usize) -> Collection {
    cluster_with_rng(collection, threshold, iterations, &mut rand::thread_rng())
}

/// Cluster with a caller-supplied RNG for reproducible visit orders.
pub fn cluster_with_rng<R: Rng + ?Sized>(
    collection: &Collection,
    threshold: f64,
    iterations: usize,
    rng: &mut R,
) -> Collection {
    if collection.is_empty() {
        return Collection::empty();
    }

    let edges = build_graph(collection.vectors(), threshold);
    let labels = propagate_labels(&edges, iterations, rng);
    let groups = group_by_label(&labels);

    debug!(
        points = collection.len(),
        clusters = groups.len(),
        threshold,
        "Clustered collection"
    );
    collapse(collection, &groups)
}

fn build_graph(vectors: &[Vector], threshold: f64) -> Vec<Vec<usize>> {
    let mut edges = vec![Vec::new(); vectors.len()];
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            if l2_distance(&vectors[i], &vectors[j]) <= threshold {
                edges[i].push(j);
                edges[j].push(i);
            }
        }
    }
    edges
}

fn propagate_labels<R: Rng + ?Sized>(
    edges: &[Vec<usize>],
    iterations: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..edges.len()).collect();
    let mut order: Vec<usize> = (0..edges.len()).collect();
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();

    for pass in 0..iterations {
        order.shuffle(rng);
        let mut changed = false;

        for &node in &order {
            if edges[node].is_empty() {
                continue;
            }

            let best = majority_label(
                edges[node].iter().map(|&n| labels[n]),
                labels[node],
                &mut counts,
            );
            if best != labels[node] {
                labels[node] = best;
                changed = true;
            }
        }

        if !changed {
            debug!(pass, "Label propagation converged");
            break;
        }
    }

    labels
}

/// Most frequent label among `neighbour_labels`; ties go to the lowest label
/// id. `current` is kept when there are no neighbours.
fn majority_label<I>(
    neighbour_labels: I,
    current: usize,
    counts: &mut BTreeMap<usize, usize>,
) -> usize
where
    I: IntoIterator<Item = usize>,
{
    counts.clear();
    for label in neighbour_labels {
        *counts.entry(label).or_insert(0) += 1;
    }

    // BTreeMap iterates in ascending label order and `>` is strict.
    let mut best = current;
    let mut best_count = 0;
    for (&label, &count) in counts.iter() {
        if count > best_count {
            best = label;
            best_count = count;
        }
    }
    best
}

/// Member indices per label, groups ordered by their first member.
fn group_by_label(labels: &[usize]) -> Vec<Vec<usize>> {
    let mut slot_of_label: BTreeMap<usize, usize> = BTreeMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (index, &label) in labels.iter().enumerate() {
        let slot = *slot_of_label.entry(label).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(index);
    }
    groups
}

fn collapse(collection: &Collection, groups: &[Vec<usize>]) -> Collection {
    let vectors = collection.vectors();
    let sets = collection.metadata_sets();

    let mut out_vectors = Vec::with_capacity(groups.len());
    let mut out_metadata = Vec::with_capacity(groups.len());

    for members in groups {
        let representative = match members.as_slice() {
            [single] => vectors[*single].clone(),
            _ => {
                let centre = mean(members.iter().map(|&i| vectors[i].as_slice()))
                    .unwrap_or_else(|| vectors[members[0]].to_vec());
                Vector::from(centre)
            }
        };
        let md = members
            .iter()
            .fold(MetadataSet::new(), |acc, &i| merge_metadata(&acc, &sets[i]));

        out_vectors.push(representative);
        out_metadata.push(md);
    }

    Collection::from_parts_unchecked(out_vectors, out_metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MetadataEntry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn md(source: &str) -> MetadataSet {
        [MetadataEntry::point(source)].into_iter().collect()
    }

    #[test]
    fn test_cluster_worked_example() {
        let c = Collection::new(
            vec![Vector::from(vec![1.0, 2.0]), Vector::from(vec![3.0, 4.0])],
            vec![md("a"), md("b")],
        )
        .unwrap();

        let clustered = cluster(&c, 5.0, DEFAULT_ITERATIONS);
        assert_eq!(clustered.len(), 1);
        assert_eq!(clustered.vector(0).unwrap().as_slice(), &[2.0, 3.0]);
        let expected: MetadataSet = [MetadataEntry::point("a"), MetadataEntry::point("b")]
            .into_iter()
            .collect();
        assert_eq!(clustered.metadata(0).unwrap(), &expected);
    }

    #[test]
    fn test_threshold_zero_merges_exact_duplicates_only() {
        let c = Collection::new(
            vec![
                Vector::from(vec![1.0, 1.0]),
                Vector::from(vec![1.0, 1.0]),
                Vector::from(vec![1.0, 1.000001]),
                Vector::from(vec![7.0, 0.0]),
            ],
            vec![md("a"), md("b"), md("c"), md("d")],
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let clustered = cluster_with_rng(&c, 0.0, DEFAULT_ITERATIONS, &mut rng);
        assert_eq!(clustered.len(), 3);
        assert_eq!(clustered.metadata(0).unwrap().len(), 2);
        assert_eq!(clustered.vectors().len(), clustered.metadata_sets().len());
    }

    #[test]
    fn test_large_threshold_merges_everything_into_mean() {
        let mut rng = StdRng::seed_from_u64(42);
        let vectors: Vec<Vector> = (0..20)
            .map(|_| Vector::from((0..4).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>()))
            .collect();
        let expected = mean(vectors.iter().map(|v| v.as_slice())).unwrap();
        let c = Collection::new(vectors, vec![]).unwrap();

        let clustered = cluster_with_rng(&c, 100.0, DEFAULT_ITERATIONS, &mut rng);
        assert_eq!(clustered.len(), 1);
        for (got, want) in clustered.vector(0).unwrap().iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_separated_groups() {
        let mut rows = Vec::new();
        let mut sets = Vec::new();
        for i in 0..5 {
            rows.push(Vector::from(vec![0.0 + i as f64 * 0.01, 0.0]));
            sets.push(md(&format!("left{i}")));
            rows.push(Vector::from(vec![10.0 + i as f64 * 0.01, 0.0]));
            sets.push(md(&format!("right{i}")));
        }
        let c = Collection::new(rows, sets).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let clustered = cluster_with_rng(&c, 0.5, DEFAULT_ITERATIONS, &mut rng);
        assert_eq!(clustered.len(), 2);
        assert!(clustered
            .metadata(0)
            .unwrap()
            .iter()
            .all(|e| e.source().starts_with("left")));
        assert_eq!(clustered.metadata(1).unwrap().len(), 5);
    }

    #[test]
    fn test_tie_break_prefers_lowest_label() {
        let mut counts = BTreeMap::new();
        assert_eq!(majority_label([5, 3], 9, &mut counts), 3);
        assert_eq!(majority_label([5, 3, 5], 9, &mut counts), 5);
        assert_eq!(majority_label(std::iter::empty(), 9, &mut counts), 9);
        assert_eq!(group_by_label(&[4, 4, 1, 4, 1]), vec![vec![0, 1, 3], vec![2, 4]]);
    }

    #[test]
    fn test_empty_collection() {
        assert!(cluster(&Collection::empty(), 1.0, DEFAULT_ITERATIONS).is_empty());
    }
}
