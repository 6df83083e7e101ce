//! Parallel bucket dispatch
//!
//! Large collections are partitioned with a single-table random LSH: points
//! that are close tend to share a bucket, so a bucket-local transform such as
//! dedup or clustering can run on every bucket independently. Buckets are
//! grouped into one chunk per worker and processed on a rayon pool; results
//! come back over a channel tagged with their chunk index and are concatenated
//! in submission order.

use crossbeam_channel::unbounded;
use thiserror::Error;
use tracing::debug;

use crate::cluster::cluster;
use crate::collection::Collection;
use crate::config::Settings;
use crate::dedup::{deduplicate, DedupOrdering};
use crate::retrieval::{Lsh, LshParams, Retrieval, RetrievalError};

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Apply `transform` to every LSH bucket of `collection` in parallel.
///
/// The first failing bucket's error is returned.
pub fn process_in_parallel<F>(
    collection: &Collection,
    settings: &Settings,
    transform: F,
) -> Result<Collection, ParallelError>
where
    F: Fn(&Collection) -> Result<Collection, RetrievalError> + Sync,
{
    if collection.is_empty() {
        return Ok(Collection::empty());
    }

    let mut lsh = Lsh::in_memory(LshParams::random().with_hash_tables(1), settings);
    lsh.append(collection.clone(), None)?;
    let buckets: Vec<Collection> = lsh
        .buckets(0)
        .iter()
        .map(|hash| lsh.read_bucket(0, hash))
        .collect();

    let workers = worker_count();
    let chunk_size = buckets.len().div_ceil(workers).max(1);
    debug!(
        points = collection.len(),
        buckets = buckets.len(),
        workers,
        chunk_size,
        "Dispatching buckets"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|idx| format!("facevault-bucket-{idx}"))
        .build()?;

    let (tx, rx) = unbounded();
    pool.scope(|scope| {
        for (index, chunk) in buckets.chunks(chunk_size).enumerate() {
            let tx = tx.clone();
            let transform = &transform;
            scope.spawn(move |_| {
                let result = chunk.iter().try_fold(Collection::empty(), |mut acc, bucket| {
                    acc.append_collection(transform(bucket)?)?;
                    Ok::<_, RetrievalError>(acc)
                });
                // The receiver outlives the scope.
                let _ = tx.send((index, result));
            });
        }
    });
    drop(tx);

    let mut results: Vec<(usize, Result<Collection, RetrievalError>)> = rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);

    let mut merged = Collection::empty();
    for (_, result) in results {
        merged.append_collection(result?).map_err(RetrievalError::from)?;
    }
    Ok(merged)
}

/// Value-ordered dedup of each bucket, in parallel
pub fn deduplicate_parallel(
    collection: &Collection,
    settings: &Settings,
) -> Result<Collection, ParallelError> {
    process_in_parallel(collection, settings, |bucket| {
        Ok(deduplicate(bucket, DedupOrdering::Value))
    })
}

/// Chinese Whispers clustering of each bucket, in parallel
pub fn cluster_parallel(
    collection: &Collection,
    settings: &Settings,
) -> Result<Collection, ParallelError> {
    let threshold = settings.clustering_threshold;
    let iterations = settings.cluster_iterations;
    process_in_parallel(collection, settings, move |bucket| {
        Ok(cluster(bucket, threshold, iterations))
    })
}
