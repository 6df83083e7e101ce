//! Offline LSH parameter tuning
//!
//! Grid search over the active `(k, L)` of one in-memory LSH. Every candidate
//! answers the same queries as an exact linear scan; candidates missing more
//! than `max_missing` metadata entries on any query are rejected, and the
//! fastest remaining one by worst-case query time wins. The basis is generated
//! once, so [`Lsh::update_params`] only rehashes between candidates.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::collection::Collection;
use crate::comparison::compare;
use crate::config::Settings;
use crate::retrieval::{
    Linear, Lsh, LshParams, Retrieval, RetrievalError, MIN_HASH_FUNCTIONS, MIN_HASH_TABLES,
};

#[derive(Debug, Clone, PartialEq)]
pub struct TuningConfig {
    /// Basis mode, bucket width and seed of the tuned structure
    pub params: LshParams,
    /// Query radius (default: settings recognition threshold)
    pub radius: Option<f64>,
    /// Tolerated missing metadata entries per query (default: 0)
    pub max_missing: usize,
    /// Largest `k` tried (default: 20)
    pub max_hash_functions: usize,
    /// Largest `L` tried (default: 10)
    pub max_hash_tables: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            params: LshParams::random(),
            radius: None,
            max_missing: 0,
            max_hash_functions: MIN_HASH_FUNCTIONS,
            max_hash_tables: MIN_HASH_TABLES,
        }
    }
}

/// Best configuration found
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningOutcome {
    pub num_hash_functions: usize,
    pub num_hash_tables: usize,
    pub bucket_width: f64,
    /// Slowest single query under this configuration
    pub worst_query_time: Duration,
    /// Largest number of missing entries over all queries
    pub missing: usize,
}

/// Find the fastest `(k, L)` whose results stay within `max_missing` of the
/// exact answer. `None` when no candidate qualifies.
pub fn tune_lsh_params(
    sample: &Collection,
    queries: &Collection,
    config: &TuningConfig,
    settings: &Settings,
) -> Result<Option<TuningOutcome>, RetrievalError> {
    if sample.is_empty() || queries.is_empty() {
        return Ok(None);
    }
    let radius = config.radius.unwrap_or(settings.recognition_threshold);

    let mut linear = Linear::in_memory(settings);
    linear.append(sample.clone(), None)?;
    let expected = queries
        .vectors()
        .iter()
        .map(|q| linear.query(q, radius))
        .collect::<Result<Vec<_>, _>>()?;

    let mut lsh = Lsh::in_memory(config.params, settings);
    lsh.append(sample.clone(), None)?;
    let (generated_k, generated_l) = lsh.basis_shape();

    let mut best: Option<TuningOutcome> = None;
    for l in 1..=config.max_hash_tables.min(generated_l) {
        for k in 1..=config.max_hash_functions.min(generated_k) {
            lsh.update_params(k, l)?;

            let mut worst = Duration::ZERO;
            let mut missing = 0;
            for (query, desired) in queries.vectors().iter().zip(&expected) {
                let start = Instant::now();
                let found = lsh.query(query, radius)?;
                worst = worst.max(start.elapsed());
                missing = missing.max(compare(&found, desired).1);
            }
            debug!(k, l, ?worst, missing, "Evaluated LSH candidate");

            if missing > config.max_missing {
                continue;
            }
            if best.map_or(true, |b| worst < b.worst_query_time) {
                best = Some(TuningOutcome {
                    num_hash_functions: k,
                    num_hash_tables: l,
                    bucket_width: lsh.bucket_width(),
                    worst_query_time: worst,
                    missing,
                });
            }
        }
    }

    match &best {
        Some(b) => info!(
            k = b.num_hash_functions,
            l = b.num_hash_tables,
            w = b.bucket_width,
            worst = ?b.worst_query_time,
            "Selected LSH parameters"
        ),
        None => info!(max_missing = config.max_missing, "No LSH parameters met the recall bound"),
    }
    Ok(best)
}
