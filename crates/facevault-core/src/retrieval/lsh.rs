//! p-stable LSH retrieval
//!
//! Datar, Immorlica, Indyk and Mirrokni hashing: for table `t` and function
//! `j`, `h = floor((P[t][j] · v + b[t][j]) / w)`. A table's hash string is the
//! concatenation of its `k` function values, each written `p<n>` or `n<|n|>`.
//!
//! Projections are either independent N(0, 1) vectors per table or the
//! principal components of the first appended batch, shared by all tables.
//! Offsets are always drawn per table from U[0, w).
//!
//! # Modes
//!
//! In memory, buckets live in `BTreeMap`s and the generated basis is
//! over-provisioned to at least [`MIN_HASH_FUNCTIONS`] × [`MIN_HASH_TABLES`],
//! so that [`Lsh::update_params`] can re-slice the active `k`/`L` without new
//! projections. Out-of-core, each non-empty bucket is a collection file at
//! `lsh/table_<i>/bucket_<hash>` and the basis matches the active shape.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{filter_collection, Retrieval, RetrievalError, StructureState, LSH_DIR};
use crate::collection::Collection;
use crate::config::Settings;
use crate::dedup::{deduplicate, DedupOrdering};
use crate::distance::dot_product;
use crate::format::VEC_EXT;
use crate::pca::principal_components;
use crate::persistence::{
    list_collection_files, read_collection, read_opaque, with_appended_extension,
    write_collection, write_opaque,
};
use crate::store::VectorStore;

/// Minimum generated hash functions per table in memory
pub const MIN_HASH_FUNCTIONS: usize = 20;
/// Minimum generated hash tables in memory
pub const MIN_HASH_TABLES: usize = 10;

const TABLE_PREFIX: &str = "table";
const BUCKET_PREFIX: &str = "bucket";

/// Requested LSH shape. Zero / non-positive values fall back to [`Settings`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LshParams {
    /// Hash functions per table (`k`)
    pub num_hash_functions: usize,
    /// Number of tables (`L`)
    pub num_hash_tables: usize,
    /// Bucket width (`w`)
    pub bucket_width: f64,
    /// Fit the basis with PCA instead of random projections
    pub use_pca: bool,
    /// Random seed for reproducibility (None = random)
    pub seed: Option<u64>,
}

impl LshParams {
    pub fn random() -> Self {
        Self::default()
    }

    pub fn pca() -> Self {
        Self {
            use_pca: true,
            ..Self::default()
        }
    }

    pub fn with_hash_functions(mut self, k: usize) -> Self {
        self.num_hash_functions = k;
        self
    }

    pub fn with_hash_tables(mut self, l: usize) -> Self {
        self.num_hash_tables = l;
        self
    }

    pub fn with_bucket_width(mut self, w: f64) -> Self {
        self.bucket_width = w;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fill missing values from the mode defaults in `settings`.
    pub fn resolve(self, settings: &Settings) -> Self {
        let defaults = settings.lsh_defaults(self.use_pca);
        let mut resolved = self;

        if resolved.num_hash_functions == 0 {
            resolved.num_hash_functions = defaults.num_hash_functions;
        }
        if resolved.num_hash_tables == 0 {
            resolved.num_hash_tables = defaults.num_hash_tables;
        }
        if resolved.bucket_width == 0.0 {
            resolved.bucket_width = defaults.bucket_width;
        } else if !(resolved.bucket_width > 0.0 && resolved.bucket_width.is_finite()) {
            warn!(
                requested = resolved.bucket_width,
                fallback = defaults.bucket_width,
                "Invalid bucket width, using default"
            );
            resolved.bucket_width = defaults.bucket_width;
        }
        resolved
    }
}

/// Contents of `lsh_parameter.dat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LshRecord {
    pub dimension: usize,
    pub file_name_cache: BTreeSet<String>,
    /// `[table][function][component]`
    pub projections: Vec<Vec<Vec<f64>>>,
    /// `[table][function]`
    pub offsets: Vec<Vec<f64>>,
    pub num_hash_functions: usize,
    pub num_hash_tables: usize,
    pub bucket_width: f64,
    pub use_pca: bool,
}

impl LshRecord {
    /// Basis covers the active shape and matches the dimension
    fn is_consistent(&self) -> bool {
        self.num_hash_functions > 0
            && self.num_hash_tables > 0
            && self.bucket_width > 0.0
            && self.projections.len() >= self.num_hash_tables
            && self.offsets.len() == self.projections.len()
            && self
                .projections
                .iter()
                .zip(&self.offsets)
                .all(|(table, offsets)| {
                    table.len() >= self.num_hash_functions
                        && offsets.len() == table.len()
                        && table.iter().all(|p| p.len() == self.dimension)
                })
    }
}

pub struct Lsh {
    state: StructureState,
    num_hash_functions: usize,
    num_hash_tables: usize,
    bucket_width: f64,
    use_pca: bool,
    projections: Vec<Vec<Vec<f64>>>,
    offsets: Vec<Vec<f64>>,
    /// In-memory buckets per generated table
    tables: Vec<BTreeMap<String, Collection>>,
    rng: StdRng,
}

impl Lsh {
    fn with_state(state: StructureState, params: LshParams, settings: &Settings) -> Self {
        let params = params.resolve(settings);
        Self {
            state,
            num_hash_functions: params.num_hash_functions,
            num_hash_tables: params.num_hash_tables,
            bucket_width: params.bucket_width,
            use_pca: params.use_pca,
            projections: Vec::new(),
            offsets: Vec::new(),
            tables: Vec::new(),
            rng: match params.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    pub fn in_memory(params: LshParams, settings: &Settings) -> Self {
        Self::with_state(
            StructureState::in_memory(settings.distance_order),
            params,
            settings,
        )
    }

    /// Open (or create) an out-of-core structure below `root`.
    ///
    /// Persisted parameters take precedence over `params`.
    pub fn open<P: AsRef<Path>>(
        root: P,
        params: LshParams,
        settings: &Settings,
    ) -> Result<Self, RetrievalError> {
        let root = root.as_ref();
        let state = StructureState::at_root(root, settings.distance_order)?;
        let mut lsh = Self::with_state(state, params, settings);

        if lsh.state.is_in_memory() {
            return Ok(lsh);
        }
        if lsh.read_params() {
            info!(
                root = %root.display(),
                k = lsh.num_hash_functions,
                l = lsh.num_hash_tables,
                "Restored LSH structure"
            );
        } else {
            lsh.append_folder(root)?;
            info!(root = %root.display(), points = lsh.len(), "Initialized LSH structure");
        }
        Ok(lsh)
    }

    /// Active hash functions per table (`k`)
    pub fn num_hash_functions(&self) -> usize {
        self.num_hash_functions
    }

    /// Active hash tables (`L`)
    pub fn num_hash_tables(&self) -> usize {
        self.num_hash_tables
    }

    pub fn bucket_width(&self) -> f64 {
        self.bucket_width
    }

    pub fn uses_pca(&self) -> bool {
        self.use_pca
    }

    /// Generated basis shape `(functions, tables)`, zero before the first append
    pub fn basis_shape(&self) -> (usize, usize) {
        (
            self.projections.first().map_or(0, Vec::len),
            self.projections.len(),
        )
    }

    fn is_initialized(&self) -> bool {
        !self.projections.is_empty()
    }

    fn structure_dir(&self) -> PathBuf {
        self.state.path(LSH_DIR)
    }

    fn parameter_path(&self) -> PathBuf {
        self.state.path(&format!("{LSH_DIR}_parameter.dat"))
    }

    fn table_dir(&self, table: usize) -> PathBuf {
        self.structure_dir().join(format!("{TABLE_PREFIX}_{table}"))
    }

    fn bucket_path(&self, table: usize, hash: &str) -> PathBuf {
        self.table_dir(table).join(format!("{BUCKET_PREFIX}_{hash}"))
    }

    // ========================================================================
    // Basis
    // ========================================================================

    fn random_offsets(&mut self, count: usize) -> Vec<f64> {
        let width = self.bucket_width;
        (0..count).map(|_| self.rng.gen_range(0.0..width)).collect()
    }

    fn random_basis(&mut self, functions: usize, tables: usize, dim: usize) {
        for _ in 0..tables {
            let rng = &mut self.rng;
            let table: Vec<Vec<f64>> = (0..functions)
                .map(|_| (0..dim).map(|_| rng.sample(StandardNormal)).collect())
                .collect();
            let offsets = self.random_offsets(functions);
            self.projections.push(table);
            self.offsets.push(offsets);
        }
    }

    fn initialize(&mut self, first: &Collection) -> Result<(), RetrievalError> {
        let dim = self.state.dimension().unwrap_or(0);
        let (functions, tables) = if self.state.is_in_memory() {
            (
                self.num_hash_functions.max(MIN_HASH_FUNCTIONS),
                self.num_hash_tables.max(MIN_HASH_TABLES),
            )
        } else {
            (self.num_hash_functions, self.num_hash_tables)
        };

        if self.state.is_in_memory() {
            self.tables = vec![BTreeMap::new(); tables];
        } else {
            for table in 0..tables {
                std::fs::create_dir_all(self.table_dir(table))?;
            }
        }

        self.projections.clear();
        self.offsets.clear();

        let components = if !self.use_pca {
            None
        } else if first.len() < 2 {
            warn!(points = first.len(), "PCA needs at least 2 points, using random projections");
            None
        } else {
            match principal_components(first.vectors(), functions) {
                Ok(components) => Some(components),
                Err(e) => {
                    warn!(error = %e, "PCA failed, using random projections");
                    None
                }
            }
        };

        match components {
            Some(components) => {
                if self.num_hash_functions > components.len() {
                    warn!(
                        requested = self.num_hash_functions,
                        available = components.len(),
                        "Not enough principal components, clamping hash functions"
                    );
                    self.num_hash_functions = components.len();
                }
                for _ in 0..tables {
                    let offsets = self.random_offsets(components.len());
                    self.projections.push(components.clone());
                    self.offsets.push(offsets);
                }
            }
            None => self.random_basis(functions, tables, dim),
        }

        debug!(
            functions = self.basis_shape().0,
            tables = self.basis_shape().1,
            pca = self.use_pca,
            "Generated LSH basis"
        );

        if !self.state.is_in_memory() && !self.write_params() {
            warn!("LSH parameters not persisted");
        }
        Ok(())
    }

    // ========================================================================
    // Hashing
    // ========================================================================

    /// Hash strings of `vector` for each active table. Empty before the
    /// first append, or when `vector` is not of the stored dimension.
    pub fn hash_values(&self, vector: &[f64]) -> Vec<String> {
        if !self.is_initialized() || self.state.dimension() != Some(vector.len()) {
            return Vec::new();
        }
        (0..self.num_hash_tables)
            .map(|t| {
                let mut hash = String::new();
                for j in 0..self.num_hash_functions {
                    let projected = dot_product(&self.projections[t][j], vector) + self.offsets[t][j];
                    let h = (projected / self.bucket_width).floor() as i64;
                    // Writing to a String cannot fail.
                    let _ = if h < 0 {
                        write!(hash, "n{}", h.unsigned_abs())
                    } else {
                        write!(hash, "p{h}")
                    };
                }
                hash
            })
            .collect()
    }

    /// Group points by hash per active table.
    fn distribute(
        &self,
        collection: &Collection,
    ) -> Result<Vec<BTreeMap<String, Collection>>, RetrievalError> {
        let mut grouped = vec![BTreeMap::<String, Collection>::new(); self.num_hash_tables];
        for (vector, metadata) in collection {
            for (table, hash) in self.hash_values(vector).into_iter().enumerate() {
                grouped[table]
                    .entry(hash)
                    .or_default()
                    .append_point(vector.clone(), metadata.clone())?;
            }
        }
        Ok(grouped)
    }

    fn add_to_tables(&mut self, collection: &Collection) -> Result<(), RetrievalError> {
        for (table, buckets) in self.distribute(collection)?.into_iter().enumerate() {
            for (hash, bucket) in buckets {
                if !self.write_bucket(bucket, table, &hash) {
                    return Err(RetrievalError::Io(std::io::Error::other(format!(
                        "failed to write bucket {hash} of table {table}"
                    ))));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Buckets
    // ========================================================================

    /// Contents of one bucket, empty when absent.
    pub fn read_bucket(&self, table: usize, hash: &str) -> Collection {
        if self.state.is_in_memory() {
            self.tables
                .get(table)
                .and_then(|buckets| buckets.get(hash))
                .cloned()
                .unwrap_or_default()
        } else {
            read_collection(self.bucket_path(table, hash))
        }
    }

    /// Append `collection` to one bucket.
    pub fn write_bucket(&mut self, collection: Collection, table: usize, hash: &str) -> bool {
        if self.state.is_in_memory() {
            let Some(buckets) = self.tables.get_mut(table) else {
                warn!(table, "No such hash table");
                return false;
            };
            match buckets.entry(hash.to_string()).or_default().append_collection(collection) {
                Ok(()) => true,
                Err(e) => {
                    warn!(table, hash, error = %e, "Failed to extend bucket");
                    false
                }
            }
        } else {
            let path = self.bucket_path(table, hash);
            let mut content = read_collection(&path);
            if let Err(e) = content.append_collection(collection) {
                warn!(table, hash, error = %e, "Failed to extend bucket");
                return false;
            }
            write_collection(&path, &content)
        }
    }

    /// Hash values of the non-empty buckets of `table`, sorted
    pub fn buckets(&self, table: usize) -> Vec<String> {
        if self.state.is_in_memory() {
            return self
                .tables
                .get(table)
                .map(|buckets| {
                    buckets
                        .iter()
                        .filter(|(_, c)| !c.is_empty())
                        .map(|(h, _)| h.clone())
                        .collect()
                })
                .unwrap_or_default();
        }

        let prefix = format!("{BUCKET_PREFIX}_");
        list_collection_files(self.table_dir(table), &[])
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    // ========================================================================
    // Tuning
    // ========================================================================

    /// Change the active `k` / `L` and rehash every stored point.
    ///
    /// Zero keeps the current value. Only supported in memory, and only within
    /// the generated basis; refused values keep the current setting.
    pub fn update_params(&mut self, k: usize, l: usize) -> Result<(), RetrievalError> {
        let k = if k == 0 { self.num_hash_functions } else { k };
        let l = if l == 0 { self.num_hash_tables } else { l };

        if !self.state.is_in_memory() {
            warn!("Cannot adjust hash tables of an out-of-core structure");
            return Ok(());
        }
        if !self.is_initialized() {
            self.num_hash_functions = k;
            self.num_hash_tables = l;
            return Ok(());
        }

        let (max_k, max_l) = self.basis_shape();
        if k <= max_k {
            self.num_hash_functions = k;
        } else {
            warn!(requested = k, kept = self.num_hash_functions, "Cannot adjust number of hash functions");
        }
        if l <= max_l {
            self.num_hash_tables = l;
        } else {
            warn!(requested = l, kept = self.num_hash_tables, "Cannot adjust number of hash tables");
        }

        let mut stored = Collection::empty();
        if let Some(first) = self.tables.first() {
            for bucket in first.values() {
                stored.append_collection(bucket.clone())?;
            }
        }
        for table in &mut self.tables {
            table.clear();
        }
        self.add_to_tables(&stored)?;

        debug!(
            k = self.num_hash_functions,
            l = self.num_hash_tables,
            points = stored.len(),
            "Rehashed LSH tables"
        );
        Ok(())
    }

    fn record(&self) -> LshRecord {
        LshRecord {
            dimension: self.state.dimension().unwrap_or(0),
            file_name_cache: self.state.file_name_cache().clone(),
            projections: self.projections.clone(),
            offsets: self.offsets.clone(),
            num_hash_functions: self.num_hash_functions,
            num_hash_tables: self.num_hash_tables,
            bucket_width: self.bucket_width,
            use_pca: self.use_pca,
        }
    }
}

impl Retrieval for Lsh {
    fn state(&self) -> &StructureState {
        &self.state
    }

    fn len(&self) -> usize {
        if self.state.is_in_memory() {
            return self
                .tables
                .first()
                .map_or(0, |buckets| buckets.values().map(Collection::len).sum());
        }
        if !self.is_initialized() {
            return 0;
        }
        list_collection_files(self.table_dir(0), &[])
            .iter()
            .filter_map(|p| VectorStore::open(with_appended_extension(p, VEC_EXT)).ok())
            .map(|store| store.count)
            .sum()
    }

    fn append(&mut self, collection: Collection, source: Option<&Path>) -> Result<(), RetrievalError> {
        if collection.is_empty() || self.state.is_cached(source) {
            return Ok(());
        }

        self.state.lock_dimension(&collection)?;
        if !self.is_initialized() {
            self.initialize(&collection)?;
        }
        self.add_to_tables(&collection)?;

        if source.is_some() {
            self.state.register(source);
            if !self.state.is_in_memory() && !self.write_params() {
                warn!("LSH parameters not persisted");
            }
        }
        debug!(points = collection.len(), "Appended to LSH structure");
        Ok(())
    }

    fn query(&self, point: &[f64], radius: f64) -> Result<Collection, RetrievalError> {
        if !self.state.check_query(point)? || !self.is_initialized() {
            return Ok(Collection::empty());
        }

        let mut candidates = Collection::empty();
        for (table, hash) in self.hash_values(point).iter().enumerate() {
            candidates.append_collection(self.read_bucket(table, hash))?;
        }

        let order = self.state.distance_order();
        let several_tables = self.num_hash_tables > 1;
        if self.state.is_in_memory() {
            if several_tables {
                candidates = deduplicate(&candidates, DedupOrdering::Identity);
            }
            filter_collection(&candidates, point, radius, order)
        } else {
            let hits = filter_collection(&candidates, point, radius, order)?;
            Ok(if several_tables {
                deduplicate(&hits, DedupOrdering::Value)
            } else {
                hits
            })
        }
    }

    fn write_params(&self) -> bool {
        if self.state.is_in_memory() {
            return false;
        }
        write_opaque(self.parameter_path(), &self.record())
    }

    fn read_params(&mut self) -> bool {
        if self.state.is_in_memory() {
            return false;
        }
        let Some(record) = read_opaque::<_, LshRecord>(self.parameter_path()) else {
            return false;
        };
        if !record.is_consistent() {
            warn!(path = %self.parameter_path().display(), "Inconsistent LSH parameters, ignoring");
            return false;
        }

        self.state.restore(record.dimension, record.file_name_cache);
        self.projections = record.projections;
        self.offsets = record.offsets;
        self.num_hash_functions = record.num_hash_functions;
        self.num_hash_tables = record.num_hash_tables;
        self.bucket_width = record.bucket_width;
        self.use_pca = record.use_pca;
        true
    }
}
