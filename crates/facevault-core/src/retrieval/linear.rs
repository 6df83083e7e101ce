//! Exact linear-scan retrieval
//!
//! In memory, every appended point is merged into one resident collection.
//! Out-of-core, the structure only records collection file prefixes: named
//! sources are referenced where they are, anonymous batches are written to
//! `linear/data_<n>`. A query reads, filters and accumulates every recorded
//! file in turn.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    filter_collection, source_name, Retrieval, RetrievalError, StructureState, LINEAR_DIR,
};
use crate::collection::Collection;
use crate::config::Settings;
use crate::format::VEC_EXT;
use crate::persistence::{
    list_collection_files, read_collection, read_opaque, with_appended_extension,
    write_collection, write_opaque,
};
use crate::store::VectorStore;

/// Prefix of anonymous batches below `linear/`
const DATA_FILE_PREFIX: &str = "data";

fn absolute_path(path: &Path) -> Result<PathBuf, RetrievalError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Contents of `linear_parameter.dat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub dimension: usize,
    pub files: Vec<PathBuf>,
}

#[derive(Debug)]
enum Storage {
    /// Nothing appended yet
    Uninitialized,
    Memory(Collection),
    Files(Vec<PathBuf>),
}

pub struct Linear {
    state: StructureState,
    storage: Storage,
}

impl Linear {
    pub fn in_memory(settings: &Settings) -> Self {
        Self {
            state: StructureState::in_memory(settings.distance_order),
            storage: Storage::Uninitialized,
        }
    }

    /// Open (or create) an out-of-core structure below `root`.
    pub fn open<P: AsRef<Path>>(root: P, settings: &Settings) -> Result<Self, RetrievalError> {
        let root = root.as_ref();
        let mut linear = Self {
            state: StructureState::at_root(root, settings.distance_order)?,
            storage: Storage::Uninitialized,
        };

        if linear.state.is_in_memory() {
            return Ok(linear);
        }
        if linear.read_params() {
            info!(root = %root.display(), points = linear.len(), "Restored linear structure");
        } else {
            linear.append_folder(root)?;
            info!(root = %root.display(), points = linear.len(), "Initialized linear structure");
        }
        Ok(linear)
    }

    fn structure_dir(&self) -> PathBuf {
        self.state.path(LINEAR_DIR)
    }

    fn parameter_path(&self) -> PathBuf {
        self.state.path(&format!("{LINEAR_DIR}_parameter.dat"))
    }

    /// Recorded collection file prefixes (out-of-core only)
    pub fn files(&self) -> &[PathBuf] {
        match &self.storage {
            Storage::Files(files) => files,
            _ => &[],
        }
    }

    fn initialize(&mut self) -> Result<(), RetrievalError> {
        self.storage = if self.state.is_in_memory() {
            Storage::Memory(Collection::empty())
        } else {
            std::fs::create_dir_all(self.structure_dir())?;
            Storage::Files(Vec::new())
        };
        Ok(())
    }

    fn store_anonymous(&mut self, collection: &Collection) -> Result<(), RetrievalError> {
        let dir = self.structure_dir();
        let n = list_collection_files(&dir, &[]).len();
        let name = format!("{DATA_FILE_PREFIX}_{n}");
        let prefix = dir.join(&name);

        if !write_collection(&prefix, collection) {
            return Err(RetrievalError::Io(std::io::Error::other(format!(
                "failed to write {}",
                prefix.display()
            ))));
        }
        if let Storage::Files(files) = &mut self.storage {
            files.push(prefix);
        }
        self.state.register_name(name);
        Ok(())
    }
}

impl Retrieval for Linear {
    fn state(&self) -> &StructureState {
        &self.state
    }

    fn len(&self) -> usize {
        match &self.storage {
            Storage::Uninitialized => 0,
            Storage::Memory(collection) => collection.len(),
            Storage::Files(files) => files
                .iter()
                .filter_map(|f| VectorStore::open(with_appended_extension(f, VEC_EXT)).ok())
                .map(|store| store.count)
                .sum(),
        }
    }

    fn append(&mut self, collection: Collection, source: Option<&Path>) -> Result<(), RetrievalError> {
        if collection.is_empty() || self.state.is_cached(source) {
            return Ok(());
        }

        self.state.lock_dimension(&collection)?;
        if matches!(self.storage, Storage::Uninitialized) {
            self.initialize()?;
        }

        if self.state.is_in_memory() {
            if let Storage::Memory(resident) = &mut self.storage {
                resident.append_collection(collection)?;
            }
            self.state.register(source);
            return Ok(());
        }

        match source.filter(|s| source_name(Some(*s)).is_some()) {
            Some(path) => {
                let path = absolute_path(path)?;
                if let Storage::Files(files) = &mut self.storage {
                    files.push(path);
                }
                self.state.register(source);
            }
            None => self.store_anonymous(&collection)?,
        }
        if !self.write_params() {
            warn!("Linear parameters not persisted");
        }
        debug!(points = collection.len(), "Appended to linear structure");
        Ok(())
    }

    fn query(&self, point: &[f64], radius: f64) -> Result<Collection, RetrievalError> {
        if !self.state.check_query(point)? {
            return Ok(Collection::empty());
        }
        let order = self.state.distance_order();

        match &self.storage {
            Storage::Uninitialized => Ok(Collection::empty()),
            Storage::Memory(resident) => filter_collection(resident, point, radius, order),
            Storage::Files(files) => {
                let mut found = Collection::empty();
                for file in files {
                    let stored = read_collection(file);
                    found.append_collection(filter_collection(&stored, point, radius, order)?)?;
                }
                Ok(found)
            }
        }
    }

    fn write_params(&self) -> bool {
        if self.state.is_in_memory() {
            return false;
        }
        let params = LinearParams {
            dimension: self.state.dimension().unwrap_or(0),
            files: self.files().to_vec(),
        };
        write_opaque(self.parameter_path(), &params)
    }

    fn read_params(&mut self) -> bool {
        if self.state.is_in_memory() {
            return false;
        }
        let Some(params) = read_opaque::<_, LinearParams>(self.parameter_path()) else {
            return false;
        };

        let cache = params
            .files
            .iter()
            .filter_map(|f| source_name(Some(f.as_path())))
            .collect();
        self.state.restore(params.dimension, cache);
        self.storage = Storage::Files(params.files);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{MetadataEntry, MetadataSet, Vector};
    use tempfile::tempdir;

    fn example() -> Collection {
        let md = |s: &str| -> MetadataSet { [MetadataEntry::point(s)].into_iter().collect() };
        Collection::new(
            vec![Vector::from(vec![1.0, 2.0]), Vector::from(vec![3.0, 4.0])],
            vec![md("a"), md("b")],
        )
        .unwrap()
    }

    #[test]
    fn test_in_memory_query() {
        let mut linear = Linear::in_memory(&Settings::default());
        assert!(linear.query(&[1.0, 2.0], 1.0).unwrap().is_empty());

        linear.append(example(), None).unwrap();
        assert_eq!(linear.len(), 2);
        assert_eq!(linear.dimension(), Some(2));

        let hits = linear.query(&[1.5, 1.0], 5.0f64.sqrt() / 2.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits.vector(0).unwrap().as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_rejects_bad_queries_and_dimensions() {
        let mut linear = Linear::in_memory(&Settings::default());
        linear.append(example(), None).unwrap();

        assert!(matches!(linear.query(&[], 1.0), Err(RetrievalError::InvalidInput(_))));
        assert!(matches!(
            linear.query(&[1.0, 2.0, 3.0], 1.0),
            Err(RetrievalError::DimensionMismatch { .. })
        ));

        let wrong = Collection::new(vec![Vector::from(vec![1.0])], vec![]).unwrap();
        assert!(matches!(
            linear.append(wrong, None),
            Err(RetrievalError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_named_append_is_idempotent() {
        let mut linear = Linear::in_memory(&Settings::default());
        let source = Path::new("/media/party.jpg");
        linear.append(example(), Some(source)).unwrap();
        linear.append(example(), Some(source)).unwrap();

        assert_eq!(linear.len(), 2);
        assert_eq!(linear.file_name_cache().len(), 1);
        assert!(linear.file_name_cache().contains("party.jpg"));

        linear.append(example(), None).unwrap();
        assert_eq!(linear.len(), 4);
    }

    #[test]
    fn test_out_of_core_anonymous_batches() {
        let dir = tempdir().unwrap();
        let mut linear = Linear::open(dir.path(), &Settings::default()).unwrap();
        assert_eq!(linear.root_path(), Some(dir.path()));

        linear.append(example(), None).unwrap();
        linear.append(example(), None).unwrap();

        assert!(dir.path().join("linear/data_0.vec").is_file());
        assert!(dir.path().join("linear/data_1.dat").is_file());
        assert!(dir.path().join("linear_parameter.dat").is_file());
        assert_eq!(linear.len(), 4);
        assert_eq!(linear.query(&[3.0, 4.0], 0.1).unwrap().len(), 2);
    }

    #[test]
    fn test_out_of_core_restart() {
        let dir = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = source_dir.path().join("faces");
        assert!(write_collection(&source, &example()));

        {
            let mut linear = Linear::open(dir.path(), &Settings::default()).unwrap();
            linear.append_file(&with_appended_extension(&source, "vec")).unwrap();
            assert_eq!(linear.files().len(), 1);
        }

        let mut reopened = Linear::open(dir.path(), &Settings::default()).unwrap();
        assert_eq!(reopened.dimension(), Some(2));
        assert!(reopened.file_name_cache().contains("faces"));
        assert_eq!(reopened.len(), 2);

        reopened.append_file(&source).unwrap();
        assert_eq!(reopened.files().len(), 1);
        assert_eq!(reopened.query(&[1.0, 2.0], 0.0).unwrap().len(), 1);
    }

    #[test]
    fn test_open_ingests_existing_files() {
        let dir = tempdir().unwrap();
        assert!(write_collection(dir.path().join("old_batch"), &example()));

        let linear = Linear::open(dir.path(), &Settings::default()).unwrap();
        assert_eq!(linear.len(), 2);
        assert!(linear.file_name_cache().contains("old_batch"));
        assert!(dir.path().join("linear_parameter.dat").is_file());
    }

    #[test]
    fn test_append_file_rejects_missing_data() {
        let dir = tempdir().unwrap();
        let mut linear = Linear::in_memory(&Settings::default());
        assert!(matches!(
            linear.append_file(&dir.path().join("nothing")),
            Err(RetrievalError::InvalidInput(_))
        ));
        assert!(matches!(
            linear.append_file(Path::new("")),
            Err(RetrievalError::InvalidInput(_))
        ));
        assert!(matches!(
            linear.append_folder(&dir.path().join("missing")),
            Err(RetrievalError::InvalidInput(_))
        ));
    }
}
