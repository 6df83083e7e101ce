//! Fail-soft collection and parameter persistence
//!
//! A collection lives in two files sharing a prefix: `<prefix>.vec` (dense
//! matrix, see [`crate::format`]) and `<prefix>.dat` (JSON metadata sets).
//! Nothing here returns an error to the caller: writes report `false`, reads
//! fall back to an empty collection or `None`, and the cause is logged.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::collection::Collection;
use crate::format::{FormatError, VecWriter, META_EXT, VEC_EXT};
use crate::metadata::{read_metadata, write_metadata};
use crate::store::VectorStore;

/// `<prefix>.<ext>` without touching dots already in the prefix
pub fn with_appended_extension(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Drop a trailing `.vec` / `.dat` so callers can pass either file of a pair.
pub fn strip_collection_extension(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext == VEC_EXT || ext == META_EXT => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

fn write_vectors(path: &Path, collection: &Collection) -> Result<(), FormatError> {
    let mut writer = VecWriter::new(path, collection.dimension().unwrap_or(0))?;
    for v in collection.vectors() {
        writer.write_vector(v)?;
    }
    writer.finish()?;
    Ok(())
}

/// Write `collection` to `<prefix>.vec` and `<prefix>.dat`.
pub fn write_collection<P: AsRef<Path>>(prefix: P, collection: &Collection) -> bool {
    let prefix = prefix.as_ref();
    if prefix.as_os_str().is_empty() {
        warn!("Refusing to write collection: empty path");
        return false;
    }
    if prefix.is_dir() {
        warn!(path = %prefix.display(), "Refusing to write collection: path is a directory");
        return false;
    }

    let vec_path = with_appended_extension(prefix, VEC_EXT);
    if let Err(e) = write_vectors(&vec_path, collection) {
        warn!(path = %vec_path.display(), error = %e, "Failed to write vectors");
        return false;
    }

    let dat_path = with_appended_extension(prefix, META_EXT);
    if let Err(e) = write_metadata(&dat_path, collection.metadata_sets()) {
        warn!(path = %dat_path.display(), error = %e, "Failed to write metadata");
        return false;
    }

    debug!(path = %prefix.display(), points = collection.len(), "Wrote collection");
    true
}

/// Read the collection stored under `prefix`.
///
/// Returns an empty collection when either file is missing or unreadable,
/// or when the two files disagree.
pub fn read_collection<P: AsRef<Path>>(prefix: P) -> Collection {
    let prefix = strip_collection_extension(prefix.as_ref());
    if prefix.as_os_str().is_empty() || prefix.is_dir() {
        return Collection::empty();
    }

    let vec_path = with_appended_extension(&prefix, VEC_EXT);
    let dat_path = with_appended_extension(&prefix, META_EXT);
    if !vec_path.is_file() || !dat_path.is_file() {
        debug!(path = %prefix.display(), "No collection stored at path");
        return Collection::empty();
    }

    let vectors = match VectorStore::open(&vec_path).and_then(|store| store.to_vectors()) {
        Ok(vectors) => vectors,
        Err(e) => {
            warn!(path = %vec_path.display(), error = %e, "Failed to read vectors");
            return Collection::empty();
        }
    };

    let metadata = match read_metadata(&dat_path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(path = %dat_path.display(), error = %e, "Failed to read metadata");
            return Collection::empty();
        }
    };

    if vectors.len() != metadata.len() {
        warn!(
            path = %prefix.display(),
            vectors = vectors.len(),
            metadata = metadata.len(),
            "Vector and metadata files disagree"
        );
        return Collection::empty();
    }

    match Collection::new(vectors, metadata) {
        Ok(collection) => collection,
        Err(e) => {
            warn!(path = %prefix.display(), error = %e, "Stored collection is malformed");
            Collection::empty()
        }
    }
}

/// Persist a parameter record as JSON.
pub fn write_opaque<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, record: &T) -> bool {
    let path = path.as_ref();
    let bytes = match serde_json::to_vec(record) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to encode parameters");
            return false;
        }
    };
    match std::fs::write(path, bytes) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to write parameters");
            false
        }
    }
}

/// Load a parameter record written by [`write_opaque`].
pub fn read_opaque<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Option<T> {
    let path = path.as_ref();
    if !path.is_file() {
        debug!(path = %path.display(), "No parameter file");
        return None;
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read parameters");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to decode parameters");
            None
        }
    }
}

/// Every collection prefix below `root`, skipping directories named in
/// `excluded_dirs`. Sorted.
pub fn list_collection_files<P: AsRef<Path>>(root: P, excluded_dirs: &[&str]) -> Vec<PathBuf> {
    let mut prefixes: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0
                && e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(|n| excluded_dirs.contains(&n)))
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == VEC_EXT))
        .map(|e| e.path().with_extension(""))
        .collect();
    prefixes.sort();
    prefixes
}

/// Concatenation of every collection below `root`.
///
/// Collections whose dimension disagrees with the first one are skipped.
pub fn read_all_collections<P: AsRef<Path>>(root: P) -> Collection {
    let mut all = Collection::empty();
    for prefix in list_collection_files(root, &[]) {
        let collection = read_collection(&prefix);
        if let Err(e) = all.append_collection(collection) {
            warn!(path = %prefix.display(), error = %e, "Skipping collection");
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{MetadataEntry, MetadataSet, Vector};
    use serde::Deserialize;
    use tempfile::tempdir;

    fn sample() -> Collection {
        let md = |s: &str| -> MetadataSet { [MetadataEntry::point(s)].into_iter().collect() };
        Collection::new(
            vec![Vector::from(vec![1.0, 2.0]), Vector::from(vec![3.0, 4.0])],
            vec![md("a"), md("b")],
        )
        .unwrap()
    }

    #[test]
    fn test_collection_roundtrip() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("faces");

        assert!(write_collection(&prefix, &sample()));
        assert!(dir.path().join("faces.vec").is_file());
        assert!(dir.path().join("faces.dat").is_file());
        assert_eq!(read_collection(&prefix), sample());
        assert_eq!(read_collection(dir.path().join("faces.vec")), sample());
    }

    #[test]
    fn test_empty_collection_roundtrip() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("empty");

        assert!(write_collection(&prefix, &Collection::empty()));
        assert!(read_collection(&prefix).is_empty());
    }

    #[test]
    fn test_prefix_keeps_existing_dots() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("holiday.jpg");

        assert!(write_collection(&prefix, &sample()));
        assert!(dir.path().join("holiday.jpg.vec").is_file());
        assert_eq!(read_collection(&prefix).len(), 2);
    }

    #[test]
    fn test_write_rejects_bad_prefix() {
        let dir = tempdir().unwrap();
        assert!(!write_collection("", &sample()));
        assert!(!write_collection(dir.path(), &sample()));
        assert!(!write_collection(dir.path().join("missing/sub/faces"), &sample()));
    }

    #[test]
    fn test_read_missing_or_corrupt() {
        let dir = tempdir().unwrap();
        assert!(read_collection(dir.path().join("nothing")).is_empty());
        assert!(read_collection(dir.path()).is_empty());

        let prefix = dir.path().join("faces");
        assert!(write_collection(&prefix, &sample()));
        std::fs::write(dir.path().join("faces.dat"), b"[[]]").unwrap();
        assert!(read_collection(&prefix).is_empty());

        std::fs::remove_file(dir.path().join("faces.dat")).unwrap();
        assert!(read_collection(&prefix).is_empty());
    }

    #[test]
    fn test_read_header_larger_than_address_space() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("bad");
        let mut header = crate::format::MAGIC.to_vec();
        header.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        header.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        std::fs::write(dir.path().join("bad.vec"), header).unwrap();
        std::fs::write(dir.path().join("bad.dat"), b"[]").unwrap();

        assert!(read_collection(&prefix).is_empty());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Params {
        dimension: usize,
        names: Vec<String>,
    }

    #[test]
    fn test_opaque_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.dat");
        let params = Params {
            dimension: 128,
            names: vec!["a".into()],
        };

        assert!(write_opaque(&path, &params));
        assert_eq!(read_opaque::<_, Params>(&path), Some(params));
        assert_eq!(read_opaque::<_, Params>(dir.path().join("missing.dat")), None);

        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(read_opaque::<_, Params>(&path), None);
        assert!(!write_opaque(dir.path().join("no/such/dir.dat"), &1u32));
    }

    #[test]
    fn test_list_collection_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("lsh/table_0")).unwrap();

        assert!(write_collection(dir.path().join("b"), &sample()));
        assert!(write_collection(dir.path().join("nested/a"), &sample()));
        assert!(write_collection(dir.path().join("lsh/table_0/bucket_p1"), &sample()));
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let found = list_collection_files(dir.path(), &["lsh"]);
        assert_eq!(found, vec![dir.path().join("b"), dir.path().join("nested/a")]);

        let everything = list_collection_files(dir.path(), &[]);
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn test_read_all_collections() {
        let dir = tempdir().unwrap();
        assert!(write_collection(dir.path().join("one"), &sample()));
        assert!(write_collection(dir.path().join("two"), &sample()));
        let odd = Collection::new(vec![Vector::from(vec![1.0])], vec![]).unwrap();
        assert!(write_collection(dir.path().join("zz_odd"), &odd));

        assert_eq!(read_all_collections(dir.path()).len(), 4);
    }
}
