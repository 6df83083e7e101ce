//! Feature-extraction seam
//!
//! Detection and description models live outside this crate. They hand their
//! output over as descriptor exports, which a [`DescriptorSource`] turns into
//! a [`Collection`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use facevault_core::collection::{Collection, CollectionError, MetadataEntry, MetadataSet, Vector};

/// File extension of descriptor exports
pub const EXPORT_EXT: &str = "json";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid descriptor export: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed descriptors: {0}")]
    Shape(#[from] CollectionError),
}

/// Anything that yields descriptors for a media file
pub trait DescriptorSource {
    fn extract(&self, path: &Path) -> Result<Collection, ExtractError>;

    /// Whether `path` looks like input for this source
    fn accepts(&self, path: &Path) -> bool;
}

/// On-disk export: parallel lists of descriptors and their provenance.
#[derive(Debug, Deserialize)]
struct DescriptorExport {
    vectors: Vec<Vec<f64>>,
    #[serde(default)]
    metadata: Vec<Vec<MetadataEntry>>,
}

/// Reads `{"vectors": [[f64]], "metadata": [[entry]]}` files.
///
/// Without a metadata list every descriptor is attributed to the export's
/// file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDescriptorSource;

impl DescriptorSource for JsonDescriptorSource {
    fn extract(&self, path: &Path) -> Result<Collection, ExtractError> {
        let reader = BufReader::new(File::open(path)?);
        let export: DescriptorExport = serde_json::from_reader(reader)?;

        let metadata: Vec<MetadataSet> = if export.metadata.is_empty() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            vec![[MetadataEntry::point(name)].into_iter().collect(); export.vectors.len()]
        } else {
            export
                .metadata
                .into_iter()
                .map(|entries| entries.into_iter().collect())
                .collect()
        };
        let vectors = export.vectors.into_iter().map(Vector::from).collect();

        let collection = Collection::new(vectors, metadata)?;
        debug!(path = %path.display(), points = collection.len(), "Extracted descriptors");
        Ok(collection)
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == EXPORT_EXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_with_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("party.json");
        std::fs::write(
            &path,
            r#"{
                "vectors": [[0.1, 0.2], [0.3, 0.4]],
                "metadata": [
                    [{"kind": "image", "source": "party.jpg", "top_left": [1, 2], "bottom_right": [30, 40]}],
                    [{"kind": "point", "source": "party.jpg"}]
                ]
            }"#,
        )
        .unwrap();

        let collection = JsonDescriptorSource.extract(&path).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.dimension(), Some(2));
        assert!(collection
            .metadata(0)
            .unwrap()
            .contains(&MetadataEntry::image("party.jpg", (1, 2), (30, 40))));
    }

    #[test]
    fn test_extract_defaults_metadata_to_file_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.json");
        std::fs::write(&path, r#"{"vectors": [[1.0, 0.0, 0.0]]}"#).unwrap();

        let collection = JsonDescriptorSource.extract(&path).unwrap();
        let expected: MetadataSet = [MetadataEntry::point("clip.json")].into_iter().collect();
        assert_eq!(collection.metadata(0).unwrap(), &expected);
    }

    #[test]
    fn test_extract_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            JsonDescriptorSource.extract(&dir.path().join("missing.json")),
            Err(ExtractError::Io(_))
        ));

        let ragged = dir.path().join("ragged.json");
        std::fs::write(&ragged, r#"{"vectors": [[1.0, 2.0], [1.0]]}"#).unwrap();
        assert!(matches!(
            JsonDescriptorSource.extract(&ragged),
            Err(ExtractError::Shape(_))
        ));

        assert!(JsonDescriptorSource.accepts(Path::new("a/b.json")));
        assert!(!JsonDescriptorSource.accepts(Path::new("a/b.vec")));
    }
}
