//! Metadata sidecar files
//!
//! The `.dat` companion of a `.vec` file holds one metadata set per row as a
//! JSON array. Parameter records of the retrieval structures share the same
//! JSON encoding (see [`crate::persistence::write_opaque`]).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::collection::MetadataSet;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid metadata: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Write metadata sets in row order
pub fn write_metadata<P: AsRef<Path>>(path: P, sets: &[MetadataSet]) -> Result<(), MetadataError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, sets)?;
    writer.flush()?;
    Ok(())
}

/// Read metadata sets in row order
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<Vec<MetadataSet>, MetadataError> {
    let file = File::open(path)?;
    let sets = serde_json::from_reader(BufReader::new(file))?;
    Ok(sets)
}
