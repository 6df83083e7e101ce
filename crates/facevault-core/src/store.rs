//! Memory-mapped descriptor storage
//!
//! Zero-copy access to `.vec` files through the OS page cache. The data block
//! starts at byte 16, which keeps every `f64` 8-byte aligned inside the page
//! aligned mapping; `bytemuck::try_cast_slice` still checks it.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use crate::collection::Vector;
use crate::format::{FormatError, VecHeader, HEADER_SIZE};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index out of bounds: {index} >= {count}")]
    IndexOutOfBounds { index: usize, count: usize },

    #[error("Alignment error: byte slice not aligned to f64 (8 bytes)")]
    AlignmentError,
}

/// Read-only view over a .vec file
pub struct VectorStore {
    mmap: Mmap,
    pub count: usize,
    pub dim: usize,
}

impl VectorStore {
    /// Open a .vec file for reading
    ///
    /// # Safety
    ///
    /// Memory mapping is inherently unsafe: truncating the file while it is
    /// mapped may raise SIGBUS. Stores are opened, copied out and dropped
    /// within a single read, and a storage root has a single owner.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header = VecHeader::from_bytes(&mmap)?;

        let needed = header.file_size()?;
        if mmap.len() < needed {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("descriptor matrix needs {needed} bytes, file has {}", mmap.len()),
            )));
        }

        Ok(Self {
            mmap,
            count: header.count as usize,
            dim: header.dimensions as usize,
        })
    }

    /// Borrow row `index` straight from the mapping
    pub fn try_get(&self, index: usize) -> Result<&[f64], StoreError> {
        if index >= self.count {
            return Err(StoreError::IndexOutOfBounds {
                index,
                count: self.count,
            });
        }
        let row_len = self.dim * std::mem::size_of::<f64>();
        let start = HEADER_SIZE + index * row_len;
        let bytes = self
            .mmap
            .get(start..start + row_len)
            .ok_or(StoreError::IndexOutOfBounds {
                index,
                count: self.count,
            })?;
        bytemuck::try_cast_slice(bytes).map_err(|_| StoreError::AlignmentError)
    }

    pub fn memory_bytes(&self) -> usize {
        self.mmap.len()
    }

    /// Copy every row out of the mapping into owned vectors
    pub fn to_vectors(&self) -> Result<Vec<Vector>, StoreError> {
        (0..self.count)
            .map(|i| self.try_get(i).map(Vector::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::VecWriter;
    use tempfile::{tempdir, TempDir};

    /// Writes `rows` to `faces.vec` in a fresh temp dir.
    fn matrix_file(rows: &[&[f64]]) -> (TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.vec");
        let mut writer = VecWriter::new(&path, rows.first().map_or(0, |r| r.len())).unwrap();
        for row in rows {
            writer.write_vector(row).unwrap();
        }
        writer.finish().unwrap();
        (dir, path)
    }

    #[test]
    fn test_rows_are_served_from_the_mapping() {
        let (_dir, path) = matrix_file(&[&[0.25, -1.0, 3.5], &[7.0, 0.0, -0.5]]);
        let store = VectorStore::open(&path).unwrap();

        assert_eq!((store.count, store.dim), (2, 3));
        assert_eq!(store.try_get(1).unwrap(), &[7.0, 0.0, -0.5]);
        assert_eq!(store.memory_bytes(), std::fs::metadata(&path).unwrap().len() as usize);
        assert!(matches!(
            store.try_get(2),
            Err(StoreError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_short_file_is_refused() {
        let (_dir, path) = matrix_file(&[&[1.0, 1.0], &[2.0, 2.0]]);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(VectorStore::open(&path), Err(StoreError::Io(_))));
    }

    #[test]
    fn test_overflowing_header_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.vec");
        let header = VecHeader {
            count: 0x8000_0000,
            dimensions: 0x8000_0000,
        };
        std::fs::write(&path, header.to_bytes()).unwrap();

        assert!(matches!(
            VectorStore::open(&path),
            Err(StoreError::Format(FormatError::SizeOverflow { .. }))
        ));
    }

    #[test]
    fn test_owned_rows_keep_file_order() {
        let (_dir, path) = matrix_file(&[&[1.0], &[-2.0], &[3.0]]);
        let store = VectorStore::open(&path).unwrap();

        let owned: Vec<f64> = store
            .to_vectors()
            .unwrap()
            .iter()
            .map(|v| v.as_slice()[0])
            .collect();
        assert_eq!(owned, vec![1.0, -2.0, 3.0]);
    }
}
