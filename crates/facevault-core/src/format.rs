//! .vec Binary File Format
//!
//! Dense descriptor matrix written next to a `.dat` metadata file.
//!
//! # Layout
//!
//! ```text
//! bytes 0..8     magic "FVVEC001"
//! bytes 8..12    row count N, u32 little endian
//! bytes 12..16   row length D, u32 little endian
//! bytes 16..     N rows of D f64 values, little endian, row-major
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut writer = VecWriter::new("faces.vec", 128)?;
//! writer.write_vector(&vec![0.1f64; 128])?;
//! writer.finish()?;
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

use thiserror::Error;

/// Magic bytes identifying a .vec file: "FVVEC001"
pub const MAGIC: [u8; 8] = *b"FVVEC001";

/// Header size in bytes: 8 (magic) + 4 (count) + 4 (dims) = 16
pub const HEADER_SIZE: usize = 16;

/// Extension of the dense vector file
pub const VEC_EXT: &str = "vec";

/// Extension of the metadata and parameter files
pub const META_EXT: &str = "dat";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic bytes: expected FVVEC001")]
    InvalidMagic,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Too many vectors for a u32 header")]
    CountOverflow,

    #[error("Header announces {count} x {dimensions} values, more than addressable")]
    SizeOverflow { count: u32, dimensions: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Parsed .vec file header
#[derive(Debug, Clone, Copy)]
pub struct VecHeader {
    pub count: u32,
    pub dimensions: u32,
}

impl VecHeader {
    /// Parse header from the first 16 bytes of a file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "File too small for header",
            )));
        }

        if bytes[0..8] != MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let mut count = [0u8; 4];
        count.copy_from_slice(&bytes[8..12]);
        let mut dimensions = [0u8; 4];
        dimensions.copy_from_slice(&bytes[12..16]);

        Ok(Self {
            count: u32::from_le_bytes(count),
            dimensions: u32::from_le_bytes(dimensions),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.dimensions.to_le_bytes());
        buf
    }

    /// Byte offset of the vector at `index`, `None` past `usize`
    #[inline(always)]
    pub fn offset(&self, index: usize) -> Option<usize> {
        index
            .checked_mul(self.dimensions as usize)?
            .checked_mul(std::mem::size_of::<f64>())?
            .checked_add(HEADER_SIZE)
    }

    /// Total byte length the header announces
    pub fn file_size(&self) -> Result<usize, FormatError> {
        self.offset(self.count as usize).ok_or(FormatError::SizeOverflow {
            count: self.count,
            dimensions: self.dimensions,
        })
    }
}

/// Streaming writer for .vec files
pub struct VecWriter {
    writer: BufWriter<File>,
    dimensions: usize,
    count: u32,
}

impl VecWriter {
    pub fn new<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, FormatError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        // Placeholder count, patched in finish()
        let header = VecHeader {
            count: 0,
            dimensions: dimensions as u32,
        };
        writer.write_all(&header.to_bytes())?;

        Ok(Self {
            writer,
            dimensions,
            count: 0,
        })
    }

    pub fn write_vector(&mut self, vector: &[f64]) -> Result<(), FormatError> {
        if vector.len() != self.dimensions {
            return Err(FormatError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if self.count == u32::MAX {
            return Err(FormatError::CountOverflow);
        }

        for &val in vector {
            self.writer.write_all(&val.to_le_bytes())?;
        }

        self.count += 1;
        Ok(())
    }

    /// Flush and patch the header with the final count
    pub fn finish(mut self) -> Result<u32, FormatError> {
        self.writer.flush()?;

        let file = self.writer.get_mut();
        file.seek(io::SeekFrom::Start(8))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.sync_all()?;

        Ok(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_layout_for_face_descriptors() {
        let header = VecHeader {
            count: 3,
            dimensions: 128,
        };
        let parsed = VecHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!((parsed.count, parsed.dimensions), (3, 128));

        // Rows are 128 f64 values, directly after the header.
        assert_eq!(parsed.offset(0), Some(HEADER_SIZE));
        assert_eq!(parsed.offset(2), Some(HEADER_SIZE + 2 * 1024));
        assert_eq!(parsed.file_size().unwrap(), HEADER_SIZE + 3 * 1024);
    }

    #[test]
    fn test_oversized_header_reports_overflow() {
        let header = VecHeader {
            count: u32::MAX,
            dimensions: u32::MAX,
        };
        assert_eq!(header.offset(usize::MAX), None);
        assert!(matches!(
            header.file_size(),
            Err(FormatError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_empty_matrix_is_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("none.vec");
        assert_eq!(VecWriter::new(&path, 0).unwrap().finish().unwrap(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_foreign_or_truncated_header_rejected() {
        let mut bytes = VecHeader { count: 1, dimensions: 2 }.to_bytes();
        assert!(VecHeader::from_bytes(&bytes).is_ok());
        bytes[0] = b'X';
        assert!(matches!(VecHeader::from_bytes(&bytes), Err(FormatError::InvalidMagic)));
        assert!(matches!(VecHeader::from_bytes(&bytes[..10]), Err(FormatError::Io(_))));
    }

    #[test]
    fn test_rows_follow_header_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.vec");

        let mut writer = VecWriter::new(&path, 2).unwrap();
        writer.write_vector(&[0.5, -0.25]).unwrap();
        assert!(matches!(
            writer.write_vector(&[1.0, 2.0, 3.0]),
            Err(FormatError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        writer.write_vector(&[0.75, 1.5]).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let bytes = std::fs::read(&path).unwrap();
        let header = VecHeader::from_bytes(&bytes).unwrap();
        assert_eq!((header.count, header.dimensions), (2, 2));
        assert_eq!(bytes.len(), header.file_size().unwrap());

        let values: Vec<f64> = bytes[HEADER_SIZE..]
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0.5, -0.25, 0.75, 1.5]);
    }
}
