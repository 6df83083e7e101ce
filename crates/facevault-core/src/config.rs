//! Tunable defaults
//!
//! One explicit [`Settings`] value is handed to every constructor that needs
//! thresholds or LSH defaults. There is no global state.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Default hash family shape for one LSH basis mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LshDefaults {
    pub num_hash_functions: usize,
    pub num_hash_tables: usize,
    pub bucket_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Query radius used when recognising faces (default: 0.575)
    pub recognition_threshold: f64,

    /// Edge threshold of the clustering graph (default: 0.45)
    pub clustering_threshold: f64,

    /// Chinese Whispers passes (default: 30)
    pub cluster_iterations: usize,

    /// p of the p-norm used for radius filtering (default: 2)
    pub distance_order: u32,

    /// Random projection defaults (default: k=6, L=7, w=0.95)
    pub random_lsh: LshDefaults,

    /// PCA basis defaults (default: k=8, L=7, w=0.2)
    pub pca_lsh: LshDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.575,
            clustering_threshold: 0.45,
            cluster_iterations: 30,
            distance_order: 2,
            random_lsh: LshDefaults {
                num_hash_functions: 6,
                num_hash_tables: 7,
                bucket_width: 0.95,
            },
            pca_lsh: LshDefaults {
                num_hash_functions: 8,
                num_hash_tables: 7,
                bucket_width: 0.2,
            },
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// LSH defaults for the requested basis mode
    pub fn lsh_defaults(&self, use_pca: bool) -> LshDefaults {
        if use_pca {
            self.pca_lsh
        } else {
            self.random_lsh
        }
    }
}
