//! FaceVault Core – descriptor collections, persistence, and radius retrieval
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │       Post-processing: dedup · Chinese Whispers · tuning    │
//! │              parallel bucket dispatch (rayon)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Retrieval: Linear scan · p-stable LSH (+PCA)       │
//! │                 in memory or out-of-core                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │      Collection (shared f64 vectors + provenance sets)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │    Persistence: .vec matrix (mmap) · .dat metadata (JSON)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cluster;
pub mod collection;
pub mod comparison;
pub mod config;
pub mod dedup;
pub mod distance;
pub mod format;
pub mod metadata;
pub mod parallel;
pub mod pca;
pub mod persistence;
pub mod retrieval;
pub mod store;
pub mod tuning;

pub use cluster::cluster;
pub use collection::{Collection, MetadataEntry, MetadataSet, Vector};
pub use comparison::{compare, is_equal};
pub use config::Settings;
pub use dedup::{deduplicate, DedupOrdering};
pub use distance::{dot_product, l2_distance};
pub use persistence::{read_collection, write_collection};
pub use retrieval::{Linear, Lsh, LshParams, Retrieval, RetrievalError};
pub use store::VectorStore;
