//! FaceVault: a face descriptor store with exact and LSH radius retrieval
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 facevault CLI (clap)                        │
//! │       create · retrieve · dedup · cluster · stats           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  DescriptorSource (extract)                 │
//! │           descriptor exports from external models           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       facevault-core                        │
//! │   Collection · persistence · Linear / LSH · dedup · cluster │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod extract;

pub use facevault_core::*;
