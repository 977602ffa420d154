//! btide-core: bpkg descriptors, Merkle trees, completeness queries,
//! packet framing and configuration.
//! All other btide crates depend on this one.

pub mod bpkg;
pub mod config;
pub mod crypto;
pub mod merkle;
pub mod query;
pub mod wire;

pub use bpkg::{BpkgError, Chunk, PackageDescriptor};
pub use merkle::{MerkleError, MerkleTree};
pub use query::{FileStatus, QueryError, QueryResult};
