//! btide-services: the package list, per-package chunk bookkeeping and the
//! peer list, built on btide-core's descriptor and query engine.

pub mod package;
pub mod peer;
mod ranges;

pub use package::{Package, PackageError, PackageList, PackageStatus};
pub use peer::{PeerEntry, PeerError, PeerList};
