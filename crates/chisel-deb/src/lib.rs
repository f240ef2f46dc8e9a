//! chisel-deb
//!
//! Debian binary package reading:
//! - outer `ar` archive scanning for `control.tar*` and `data.tar*`
//! - decompression across gzip, xz, zstd, and plain members
//! - single-pass tar entry streaming with sanitised paths
//! - control-file metadata (`PackageInfo`)
//! - the `PackageArchive` capability consumed by the cutter, with a
//!   local package-pool implementation
//!
//! Remote archive fetching and InRelease verification are collaborator
//! concerns and live outside this workspace.

pub mod archive;
pub mod deb;
pub mod info;

pub use crate::archive::{ArchiveOptions, DirArchive, PackageArchive};
pub use crate::deb::{walk_data_tar, ItemKind, TarItem};
pub use crate::info::{read_package_info, PackageInfo};
