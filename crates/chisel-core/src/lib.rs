//! chisel-core
//!
//! Core primitives for chisel:
//! - Release model, per-format YAML schemas, and validation
//! - Slice selection with transitive essentials and prefer resolution
//! - Shell-like glob matching with Debian architecture filters
//! - Tarjan strongly-connected-components ordering
//! - jsonwall, a sorted line-oriented JSON record store
//! - Cut report (path records, hard-link grouping)
//! - Manifest schema, writer, reader, and cross-validation
//!
//! This crate performs no network I/O. Filesystem access is limited to
//! reading release definition files; materialising trees lives in
//! `chisel-cutter`.

pub mod arch;
pub mod errors;
pub mod graph;
pub mod jsonwall;
pub mod manifest;
pub mod pathspec;
pub mod release;
pub mod report;
pub mod selection;

pub use crate::errors::{ChiselError, ChiselResult};

/// Schema tag written into manifest jsonwalls.
pub const MANIFEST_SCHEMA: &str = "1.0";

/// Convenience re-exports.
pub mod prelude {
    pub use crate::jsonwall::{JsonWall, JsonWallWriter};
    pub use crate::manifest::{write_manifest, Manifest, WriteOptions};
    pub use crate::release::{PathInfo, PathKind, Release, Slice, SliceKey};
    pub use crate::report::{Report, ReportEntry};
    pub use crate::selection::Selection;
    pub use crate::{ChiselError, ChiselResult};
}
