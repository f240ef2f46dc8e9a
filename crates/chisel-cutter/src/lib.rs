//! chisel-cutter
//!
//! The cutting engine: given a validated selection, a set of package
//! archives, and a target directory, produce exactly the files the
//! selected slices describe, run the mutate phase, and materialise the
//! manifest for every `generate` directory.
//!
//! Failure semantics are deliberately blunt: errors are fatal and the
//! partial target tree is left in place for the caller to discard. There
//! is no rollback and no concurrent cutting against one target.

mod context;
mod fsutil;
mod mutate;
mod slicer;

pub use crate::context::{CancelToken, Context};
pub use crate::slicer::{cut, CutOptions, MANIFEST_FILE};
