//! Error taxonomy for chisel.
//!
//! Every failure surfaces as one `ChiselError` case so that callers can
//! branch on category without string matching:
//! - `Config`: YAML parse, grammar, unknown format, missing maintenance field
//! - `Validation`: conflicts, cycles, prefer-graph shape, priority clash
//! - `Selection`: slice not found, invalid generate reached
//! - `Archive`: opaque wrapper from the archive collaborator
//! - `Extraction`: ar/tar parse failure, checksum mismatch, escaping paths
//! - `Mutation`: script failure, write to a non-mutable path
//! - `Manifest`: schema mismatch, invariant breach during write/validate
//! - `Io`: filesystem operation failure
//! - `Cancelled`: cooperative cancellation observed
//!
//! Errors propagate to the top-level driver verbatim; there is no silent
//! recovery anywhere in the core.

use thiserror::Error;

pub type ChiselResult<T> = Result<T, ChiselError>;

#[derive(Debug, Error)]
pub enum ChiselError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Selection(String),

    #[error("cannot use archive: {0}")]
    Archive(String),

    #[error("cannot extract from package: {0}")]
    Extraction(String),

    #[error("cannot run mutation scripts: {0}")]
    Mutation(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl ChiselError {
    pub fn config(msg: impl Into<String>) -> Self {
        ChiselError::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ChiselError::Validation(msg.into())
    }

    pub fn selection(msg: impl Into<String>) -> Self {
        ChiselError::Selection(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        ChiselError::Archive(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        ChiselError::Extraction(msg.into())
    }

    pub fn mutation(msg: impl Into<String>) -> Self {
        ChiselError::Mutation(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        ChiselError::Manifest(msg.into())
    }

    /// Category name, for logs and tests.
    pub fn category(&self) -> &'static str {
        match self {
            ChiselError::Config(_) => "config",
            ChiselError::Validation(_) => "validation",
            ChiselError::Selection(_) => "selection",
            ChiselError::Archive(_) => "archive",
            ChiselError::Extraction(_) => "extraction",
            ChiselError::Mutation(_) => "mutation",
            ChiselError::Manifest(_) => "manifest",
            ChiselError::Io(_) => "io",
            ChiselError::Cancelled => "cancelled",
        }
    }
}
