//! Execution context for one cut.
//!
//! The engine is single-threaded (manifest bytes must be
//! reproducible), so the context carries only what the driver needs:
//! the target architecture and a cooperative cancellation token checked
//! between packages and between tar entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chisel_core::errors::{ChiselError, ChiselResult};

/// Cloneable cancellation flag. Callers keep one clone and cancel from
/// wherever they like; the cut observes it at the next safe point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    pub arch: String,
    cancel: CancelToken,
}

impl Context {
    pub fn new(arch: impl Into<String>) -> Context {
        Context {
            arch: arch.into(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(arch: impl Into<String>, cancel: CancelToken) -> Context {
        Context {
            arch: arch.into(),
            cancel,
        }
    }

    /// Surface `Cancelled` at the earliest safe point.
    pub fn check(&self) -> ChiselResult<()> {
        if self.cancel.is_cancelled() {
            Err(ChiselError::Cancelled)
        } else {
            Ok(())
        }
    }
}
