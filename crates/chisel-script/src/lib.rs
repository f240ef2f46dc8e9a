//! chisel-script
//!
//! A small, deterministic interpreter for slice mutation scripts.
//!
//! The language is a Starlark-like expression subset:
//! - one statement per line: `name = expr` or a bare expression
//! - `#` comments, blank lines ignored
//! - literals: strings (single or double quoted), integers, `True`,
//!   `False`, `None`, and lists
//! - operators: `+`, `-`, comparisons, attribute access, calls, indexing
//! - builtins: `len(x)`
//!
//! There are no loops, no imports, and no ambient authority: the only
//! way a script touches the world is the injected `content` capability
//! (`content.read`, `content.write`, `content.list`), and the host
//! decides what those are allowed to do. Given the same script and the
//! same content state, evaluation is fully deterministic.

mod content;
mod eval;
mod parse;
mod token;

pub use crate::content::{Content, MemoryContent};
pub use crate::eval::{run_script, Builtin, Value};
