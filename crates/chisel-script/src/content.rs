//! The content capability scripts run against.
//!
//! Hosts hand the interpreter an implementation of `Content`; the
//! interpreter never sees a filesystem. Write policy (for chisel: only
//! paths declared `mutable: true`) is enforced by the implementation,
//! not by the language.

use std::collections::BTreeMap;

use chisel_core::errors::{ChiselError, ChiselResult};

pub trait Content {
    /// Read a file as text.
    fn read(&mut self, path: &str) -> ChiselResult<String>;

    /// Overwrite a file with text.
    fn write(&mut self, path: &str, data: &str) -> ChiselResult<()>;

    /// Names directly under `dir`, sorted.
    fn list(&mut self, dir: &str) -> ChiselResult<Vec<String>>;
}

/// An in-memory `Content` for tests: every path is writable.
#[derive(Debug, Default)]
pub struct MemoryContent {
    files: BTreeMap<String, String>,
}

impl MemoryContent {
    pub fn new() -> MemoryContent {
        MemoryContent::default()
    }

    pub fn insert(&mut self, path: &str, data: &str) {
        self.files.insert(path.to_string(), data.to_string());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}

impl Content for MemoryContent {
    fn read(&mut self, path: &str) -> ChiselResult<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ChiselError::mutation(format!("cannot read {path}: no such file")))
    }

    fn write(&mut self, path: &str, data: &str) -> ChiselResult<()> {
        self.files.insert(path.to_string(), data.to_string());
        Ok(())
    }

    fn list(&mut self, dir: &str) -> ChiselResult<Vec<String>> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        let mut names: Vec<String> = self
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((head, _)) => format!("{head}/"),
                None => rest.to_string(),
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
