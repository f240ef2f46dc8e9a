//! The mutate phase.
//!
//! After extraction, slice mutation scripts run in slice topological
//! order against a `Content` capability scoped to the target tree:
//! - reads are allowed for any reported file
//! - writes are allowed only for paths declared `mutable: true`
//! - listings come from the report, so they are deterministic and never
//!   leak undeclared paths (the implicit copyright file included)
//!
//! Afterwards, paths whose every declaring slice said `until: mutate`
//! are deleted from the tree and the report, and mutable files that
//! changed get their final hash and size refreshed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tracing::debug;

use chisel_core::errors::{ChiselError, ChiselResult};
use chisel_core::pathspec;
use chisel_core::release::{PathKind, Until};
use chisel_core::report::Report;
use chisel_core::selection::Selection;
use chisel_script::{run_script, Content};

use crate::fsutil;

pub(crate) fn run(
    selection: &Selection<'_>,
    report: &mut Report,
    root: &Path,
) -> ChiselResult<()> {
    let plan = MutatePlan::build(selection, report);

    let mut content = TreeContent {
        root,
        report,
        mutable: &plan.mutable,
    };
    let mut ran = 0usize;
    for key in &selection.slices {
        let slice = selection.slice(key);
        if let Some(script) = &slice.mutate {
            run_script(script, &mut content)
                .map_err(|e| ChiselError::mutation(format!("slice {key}: {e}")))?;
            ran += 1;
        }
    }

    for path in &plan.until_mutate {
        let absolute = fsutil::target_path(root, path);
        if path.ends_with('/') {
            // Directories scheduled for removal go only when empty.
            let _ = fs::remove_dir(&absolute);
        } else {
            fs::remove_file(&absolute)?;
        }
        report.remove(path);
    }

    for path in &plan.mutable {
        if report.get(path).is_none() {
            continue;
        }
        let (sha256, size) = fsutil::sha256_file(&fsutil::target_path(root, path))?;
        report.mutate(path, &sha256, size)?;
    }

    debug!(
        scripts = ran,
        dropped = plan.until_mutate.len(),
        "mutate phase complete"
    );
    Ok(())
}

struct MutatePlan {
    /// Paths writable by scripts.
    mutable: BTreeSet<String>,
    /// Paths to drop after the scripts ran.
    until_mutate: Vec<String>,
}

impl MutatePlan {
    fn build(selection: &Selection<'_>, report: &Report) -> MutatePlan {
        let mut mutable = BTreeSet::new();
        // Per reported path: does every declaration that produced it say
        // `until: mutate`?
        let mut until: BTreeMap<&str, bool> = BTreeMap::new();

        for key in &selection.slices {
            let slice = selection.slice(key);
            for (path, info) in &slice.contents {
                if !info.applies_to(&selection.arch) {
                    continue;
                }
                if let Some(winner) = selection.prefer_for(path) {
                    if winner != key.package {
                        continue;
                    }
                }
                let is_mutate = info.until == Until::Mutate;
                match &info.kind {
                    PathKind::Copy { .. } | PathKind::Text { .. } => {
                        if info.mutable {
                            mutable.insert(path.clone());
                        }
                        if report.get(path).is_some() {
                            until
                                .entry(path)
                                .and_modify(|v| *v &= is_mutate)
                                .or_insert(is_mutate);
                        }
                    }
                    PathKind::Symlink { .. } | PathKind::Dir { .. } => {
                        if report.get(path).is_some() {
                            until
                                .entry(path)
                                .and_modify(|v| *v &= is_mutate)
                                .or_insert(is_mutate);
                        }
                    }
                    // Glob declarations are resolved against the report
                    // in the second pass below.
                    PathKind::Glob | PathKind::Generate { .. } => {}
                }
            }
        }

        // Glob declarations need a second pass keyed by report paths.
        let mut glob_until: Vec<(String, bool)> = Vec::new();
        for key in &selection.slices {
            let slice = selection.slice(key);
            for (pattern, info) in &slice.contents {
                if !matches!(info.kind, PathKind::Glob) || !info.applies_to(&selection.arch) {
                    continue;
                }
                let is_mutate = info.until == Until::Mutate;
                for entry in report.entries() {
                    if entry.slices.contains(key) && pathspec::matches(pattern, &entry.path) {
                        glob_until.push((entry.path.clone(), is_mutate));
                    }
                }
            }
        }

        let mut until: BTreeMap<String, bool> = until
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for (path, is_mutate) in glob_until {
            until
                .entry(path)
                .and_modify(|v| *v &= is_mutate)
                .or_insert(is_mutate);
        }

        let until_mutate: Vec<String> = until
            .into_iter()
            .filter_map(|(path, all_mutate)| all_mutate.then_some(path))
            .collect();

        MutatePlan {
            mutable,
            until_mutate,
        }
    }
}

/// The content capability scripts see: the target tree, filtered and
/// policed through the report.
struct TreeContent<'a> {
    root: &'a Path,
    report: &'a Report,
    mutable: &'a BTreeSet<String>,
}

impl Content for TreeContent<'_> {
    fn read(&mut self, path: &str) -> ChiselResult<String> {
        let entry = self
            .report
            .get(path)
            .ok_or_else(|| ChiselError::mutation(format!("cannot read {path}: no such file")))?;
        if entry.path.ends_with('/') || !entry.link.is_empty() {
            return Err(ChiselError::mutation(format!(
                "cannot read {path}: not a regular file"
            )));
        }
        fs::read_to_string(fsutil::target_path(self.root, path))
            .map_err(|e| ChiselError::mutation(format!("cannot read {path}: {e}")))
    }

    fn write(&mut self, path: &str, data: &str) -> ChiselResult<()> {
        if !self.mutable.contains(path) {
            return Err(ChiselError::mutation(format!(
                "cannot write to {path}: not mutable"
            )));
        }
        let entry = self
            .report
            .get(path)
            .ok_or_else(|| ChiselError::mutation(format!("cannot write to {path}: not in report")))?;
        fsutil::write_bytes(
            &fsutil::target_path(self.root, path),
            entry.mode,
            data.as_bytes(),
        )?;
        Ok(())
    }

    fn list(&mut self, dir: &str) -> ChiselResult<Vec<String>> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        let mut names: Vec<String> = self
            .report
            .entries()
            .filter_map(|entry| entry.path.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty())
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
