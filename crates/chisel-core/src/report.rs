//! Cut report: a path-addressed record of what a cut produced.
//!
//! The report is append-only during extraction. Hard-link groups are
//! assigned lazily: the tar format carries link references, and when a
//! link is observed after its target both entries receive the same group
//! id. The mutate phase is the only thing allowed to change entries
//! afterwards, and only for regular files.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{ChiselError, ChiselResult};
use crate::release::SliceKey;

/// One produced path. Paths are rooted at `/` and directories keep
/// their trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub path: String,
    pub mode: u32,
    pub sha256: Option<String>,
    pub size: Option<u64>,
    pub slices: BTreeSet<SliceKey>,
    /// Symlink target; cleared for hard-link group members so that the
    /// group stays internally identical.
    pub link: String,
    /// Content hash after the mutate phase, when it changed.
    pub final_sha256: Option<String>,
    /// Non-zero groups equivalent inodes; 0 means not grouped.
    pub hard_link_id: u32,
}

#[derive(Debug, Default)]
pub struct Report {
    entries: BTreeMap<String, ReportEntry>,
    last_link_id: u32,
}

impl Report {
    pub fn new() -> Report {
        Report::default()
    }

    /// Record a produced path. Repeated calls for the same path are legal
    /// only when mode, link, size, and hash agree; the slice sets merge.
    pub fn add(&mut self, entry: ReportEntry) -> ChiselResult<()> {
        if !entry.path.starts_with('/') {
            return Err(ChiselError::extraction(format!(
                "report path {:?} is not rooted at /",
                entry.path
            )));
        }
        match self.entries.get_mut(&entry.path) {
            None => {
                self.entries.insert(entry.path.clone(), entry);
            }
            Some(existing) => {
                if existing.mode != entry.mode
                    || existing.link != entry.link
                    || existing.size != entry.size
                    || existing.sha256 != entry.sha256
                {
                    return Err(ChiselError::extraction(format!(
                        "path {} reported twice with diverging content",
                        entry.path
                    )));
                }
                existing.slices.extend(entry.slices);
            }
        }
        Ok(())
    }

    /// Record a hard link to an already-reported target. Both entries
    /// end up in the same group, sharing mode, hash, and size.
    pub fn add_hard_link(
        &mut self,
        path: &str,
        target: &str,
        slices: BTreeSet<SliceKey>,
    ) -> ChiselResult<()> {
        let group = {
            let target_entry = self.entries.get_mut(target).ok_or_else(|| {
                ChiselError::extraction(format!(
                    "hard link {path} arrived before its target {target}"
                ))
            })?;
            if target_entry.path.ends_with('/') {
                return Err(ChiselError::extraction(format!(
                    "cannot hard link to directory {target}"
                )));
            }
            if target_entry.hard_link_id == 0 {
                self.last_link_id += 1;
                target_entry.hard_link_id = self.last_link_id;
            }
            (
                target_entry.hard_link_id,
                target_entry.mode,
                target_entry.sha256.clone(),
                target_entry.size,
                target_entry.link.clone(),
                target_entry.final_sha256.clone(),
            )
        };
        self.add(ReportEntry {
            path: path.to_string(),
            mode: group.1,
            sha256: group.2,
            size: group.3,
            slices,
            link: group.4,
            final_sha256: group.5,
            hard_link_id: group.0,
        })
    }

    /// Update a regular file after the mutate phase. A hash equal to the
    /// original is a no-op.
    pub fn mutate(&mut self, path: &str, final_sha256: &str, size: u64) -> ChiselResult<()> {
        let entry = self.entries.get_mut(path).ok_or_else(|| {
            ChiselError::mutation(format!("cannot mutate path {path}: not in report"))
        })?;
        if entry.path.ends_with('/') {
            return Err(ChiselError::mutation(format!(
                "cannot mutate directory {path}"
            )));
        }
        if entry.sha256.as_deref() == Some(final_sha256) {
            return Ok(());
        }
        entry.final_sha256 = Some(final_sha256.to_string());
        entry.size = Some(size);
        Ok(())
    }

    /// Drop a path from the report (`until: mutate` handling).
    pub fn remove(&mut self, path: &str) -> Option<ReportEntry> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&ReportEntry> {
        self.entries.get(path)
    }

    /// Entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
