//! The slicer: one complete cut.
//!
//! Driving order is fully deterministic: packages alphabetical, tar
//! entry order within a package, slice topological order for the mutate
//! phase. Implicit parent directories take the mode the source tarball
//! declared for them, first writer wins; release validation has already
//! diagnosed any disagreement.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use chisel_core::errors::{ChiselError, ChiselResult};
use chisel_core::manifest::{write_manifest, ManifestPackage, WriteOptions};
use chisel_core::pathspec;
use chisel_core::release::{PathInfo, PathKind, Slice, SliceKey};
use chisel_core::report::{Report, ReportEntry};
use chisel_core::selection::Selection;
use chisel_deb::{walk_data_tar, ItemKind, PackageArchive, TarItem};

use crate::context::Context;
use crate::fsutil;
use crate::mutate;

/// File name of generated manifests, under each `generate` directory.
pub const MANIFEST_FILE: &str = "manifest.wall";

/// Compression level for manifest walls.
const MANIFEST_ZSTD_LEVEL: i32 = 3;

pub struct CutOptions<'a> {
    pub selection: &'a Selection<'a>,
    pub archives: &'a BTreeMap<String, Box<dyn PackageArchive>>,
    pub target: &'a Path,
    pub context: &'a Context,
}

/// Cut the selection into the target directory and return the report.
pub fn cut(options: &CutOptions<'_>) -> ChiselResult<Report> {
    let selection = options.selection;
    let release = selection.release;

    let mut by_package: BTreeMap<&str, Vec<&Slice>> = BTreeMap::new();
    for key in &selection.slices {
        by_package
            .entry(key.package.as_str())
            .or_default()
            .push(selection.slice(key));
    }

    let mut report = Report::new();
    let mut dir_modes: BTreeMap<String, u32> = BTreeMap::new();
    let mut generate_dirs: BTreeMap<String, BTreeSet<SliceKey>> = BTreeMap::new();
    let mut packages: Vec<ManifestPackage> = Vec::new();

    fsutil::make_dir(options.target, fsutil::DEFAULT_DIR_MODE)?;

    for (package_name, slices) in &by_package {
        options.context.check()?;
        let archive = resolve_archive(release, options.archives, package_name)?;
        let (reader, pkg_info) = archive.fetch(package_name)?;
        info!(
            package = %package_name,
            version = %pkg_info.version,
            archive = %archive.options().label,
            "cutting package"
        );
        cut_package(
            options,
            package_name,
            slices,
            reader,
            &mut report,
            &mut dir_modes,
            &mut generate_dirs,
        )?;
        packages.push(ManifestPackage {
            name: pkg_info.name,
            version: pkg_info.version,
            sha256: pkg_info.sha256,
            arch: pkg_info.arch,
        });
    }

    mutate::run(selection, &mut report, options.target)?;

    if !generate_dirs.is_empty() {
        write_manifests(options, &packages, &report, &generate_dirs)?;
    }

    Ok(report)
}

/// Pick the archive for one package: explicit pin first, then the v1
/// default, then the highest-priority archive that actually carries the
/// package. Pro archives outrank standard ones through their priority.
fn resolve_archive<'a>(
    release: &chisel_core::release::Release,
    archives: &'a BTreeMap<String, Box<dyn PackageArchive>>,
    package: &str,
) -> ChiselResult<&'a dyn PackageArchive> {
    let get = |name: &str| -> ChiselResult<&'a dyn PackageArchive> {
        archives
            .get(name)
            .map(|a| a.as_ref())
            .ok_or_else(|| ChiselError::archive(format!("archive \"{name}\" is not available")))
    };

    if let Some(pin) = &release.packages[package].archive {
        return get(pin);
    }
    if let Some(default) = &release.default_archive {
        return get(default);
    }

    let mut candidates: Vec<&chisel_core::release::ReleaseArchive> =
        release.archives.values().collect();
    candidates.sort_by_key(|a| std::cmp::Reverse(a.priority));
    for candidate in candidates {
        if let Some(archive) = archives.get(&candidate.name) {
            if archive.exists(package) {
                return Ok(archive.as_ref());
            }
        }
    }
    Err(ChiselError::archive(format!(
        "package {package} not found in any archive"
    )))
}

/// What an exact tar path should turn into.
#[derive(Debug)]
struct ExactTarget<'a> {
    /// Path the output lands at (differs from the tar path for
    /// `copy:` with an explicit source).
    out_path: &'a str,
    info: &'a PathInfo,
    slice: SliceKey,
}

fn cut_package(
    options: &CutOptions<'_>,
    package: &str,
    slices: &[&Slice],
    reader: Box<dyn Read>,
    report: &mut Report,
    dir_modes: &mut BTreeMap<String, u32>,
    generate_dirs: &mut BTreeMap<String, BTreeSet<SliceKey>>,
) -> ChiselResult<()> {
    let selection = options.selection;
    let root = options.target;

    // Split this package's content entries into what the tar walk must
    // satisfy and what is created from the declaration alone.
    let mut exact: BTreeMap<&str, Vec<ExactTarget<'_>>> = BTreeMap::new();
    let mut globs: Vec<(&str, SliceKey)> = Vec::new();
    let mut deferred: Vec<(SliceKey, &str, &PathInfo)> = Vec::new();

    for slice in slices {
        let key = slice.key();
        for (path, info) in &slice.contents {
            if !info.applies_to(&selection.arch) {
                continue;
            }
            if let Some(winner) = selection.prefer_for(path) {
                if winner != package {
                    continue;
                }
            }
            match &info.kind {
                PathKind::Copy { source } => {
                    let tar_path = source.as_deref().unwrap_or(path.as_str());
                    exact.entry(tar_path).or_default().push(ExactTarget {
                        out_path: path,
                        info,
                        slice: key.clone(),
                    });
                }
                PathKind::Dir { make: false } => {
                    exact.entry(path.as_str()).or_default().push(ExactTarget {
                        out_path: path,
                        info,
                        slice: key.clone(),
                    });
                }
                PathKind::Glob => globs.push((path.as_str(), key.clone())),
                PathKind::Text { .. }
                | PathKind::Symlink { .. }
                | PathKind::Dir { make: true }
                | PathKind::Generate { .. } => deferred.push((key.clone(), path, info)),
            }
        }
    }

    let copyright = format!("/usr/share/doc/{package}/copyright");
    let mut matched: BTreeSet<String> = BTreeSet::new();
    let mut matched_globs: BTreeSet<String> = BTreeSet::new();

    walk_data_tar(reader, |item, content| {
        options.context.check()?;

        if item.kind == ItemKind::Dir {
            dir_modes.entry(item.path.clone()).or_insert(item.mode);
        }

        let targets = exact.get(item.path.as_str());
        let glob_hits: Vec<(&str, &SliceKey)> = globs
            .iter()
            .filter(|(pattern, _)| pathspec::matches(pattern, &item.path))
            .map(|(pattern, key)| (*pattern, key))
            .collect();

        if targets.is_none() && glob_hits.is_empty() {
            if item.path == copyright && item.kind == ItemKind::File {
                fsutil::ensure_parents(root, &item.path, dir_modes)?;
                let out = fsutil::target_path(root, &item.path);
                fsutil::write_files(&[(out, item.mode)], content)?;
            }
            return Ok(());
        }
        if targets.is_some() {
            matched.insert(item.path.clone());
        }
        for (pattern, _) in &glob_hits {
            matched_globs.insert(pattern.to_string());
        }

        extract_item(
            options,
            item,
            content,
            targets.map(Vec::as_slice).unwrap_or(&[]),
            &glob_hits,
            report,
            dir_modes,
        )
    })?;

    // Every copy, directory, and glob entry must have found its content.
    let mut missing: Vec<&str> = exact
        .keys()
        .filter(|path| !matched.contains(**path))
        .copied()
        .collect();
    missing.extend(
        globs
            .iter()
            .map(|(pattern, _)| *pattern)
            .filter(|pattern| !matched_globs.contains(*pattern)),
    );
    if !missing.is_empty() {
        missing.sort_unstable();
        missing.dedup();
        return Err(ChiselError::extraction(format!(
            "no content at: {}",
            missing.join(", ")
        )));
    }

    // Declaration-only entries: text files, symlinks, made directories,
    // and generate directories.
    for (key, path, info) in deferred {
        match &info.kind {
            PathKind::Text { content } => {
                fsutil::ensure_parents(root, path, dir_modes)?;
                let mode = effective_mode(info, fsutil::DEFAULT_FILE_MODE);
                let out = fsutil::target_path(root, path);
                let (sha256, size) = fsutil::write_bytes(&out, mode, content.as_bytes())?;
                report.add(ReportEntry {
                    path: path.to_string(),
                    mode,
                    sha256: Some(sha256),
                    size: Some(size),
                    slices: [key].into(),
                    link: String::new(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
            }
            PathKind::Symlink { target } => {
                fsutil::ensure_parents(root, path, dir_modes)?;
                fsutil::make_symlink(target, &fsutil::target_path(root, path))?;
                report.add(ReportEntry {
                    path: path.to_string(),
                    mode: 0o777,
                    sha256: None,
                    size: None,
                    slices: [key].into(),
                    link: target.clone(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
            }
            PathKind::Dir { make: true } => {
                fsutil::ensure_parents(root, path, dir_modes)?;
                let mode = effective_mode(info, fsutil::DEFAULT_DIR_MODE);
                fsutil::make_dir(&fsutil::target_path(root, path), mode)?;
                report.add(ReportEntry {
                    path: path.to_string(),
                    mode,
                    sha256: None,
                    size: None,
                    slices: [key].into(),
                    link: String::new(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
            }
            PathKind::Generate { .. } => {
                // Selection already vetted the generate value.
                let dir = path
                    .strip_suffix("**")
                    .expect("generate patterns end with /**");
                fsutil::ensure_parents(root, dir, dir_modes)?;
                fsutil::make_dir(&fsutil::target_path(root, dir), fsutil::DEFAULT_DIR_MODE)?;
                report.add(ReportEntry {
                    path: dir.to_string(),
                    mode: fsutil::DEFAULT_DIR_MODE,
                    sha256: None,
                    size: None,
                    slices: [key.clone()].into(),
                    link: String::new(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
                generate_dirs
                    .entry(dir.to_string())
                    .or_default()
                    .insert(key);
            }
            _ => unreachable!("deferred entries are text/symlink/make/generate"),
        }
    }

    debug!(package, entries = report.len(), "package cut");
    Ok(())
}

fn effective_mode(info: &PathInfo, fallback: u32) -> u32 {
    if info.mode != 0 {
        info.mode
    } else {
        fallback
    }
}

/// Materialise one tar entry for every exact target and glob hit.
fn extract_item(
    options: &CutOptions<'_>,
    item: &TarItem,
    content: &mut dyn Read,
    targets: &[ExactTarget<'_>],
    glob_hits: &[(&str, &SliceKey)],
    report: &mut Report,
    dir_modes: &BTreeMap<String, u32>,
) -> ChiselResult<()> {
    let root = options.target;

    // (out path, mode override, slices) per produced path.
    let mut outputs: BTreeMap<&str, (u32, BTreeSet<SliceKey>)> = BTreeMap::new();
    for target in targets {
        let mode = effective_mode(target.info, item.mode);
        let entry = outputs
            .entry(target.out_path)
            .or_insert_with(|| (mode, BTreeSet::new()));
        entry.1.insert(target.slice.clone());
    }
    for (_, key) in glob_hits {
        let entry = outputs
            .entry(item.path.as_str())
            .or_insert_with(|| (item.mode, BTreeSet::new()));
        entry.1.insert((*key).clone());
    }

    match item.kind {
        ItemKind::File => {
            let mut files: Vec<(std::path::PathBuf, u32)> = Vec::new();
            for (out_path, (mode, _)) in &outputs {
                fsutil::ensure_parents(root, out_path, dir_modes)?;
                files.push((fsutil::target_path(root, out_path), *mode));
            }
            let (sha256, size) = fsutil::write_files(&files, content)?;
            if size != item.size {
                return Err(ChiselError::extraction(format!(
                    "size mismatch for {}: header says {}, read {}",
                    item.path, item.size, size
                )));
            }
            for (out_path, (mode, slices)) in outputs {
                report.add(ReportEntry {
                    path: out_path.to_string(),
                    mode,
                    sha256: Some(sha256.clone()),
                    size: Some(size),
                    slices,
                    link: String::new(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
            }
        }
        ItemKind::Dir => {
            for (out_path, (mode, slices)) in outputs {
                if !out_path.ends_with('/') {
                    return Err(ChiselError::extraction(format!(
                        "cannot extract directory {} to file path {out_path}",
                        item.path
                    )));
                }
                fsutil::ensure_parents(root, out_path, dir_modes)?;
                fsutil::make_dir(&fsutil::target_path(root, out_path), mode)?;
                report.add(ReportEntry {
                    path: out_path.to_string(),
                    mode,
                    sha256: None,
                    size: None,
                    slices,
                    link: String::new(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
            }
        }
        ItemKind::Symlink => {
            for (out_path, (_, slices)) in outputs {
                fsutil::ensure_parents(root, out_path, dir_modes)?;
                fsutil::make_symlink(&item.link, &fsutil::target_path(root, out_path))?;
                report.add(ReportEntry {
                    path: out_path.to_string(),
                    mode: 0o777,
                    sha256: None,
                    size: None,
                    slices,
                    link: item.link.clone(),
                    final_sha256: None,
                    hard_link_id: 0,
                })?;
            }
        }
        ItemKind::HardLink => {
            for (out_path, (_, slices)) in outputs {
                if report.get(&item.link).is_none() {
                    return Err(ChiselError::extraction(format!(
                        "hard link {} targets {}, which was not extracted",
                        item.path, item.link
                    )));
                }
                fsutil::ensure_parents(root, out_path, dir_modes)?;
                fsutil::make_hard_link(
                    &fsutil::target_path(root, &item.link),
                    &fsutil::target_path(root, out_path),
                )?;
                report.add_hard_link(out_path, &item.link, slices)?;
            }
        }
    }
    Ok(())
}

/// Build the manifest wall once and write it into every generate
/// directory, Zstandard-compressed, each file atomically.
fn write_manifests(
    options: &CutOptions<'_>,
    packages: &[ManifestPackage],
    report: &Report,
    generate_dirs: &BTreeMap<String, BTreeSet<SliceKey>>,
) -> ChiselResult<()> {
    let manifest_paths: Vec<String> = generate_dirs
        .keys()
        .map(|dir| format!("{dir}{MANIFEST_FILE}"))
        .collect();

    let write_options = WriteOptions {
        packages: packages.to_vec(),
        slices: options.selection.slices.clone(),
        report,
        manifest_paths: manifest_paths.clone(),
    };
    let mut wall = Vec::new();
    write_manifest(&write_options, &mut wall)?;
    let compressed = zstd::stream::encode_all(&wall[..], MANIFEST_ZSTD_LEVEL)
        .map_err(|e| ChiselError::manifest(format!("cannot compress manifest: {e}")))?;

    for path in &manifest_paths {
        let out = fsutil::target_path(options.target, path);
        fsutil::write_bytes_atomic(&out, 0o644, &compressed)?;
    }
    debug!(
        files = manifest_paths.len(),
        bytes = compressed.len(),
        "wrote manifest"
    );
    Ok(())
}
