//! The package archive capability.
//!
//! The cutter consumes archives through the `PackageArchive` trait; how
//! packages actually arrive (HTTP mirrors, Pro endpoints, a directory of
//! downloaded `.deb` files) is the implementor's business. The returned
//! readers are single-pass.
//!
//! `DirArchive` serves packages from a local pool directory laid out as
//! `<root>/<name>_<version>_<arch>.deb` (or any `<name>_*.deb` /
//! `<name>.deb` naming). It backs the CLI and the integration suite.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use chisel_core::errors::{ChiselError, ChiselResult};

use crate::info::{read_package_info, PackageInfo};

/// Identity and scope of one archive, mirrored from the release.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub label: String,
    pub version: String,
    pub arch: String,
    pub suites: Vec<String>,
    pub components: Vec<String>,
    pub pro: String,
}

pub trait PackageArchive {
    fn options(&self) -> &ArchiveOptions;

    /// Cheap existence probe, used for archive selection.
    fn exists(&self, name: &str) -> bool;

    /// Metadata without the payload.
    fn info(&self, name: &str) -> ChiselResult<PackageInfo>;

    /// Single-pass reader over the package bytes, plus its metadata.
    fn fetch(&self, name: &str) -> ChiselResult<(Box<dyn Read>, PackageInfo)>;
}

/// A pool of `.deb` files in one directory.
#[derive(Debug)]
pub struct DirArchive {
    options: ArchiveOptions,
    pool: BTreeMap<String, PathBuf>,
}

impl DirArchive {
    pub fn open(root: &Path, options: ArchiveOptions) -> ChiselResult<DirArchive> {
        let mut pool = BTreeMap::new();
        let entries = fs::read_dir(root).map_err(|e| {
            ChiselError::archive(format!("cannot open pool {}: {e}", root.display()))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "deb").unwrap_or(false))
            .collect();
        paths.sort();
        for path in paths {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let name = stem.split('_').next().unwrap_or(stem).to_string();
            // First file wins; pools should not carry duplicates anyway.
            pool.entry(name).or_insert(path);
        }
        debug!(
            pool = %root.display(),
            packages = pool.len(),
            "opened package pool"
        );
        Ok(DirArchive { options, pool })
    }

    fn path_of(&self, name: &str) -> ChiselResult<&Path> {
        self.pool
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| {
                ChiselError::archive(format!(
                    "package {name} not found in archive {}",
                    self.options.label
                ))
            })
    }
}

impl PackageArchive for DirArchive {
    fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    fn exists(&self, name: &str) -> bool {
        self.pool.contains_key(name)
    }

    fn info(&self, name: &str) -> ChiselResult<PackageInfo> {
        let path = self.path_of(name)?;
        let sha256 = sha256_file(path)?;
        let file = fs::File::open(path)?;
        read_package_info(file, sha256)
    }

    fn fetch(&self, name: &str) -> ChiselResult<(Box<dyn Read>, PackageInfo)> {
        let info = self.info(name)?;
        let file = fs::File::open(self.path_of(name)?)?;
        Ok((Box::new(file), info))
    }
}

fn sha256_file(path: &Path) -> ChiselResult<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
