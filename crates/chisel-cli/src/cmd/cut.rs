use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use time::OffsetDateTime;
use tracing::debug;

use chisel_core::release::{Release, SliceKey};
use chisel_core::selection::Selection;
use chisel_cutter::{cut, Context, CutOptions};
use chisel_deb::{ArchiveOptions, DirArchive, PackageArchive};

pub fn run(
    release_dir: &Path,
    root: &Path,
    arch: &str,
    pool: &Path,
    slices: &[String],
) -> Result<()> {
    let keys: Result<Vec<SliceKey>> = slices
        .iter()
        .map(|s| SliceKey::parse(s).map_err(Into::into))
        .collect();
    let keys = keys?;

    let today = OffsetDateTime::now_utc().date();
    let release = Release::load(release_dir, today)
        .with_context(|| format!("cannot load release from {}", release_dir.display()))?;

    let selection = Selection::select(&release, &keys, arch)?;

    let mut archives: BTreeMap<String, Box<dyn PackageArchive>> = BTreeMap::new();
    for archive in release.archives.values() {
        if !archive.maintained {
            debug!(archive = %archive.name, "archive is out of maintenance");
        }
        let options = ArchiveOptions {
            label: archive.name.clone(),
            version: archive.version.clone(),
            arch: arch.to_string(),
            suites: archive.suites.clone(),
            components: archive.components.clone(),
            pro: archive.pro.as_str().to_string(),
        };
        archives.insert(
            archive.name.clone(),
            Box::new(DirArchive::open(pool, options)?),
        );
    }

    let context = Context::new(arch);
    let report = cut(&CutOptions {
        selection: &selection,
        archives: &archives,
        target: root,
        context: &context,
    })?;

    println!(
        "cut {} slices into {} ({} paths)",
        selection.slices.len(),
        root.display(),
        report.len()
    );
    Ok(())
}
