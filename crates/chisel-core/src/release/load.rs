//! Release directory loading.
//!
//! Layout on disk:
//! - `<dir>/chisel.yaml`
//! - `<dir>/slices/**/<package>.yaml`
//!
//! Every slice definition file must agree with its `package` field, and
//! the whole set is validated as one universe before a `Release` is
//! handed out.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use time::Date;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{ChiselError, ChiselResult};

use super::{schema, validate, MaintPhase, Package, Release};

pub fn load_release_dir(dir: &Path, today: Date) -> ChiselResult<Release> {
    let chisel_yaml_path = dir.join("chisel.yaml");
    let text = fs::read_to_string(&chisel_yaml_path).map_err(|e| {
        ChiselError::config(format!("cannot read {}: {e}", chisel_yaml_path.display()))
    })?;
    let parsed = schema::parse_chisel_yaml(&text)?;

    let mut archives = parsed.archives;
    let phase = parsed.maintenance.phase(today);
    for archive in archives.values_mut() {
        archive.maintained = match phase {
            MaintPhase::Standard => true,
            MaintPhase::Expanded => archive.pro.is_pro(),
            MaintPhase::Legacy => archive.pro.is_fips(),
            MaintPhase::EndOfLife => false,
        };
        archive.old_release = phase == MaintPhase::EndOfLife && !archive.pro.is_pro();
    }

    let packages = load_slice_definitions(dir, parsed.format)?;
    debug!(
        packages = packages.len(),
        archives = archives.len(),
        format = parsed.format.as_str(),
        "loaded release"
    );

    let mut release = Release {
        format: parsed.format,
        archives,
        packages,
        maintenance: parsed.maintenance,
        path_ordering: BTreeMap::new(),
        default_archive: parsed.default_archive,
        public_keys: parsed.public_keys,
    };
    validate::validate(&mut release)?;
    Ok(release)
}

fn load_slice_definitions(
    dir: &Path,
    format: super::Format,
) -> ChiselResult<BTreeMap<String, Package>> {
    let slices_dir = dir.join("slices");
    let mut packages = BTreeMap::new();

    let mut entries: Vec<_> = WalkDir::new(&slices_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_file() && e.path().extension().map(|x| x == "yaml").unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    entries.sort();

    if entries.is_empty() {
        return Err(ChiselError::config(format!(
            "no slice definitions found under {}",
            slices_dir.display()
        )));
    }

    for path in entries {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let text = fs::read_to_string(&path)
            .map_err(|e| ChiselError::config(format!("cannot read {}: {e}", path.display())))?;
        let package = schema::parse_package_yaml(&path, &text, format)?;
        if package.name != stem {
            return Err(ChiselError::config(format!(
                "{}: filename must match the package field (\"{}\")",
                path.display(),
                package.name
            )));
        }
        if packages.insert(package.name.clone(), package).is_some() {
            return Err(ChiselError::config(format!(
                "{}: package \"{stem}\" defined more than once",
                path.display()
            )));
        }
    }

    Ok(packages)
}
