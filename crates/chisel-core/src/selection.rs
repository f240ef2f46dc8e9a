//! Slice selection.
//!
//! A selection is the transitive closure of the requested slices over
//! their essentials, filtered by the target architecture, in topological
//! order with dependencies first. It also precomputes the prefer winner
//! for every contested path that intersects the selection.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::errors::{ChiselError, ChiselResult};
use crate::graph::tarjan_scc;
use crate::release::{PathKind, Release, Slice, SliceKey};

/// The value `generate` entries must carry to be usable.
const GENERATE_MANIFEST: &str = "manifest";

#[derive(Debug)]
pub struct Selection<'a> {
    pub release: &'a Release,
    /// Topologically ordered: essentials come before their dependents.
    pub slices: Vec<SliceKey>,
    pub arch: String,
    /// Winning package for each contested path reachable from the
    /// selection.
    prefers: BTreeMap<String, String>,
}

impl<'a> Selection<'a> {
    /// Resolve `keys` against `release` for the target `arch`.
    pub fn select(release: &'a Release, keys: &[SliceKey], arch: &str) -> ChiselResult<Selection<'a>> {
        let mut reached: BTreeSet<SliceKey> = BTreeSet::new();
        let mut queue: VecDeque<SliceKey> = keys.iter().cloned().collect();

        while let Some(key) = queue.pop_front() {
            let slice = release.slice(&key).ok_or_else(|| {
                ChiselError::selection(format!("slice {key} not found in release"))
            })?;
            if !reached.insert(key.clone()) {
                continue;
            }
            let package = &release.packages[&key.package];
            for (dep, info) in package.essential.iter().chain(slice.essential.iter()) {
                if *dep != key && info.applies_to(arch) && !reached.contains(dep) {
                    queue.push_back(dep.clone());
                }
            }
        }

        // Invalid generate values only fail when the declaring slice is
        // actually reached.
        for key in &reached {
            let slice = release.slice(key).expect("reached slice resolved above");
            for (path, info) in &slice.contents {
                if let PathKind::Generate { value } = &info.kind {
                    if value != GENERATE_MANIFEST {
                        return Err(ChiselError::selection(format!(
                            "slice {key} has invalid generate value for {path}: {value:?}"
                        )));
                    }
                }
            }
        }

        let slices = sort_slices(release, &reached, arch);
        let prefers = compute_prefers(release, &reached);

        Ok(Selection {
            release,
            slices,
            arch: arch.to_string(),
            prefers,
        })
    }

    /// Look up a slice that is part of the selection.
    pub fn slice(&self, key: &SliceKey) -> &'a Slice {
        self.release.slice(key).expect("selected slice must resolve")
    }

    /// Winning package for a contested path, when the selection reaches
    /// its prefer chain.
    pub fn prefer_for(&self, path: &str) -> Option<&str> {
        self.prefers.get(path).map(String::as_str)
    }

    /// Names of the packages with at least one selected slice, sorted.
    pub fn packages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.slices.iter().map(|k| k.package.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Topological order over the reached set, dependencies first. Tarjan
/// emits sinks first, and the release validator has already rejected
/// essential cycles.
fn sort_slices(release: &Release, reached: &BTreeSet<SliceKey>, arch: &str) -> Vec<SliceKey> {
    let mut successors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in reached {
        let slice = release.slice(key).expect("reached slice must resolve");
        let package = &release.packages[&key.package];
        let deps = package
            .essential
            .iter()
            .chain(slice.essential.iter())
            .filter(|(dep, info)| *dep != key && info.applies_to(arch) && reached.contains(dep))
            .map(|(dep, _)| dep.to_string())
            .collect();
        successors.insert(key.to_string(), deps);
    }
    tarjan_scc(&successors)
        .into_iter()
        .flatten()
        .map(|name| SliceKey::parse(&name).expect("selected keys are well formed"))
        .collect()
}

fn compute_prefers(release: &Release, reached: &BTreeSet<SliceKey>) -> BTreeMap<String, String> {
    let selected_packages: BTreeSet<&str> = reached.iter().map(|k| k.package.as_str()).collect();
    let mut prefers = BTreeMap::new();
    for (path, order) in &release.path_ordering {
        if let Some(winner) = order
            .iter()
            .find(|pkg| selected_packages.contains(pkg.as_str()))
        {
            prefers.insert(path.clone(), winner.clone());
        }
    }
    prefers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use time::macros::date;

    fn write_release(dir: &Path, chisel_yaml: &str, packages: &[(&str, &str)]) {
        fs::create_dir_all(dir.join("slices")).unwrap();
        fs::write(dir.join("chisel.yaml"), chisel_yaml).unwrap();
        for (name, body) in packages {
            fs::write(dir.join("slices").join(format!("{name}.yaml")), body).unwrap();
        }
    }

    const CHISEL_YAML: &str = r#"
format: v2
archives:
  ubuntu:
    version: "22.04"
    suites: [jammy]
    components: [main]
    priority: 10
maintenance:
  standard: 2027-06-01
  end-of-life: 2033-06-01
"#;

    fn sample_release(dir: &Path) -> Release {
        write_release(
            dir,
            CHISEL_YAML,
            &[
                (
                    "base-files",
                    "package: base-files\nslices:\n  core:\n    contents:\n      /etc/os-release:\n",
                ),
                (
                    "mypkg",
                    "package: mypkg\nslices:\n  libs:\n    essential:\n      - base-files_core\n    contents:\n      /usr/lib/libx.so:\n  bins:\n    essential:\n      - mypkg_libs\n    contents:\n      /usr/bin/x:\n",
                ),
            ],
        );
        Release::load(dir, date!(2026 - 01 - 01)).unwrap()
    }

    #[test]
    fn selection_pulls_essentials_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let release = sample_release(dir.path());
        let keys = vec![SliceKey::new("mypkg", "bins")];
        let selection = Selection::select(&release, &keys, "amd64").unwrap();
        let names: Vec<String> = selection.slices.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["base-files_core", "mypkg_libs", "mypkg_bins"]);
        assert_eq!(selection.packages(), vec!["base-files", "mypkg"]);
    }

    #[test]
    fn selection_rejects_unknown_slice() {
        let dir = tempfile::tempdir().unwrap();
        let release = sample_release(dir.path());
        let keys = vec![SliceKey::new("mypkg", "missing")];
        let err = Selection::select(&release, &keys, "amd64").unwrap_err();
        assert_eq!(err.category(), "selection");
    }

    #[test]
    fn arch_filtered_essentials_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_release(
            dir.path(),
            &CHISEL_YAML.replace("format: v2", "format: v3"),
            &[
                (
                    "extra",
                    "package: extra\nslices:\n  all:\n    contents:\n      /usr/share/extra:\n",
                ),
                (
                    "mypkg",
                    "package: mypkg\nslices:\n  libs:\n    essential:\n      extra_all:\n        arch: [i386]\n    contents:\n      /usr/lib/libx.so:\n",
                ),
            ],
        );
        let release = Release::load(dir.path(), date!(2026 - 01 - 01)).unwrap();
        let keys = vec![SliceKey::new("mypkg", "libs")];
        let selection = Selection::select(&release, &keys, "amd64").unwrap();
        assert_eq!(selection.slices.len(), 1);
        let selection = Selection::select(&release, &keys, "i386").unwrap();
        assert_eq!(selection.slices.len(), 2);
    }

    #[test]
    fn invalid_generate_fails_only_when_reached() {
        let dir = tempfile::tempdir().unwrap();
        write_release(
            dir.path(),
            CHISEL_YAML,
            &[
                (
                    "good",
                    "package: good\nslices:\n  all:\n    contents:\n      /usr/bin/good:\n",
                ),
                (
                    "bad",
                    "package: bad\nslices:\n  all:\n    contents:\n      /db/**: {generate: catalog}\n",
                ),
            ],
        );
        let release = Release::load(dir.path(), date!(2026 - 01 - 01)).unwrap();
        assert!(Selection::select(&release, &[SliceKey::new("good", "all")], "amd64").is_ok());
        let err =
            Selection::select(&release, &[SliceKey::new("bad", "all")], "amd64").unwrap_err();
        assert!(err.to_string().contains("generate"));
    }
}
