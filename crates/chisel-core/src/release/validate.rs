//! Cross-document release validation.
//!
//! Runs after every package document has been parsed, in sorted package
//! order so that diagnostics are stable:
//! - archive references and priorities
//! - essential references and cycles
//! - per-path conflict detection, including the prefer-chain state
//!   machine and glob-versus-plain overlap
//!
//! Prefer chains are classified by building a per-path directed graph
//! (edge A -> B when package A declares `prefer: B`) and running Tarjan
//! over just that path's edges. Comparing the component list against the
//! expected linear chain catches cycles, Y-shapes, and disjoint graphs
//! without ad-hoc walks.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::errors::{ChiselError, ChiselResult};
use crate::graph::{has_cycle, tarjan_scc};
use crate::pathspec;

use super::{PathInfo, PathKind, Release};

pub(super) fn validate(release: &mut Release) -> ChiselResult<()> {
    check_archive_references(release)?;
    check_essentials(release)?;
    release.path_ordering = check_path_conflicts(release)?;
    Ok(())
}

fn check_archive_references(release: &Release) -> ChiselResult<()> {
    for (name, package) in &release.packages {
        if let Some(archive) = &package.archive {
            if !release.archives.contains_key(archive) {
                return Err(ChiselError::validation(format!(
                    "package {name} references unknown archive \"{archive}\""
                )));
            }
        }
    }
    if let Some(default) = &release.default_archive {
        if !release.archives.contains_key(default) {
            return Err(ChiselError::validation(format!(
                "default archive \"{default}\" is not defined"
            )));
        }
    }
    Ok(())
}

/// Essential references must resolve, and the essential graph must be
/// acyclic. Package-level essentials apply to every slice except the
/// referenced slice itself.
fn check_essentials(release: &Release) -> ChiselResult<()> {
    let mut successors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (package_name, package) in &release.packages {
        for (slice_name, slice) in &package.slices {
            let key = format!("{package_name}_{slice_name}");
            let mut deps = Vec::new();
            for dep in package.essential.keys().chain(slice.essential.keys()) {
                if release.slice(dep).is_none() {
                    return Err(ChiselError::validation(format!(
                        "slice {key} requires unknown slice {dep}"
                    )));
                }
                let dep = dep.to_string();
                if dep != key {
                    deps.push(dep);
                }
            }
            successors.insert(key, deps);
        }
    }
    for component in tarjan_scc(&successors) {
        if has_cycle(&successors, &component) {
            return Err(ChiselError::validation(format!(
                "essential loop detected: {}",
                component.join(", ")
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Declarer<'a> {
    package: &'a str,
    slice: &'a str,
    info: &'a PathInfo,
}

impl Declarer<'_> {
    fn key(&self) -> String {
        format!("{}_{}", self.package, self.slice)
    }
}

fn conflict_error(path: &str, a: &Declarer<'_>, b: &Declarer<'_>) -> ChiselError {
    let mut pair = [a.key(), b.key()];
    pair.sort();
    ChiselError::validation(format!(
        "slices {} and {} conflict on {}",
        pair[0], pair[1], path
    ))
}

fn check_path_conflicts(release: &Release) -> ChiselResult<BTreeMap<String, Vec<String>>> {
    let mut by_path: BTreeMap<&str, Vec<Declarer<'_>>> = BTreeMap::new();
    for (package_name, package) in &release.packages {
        for (slice_name, slice) in &package.slices {
            for (path, info) in &slice.contents {
                by_path.entry(path).or_default().push(Declarer {
                    package: package_name,
                    slice: slice_name,
                    info,
                });
            }
        }
    }

    let mut ordering = BTreeMap::new();
    for (path, declarers) in &by_path {
        // Same-package declarations must agree on everything, prefer
        // included; cross-package rules come after.
        for window in pairs_same_package(declarers) {
            let (a, b) = window;
            if !a.info.same_content(b.info) || a.info.prefer != b.info.prefer {
                return Err(conflict_error(path, &a, &b));
            }
        }

        let packages: Vec<&str> = {
            let mut v: Vec<&str> = declarers.iter().map(|d| d.package).collect();
            v.sort_unstable();
            v.dedup();
            v
        };
        let any_prefer = declarers.iter().any(|d| d.info.prefer.is_some());
        if packages.len() == 1 && !any_prefer {
            continue;
        }

        if !any_prefer {
            // No prefers at all: the path may be shared only when every
            // declaration is identical and the kind has a single possible
            // realisation. Extracted copies and globs always conflict
            // across packages.
            let first = first_declarer_of(declarers, packages[0]);
            for pkg in &packages[1..] {
                let other = first_declarer_of(declarers, pkg);
                if !first.info.same_content(other.info)
                    || matches!(first.info.kind, PathKind::Copy { .. } | PathKind::Glob)
                {
                    return Err(conflict_error(path, &first, &other));
                }
            }
            continue;
        }

        ordering.insert(
            (*path).to_string(),
            classify_prefer_chain(path, declarers, &packages)?,
        );
    }

    check_glob_overlap(&by_path)?;
    Ok(ordering)
}

/// All pairs of declarers that belong to the same package.
fn pairs_same_package<'a>(declarers: &[Declarer<'a>]) -> Vec<(Declarer<'a>, Declarer<'a>)> {
    declarers
        .iter()
        .tuple_combinations()
        .filter(|(a, b)| a.package == b.package)
        .map(|(a, b)| (*a, *b))
        .collect()
}

fn first_declarer_of<'a, 'b>(declarers: &'b [Declarer<'a>], package: &str) -> Declarer<'a> {
    let mut candidates: Vec<&Declarer<'a>> = declarers
        .iter()
        .filter(|d| d.package == package)
        .collect();
    candidates.sort_by_key(|d| (d.package, d.slice));
    *candidates[0]
}

/// Classify the per-path prefer graph and return the winner-first
/// package ordering.
fn classify_prefer_chain(
    path: &str,
    declarers: &[Declarer<'_>],
    packages: &[&str],
) -> ChiselResult<Vec<String>> {
    let nodes: BTreeSet<&str> = packages.iter().copied().collect();
    let mut successors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut tails: Vec<&str> = Vec::new();

    for pkg in packages {
        let prefer = first_declarer_of(declarers, pkg).info.prefer.as_deref();
        match prefer {
            Some(target) => {
                if !nodes.contains(target) {
                    return Err(ChiselError::validation(format!(
                        "package {pkg} prefers package \"{target}\" for {path}, which does not declare it"
                    )));
                }
                indegree.entry(target).or_default().push(pkg);
                successors.insert(pkg.to_string(), vec![target.to_string()]);
            }
            None => {
                tails.push(pkg);
                successors.insert(pkg.to_string(), Vec::new());
            }
        }
    }

    for (target, sources) in &indegree {
        if sources.len() > 1 {
            let mut sources = sources.clone();
            sources.sort_unstable();
            return Err(ChiselError::validation(format!(
                "packages {} and {} both prefer package \"{target}\" for {path}",
                sources[0], sources[1]
            )));
        }
    }

    let components = tarjan_scc(&successors);
    for component in &components {
        if has_cycle(&successors, component) {
            return Err(ChiselError::validation(format!(
                "prefer loop detected for {path}: {}",
                component.join(", ")
            )));
        }
    }

    if tails.len() != 1 {
        tails.sort_unstable();
        return Err(ChiselError::validation(format!(
            "cannot relate packages {} and {} with prefer for {path}",
            tails[0], tails[1]
        )));
    }

    // Single tail, in-degrees at most one, and no cycle: the graph is one
    // linear chain. Tarjan emits it tail first, which is winner first.
    Ok(components.into_iter().flatten().collect())
}

/// Globs may not reach across package boundaries into paths other
/// packages declare. Generate patterns count as plain paths here.
fn check_glob_overlap(by_path: &BTreeMap<&str, Vec<Declarer<'_>>>) -> ChiselResult<()> {
    let mut globs: Vec<(&str, Declarer<'_>)> = Vec::new();
    let mut plains: BTreeMap<&str, Vec<Declarer<'_>>> = BTreeMap::new();
    for (path, declarers) in by_path {
        for declarer in declarers {
            if matches!(declarer.info.kind, PathKind::Glob) {
                globs.push((path, *declarer));
            } else {
                plains.entry(path).or_default().push(*declarer);
            }
        }
    }

    for (pattern, glob) in &globs {
        for (path, owners) in &plains {
            for owner in owners {
                if owner.package != glob.package && pathspec::matches(pattern, path) {
                    return Err(conflict_error(path, glob, owner));
                }
            }
        }
    }
    Ok(())
}
