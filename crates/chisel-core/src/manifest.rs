//! Manifest encoding: the durable record of a cut.
//!
//! Four record kinds live in one jsonwall with schema `1.0`. Each kind
//! leads with a distinct `kind` field so the sorted wall groups them,
//! and field declaration order below is the wire order:
//! - `package`: kind, name, version, sha256, arch
//! - `slice`: kind, name
//! - `path`: kind, path, mode, slices, sha256, final_sha256, size, link,
//!   hard_link_id
//! - `content`: kind, slice, path
//!
//! The writer validates its inputs before emitting anything; the reader
//! exposes typed prefix iterators; `Manifest::validate` cross-checks the
//! record kinds against each other.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::errors::{ChiselError, ChiselResult};
use crate::jsonwall::{JsonWall, JsonWallWriter, WallError};
use crate::release::SliceKey;
use crate::report::Report;
use crate::MANIFEST_SCHEMA;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub kind: String,
    pub name: String,
    pub version: String,
    pub sha256: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub kind: String,
    pub path: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_link_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub kind: String,
    pub slice: String,
    pub path: String,
}

/// One installed package, as reported by the archive collaborator.
#[derive(Debug, Clone)]
pub struct ManifestPackage {
    pub name: String,
    pub version: String,
    pub sha256: String,
    pub arch: String,
}

/// Inputs for one manifest.
#[derive(Debug)]
pub struct WriteOptions<'a> {
    pub packages: Vec<ManifestPackage>,
    pub slices: Vec<SliceKey>,
    pub report: &'a Report,
    /// Paths of the manifest files themselves. They get a plain `0644`
    /// record with no hashes: a file cannot contain its own digest.
    pub manifest_paths: Vec<String>,
}

/// Render permission bits the Debian way: octal with a leading zero.
fn format_mode(mode: u32) -> String {
    format!("0{:o}", mode)
}

/// Validate `options` and stream the manifest wall into `sink`.
pub fn write_manifest<W: Write>(options: &WriteOptions<'_>, sink: &mut W) -> ChiselResult<()> {
    validate_options(options)?;

    let mut wall = JsonWallWriter::new(MANIFEST_SCHEMA);
    for package in &options.packages {
        wall.add(&PackageRecord {
            kind: "package".to_string(),
            name: package.name.clone(),
            version: package.version.clone(),
            sha256: package.sha256.clone(),
            arch: package.arch.clone(),
        })
        .map_err(wall_error)?;
    }
    for slice in &options.slices {
        wall.add(&SliceRecord {
            kind: "slice".to_string(),
            name: slice.to_string(),
        })
        .map_err(wall_error)?;
    }
    for entry in options.report.entries() {
        wall.add(&PathRecord {
            kind: "path".to_string(),
            path: entry.path.clone(),
            mode: format_mode(entry.mode),
            slices: entry.slices.iter().map(SliceKey::to_string).collect(),
            sha256: entry.sha256.clone(),
            final_sha256: entry.final_sha256.clone(),
            size: entry.size,
            link: (!entry.link.is_empty()).then(|| entry.link.clone()),
            hard_link_id: (entry.hard_link_id != 0).then_some(entry.hard_link_id),
        })
        .map_err(wall_error)?;
        for slice in &entry.slices {
            wall.add(&ContentRecord {
                kind: "content".to_string(),
                slice: slice.to_string(),
                path: entry.path.clone(),
            })
            .map_err(wall_error)?;
        }
    }
    for path in &options.manifest_paths {
        wall.add(&PathRecord {
            kind: "path".to_string(),
            path: path.clone(),
            mode: format_mode(0o644),
            slices: Vec::new(),
            sha256: None,
            final_sha256: None,
            size: None,
            link: None,
            hard_link_id: None,
        })
        .map_err(wall_error)?;
    }

    wall.write_to(sink).map_err(wall_error)
}

fn wall_error(err: WallError) -> ChiselError {
    match err {
        WallError::Io(e) => ChiselError::Io(e),
        other => ChiselError::manifest(other.to_string()),
    }
}

fn validate_options(options: &WriteOptions<'_>) -> ChiselResult<()> {
    let package_names: BTreeSet<&str> =
        options.packages.iter().map(|p| p.name.as_str()).collect();
    let slice_names: BTreeSet<String> =
        options.slices.iter().map(SliceKey::to_string).collect();

    for slice in &options.slices {
        if !package_names.contains(slice.package.as_str()) {
            return Err(ChiselError::manifest(format!(
                "slice {slice} refers to missing package \"{}\"",
                slice.package
            )));
        }
    }

    let mut groups: BTreeMap<u32, Vec<&crate::report::ReportEntry>> = BTreeMap::new();
    for entry in options.report.entries() {
        for slice in &entry.slices {
            if !slice_names.contains(&slice.to_string()) {
                return Err(ChiselError::manifest(format!(
                    "path {} refers to unknown slice {slice}",
                    entry.path
                )));
            }
        }
        let is_dir = entry.path.ends_with('/');
        let is_link = !entry.link.is_empty();
        if is_dir
            && (entry.sha256.is_some()
                || entry.size.is_some()
                || is_link
                || entry.hard_link_id != 0)
        {
            return Err(ChiselError::manifest(format!(
                "directory {} carries file attributes",
                entry.path
            )));
        }
        if is_link && (entry.sha256.is_some() || entry.size.is_some()) {
            return Err(ChiselError::manifest(format!(
                "symlink {} carries content attributes",
                entry.path
            )));
        }
        if !is_dir && !is_link && (entry.sha256.is_none() || entry.size.is_none()) {
            return Err(ChiselError::manifest(format!(
                "file {} is missing its hash or size",
                entry.path
            )));
        }
        if entry.hard_link_id != 0 {
            groups.entry(entry.hard_link_id).or_default().push(entry);
        }
    }

    // Group ids are dense from 1 and every group holds at least two
    // internally identical entries.
    let expected: u32 = groups.keys().len() as u32;
    for (i, (id, members)) in groups.iter().enumerate() {
        if *id != i as u32 + 1 || *id > expected {
            return Err(ChiselError::manifest(format!(
                "hard link group ids are not dense: missing group {}",
                i + 1
            )));
        }
        if members.len() < 2 {
            return Err(ChiselError::manifest(format!(
                "hard link group {id} has a single member"
            )));
        }
        let first = members[0];
        for member in &members[1..] {
            if member.mode != first.mode
                || member.link != first.link
                || member.size != first.size
                || member.sha256 != first.sha256
                || member.final_sha256 != first.final_sha256
            {
                return Err(ChiselError::manifest(format!(
                    "hard link group {id} members diverge: {} vs {}",
                    first.path, member.path
                )));
            }
        }
    }

    Ok(())
}

/// Read-only view over a manifest wall.
#[derive(Debug)]
pub struct Manifest {
    wall: JsonWall,
}

#[derive(Serialize)]
struct KindPrefix<'a> {
    kind: &'a str,
}

#[derive(Serialize)]
struct PathPrefix<'a> {
    kind: &'a str,
    path: &'a str,
}

#[derive(Serialize)]
struct NamePrefix<'a> {
    kind: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct SlicePrefix<'a> {
    kind: &'a str,
    slice: &'a str,
}

impl Manifest {
    /// Load a manifest from uncompressed wall bytes.
    pub fn read<R: Read>(source: R) -> ChiselResult<Manifest> {
        let wall = JsonWall::read(source).map_err(wall_error)?;
        if wall.schema() != MANIFEST_SCHEMA {
            return Err(ChiselError::manifest(format!(
                "unsupported manifest schema \"{}\"",
                wall.schema()
            )));
        }
        Ok(Manifest { wall })
    }

    pub fn iter_packages(&self) -> ChiselResult<impl Iterator<Item = ChiselResult<PackageRecord>> + '_> {
        let iter = self
            .wall
            .iter_prefix::<_, PackageRecord>(&KindPrefix { kind: "package" })
            .map_err(wall_error)?;
        Ok(iter.map(|r| r.map_err(wall_error)))
    }

    /// Slices of `package`; every slice when `package` is empty.
    pub fn iter_slices(&self, package: &str) -> ChiselResult<impl Iterator<Item = ChiselResult<SliceRecord>> + '_> {
        let prefix = if package.is_empty() {
            String::new()
        } else {
            format!("{package}_")
        };
        let iter = self
            .wall
            .iter_prefix::<_, SliceRecord>(&NamePrefix {
                kind: "slice",
                name: &prefix,
            })
            .map_err(wall_error)?;
        Ok(iter.map(|r| r.map_err(wall_error)))
    }

    /// Paths starting with `prefix`.
    pub fn iter_paths(&self, prefix: &str) -> ChiselResult<impl Iterator<Item = ChiselResult<PathRecord>> + '_> {
        let iter = self
            .wall
            .iter_prefix::<_, PathRecord>(&PathPrefix {
                kind: "path",
                path: prefix,
            })
            .map_err(wall_error)?;
        Ok(iter.map(|r| r.map_err(wall_error)))
    }

    /// Content records of exactly `slice`.
    pub fn iter_contents<'a>(
        &'a self,
        slice: &'a str,
    ) -> ChiselResult<impl Iterator<Item = ChiselResult<ContentRecord>> + 'a> {
        let iter = self
            .wall
            .iter_prefix::<_, ContentRecord>(&SlicePrefix {
                kind: "content",
                slice,
            })
            .map_err(wall_error)?;
        // The wall query is a string-prefix match, so filter to the
        // exact slice name.
        Ok(iter.filter_map(move |r| match r {
            Ok(rec) if rec.slice == slice => Some(Ok(rec)),
            Ok(_) => None,
            Err(e) => Some(Err(wall_error(e))),
        }))
    }

    /// Exact path lookup.
    pub fn path(&self, path: &str) -> ChiselResult<PathRecord> {
        self.wall
            .get(&PathPrefix { kind: "path", path })
            .map_err(|e| match e {
                WallError::NotFound => {
                    ChiselError::manifest(format!("path {path} not found in manifest"))
                }
                other => wall_error(other),
            })
    }

    /// Cross-check the record kinds against each other.
    pub fn validate(&self) -> ChiselResult<()> {
        let packages: BTreeSet<String> = collect(self.iter_packages()?, |p| p.name)?;
        let slices: BTreeSet<String> = collect(self.iter_slices("")?, |s| s.name)?;

        for slice in &slices {
            let key = SliceKey::parse(slice)
                .map_err(|_| ChiselError::manifest(format!("invalid slice name {slice:?}")))?;
            if !packages.contains(&key.package) {
                return Err(ChiselError::manifest(format!(
                    "slice {slice} refers to missing package \"{}\"",
                    key.package
                )));
            }
        }

        // Path records and content records must describe the same
        // slice/path relation.
        let mut from_paths: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for record in self.iter_paths("/")? {
            let record = record?;
            for slice in &record.slices {
                if !slices.contains(slice) {
                    return Err(ChiselError::manifest(format!(
                        "path {} refers to unknown slice {slice}",
                        record.path
                    )));
                }
            }
            if !record.slices.is_empty() {
                from_paths.insert(record.path, record.slices.into_iter().collect());
            }
        }

        let mut from_contents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for slice in &slices {
            for record in self.iter_contents(slice)? {
                let record = record?;
                from_contents
                    .entry(record.path)
                    .or_default()
                    .insert(record.slice);
            }
        }

        if from_paths != from_contents {
            return Err(ChiselError::manifest(
                "path and content records disagree".to_string(),
            ));
        }
        Ok(())
    }
}

fn collect<T>(
    iter: impl Iterator<Item = ChiselResult<T>>,
    f: impl Fn(T) -> String,
) -> ChiselResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for item in iter {
        out.insert(f(item?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportEntry;

    fn key(s: &str) -> SliceKey {
        SliceKey::parse(s).unwrap()
    }

    fn sample_report() -> Report {
        let mut report = Report::new();
        report
            .add(ReportEntry {
                path: "/dir/".to_string(),
                mode: 0o755,
                sha256: None,
                size: None,
                slices: [key("mypkg_data")].into(),
                link: String::new(),
                final_sha256: None,
                hard_link_id: 0,
            })
            .unwrap();
        report
            .add(ReportEntry {
                path: "/dir/file".to_string(),
                mode: 0o644,
                sha256: Some("aa".repeat(32)),
                size: Some(5),
                slices: [key("mypkg_data")].into(),
                link: String::new(),
                final_sha256: None,
                hard_link_id: 0,
            })
            .unwrap();
        report
            .add(ReportEntry {
                path: "/dir/link".to_string(),
                mode: 0o777,
                sha256: None,
                size: None,
                slices: [key("mypkg_data")].into(),
                link: "../file".to_string(),
                final_sha256: None,
                hard_link_id: 0,
            })
            .unwrap();
        report
    }

    fn sample_options(report: &Report) -> WriteOptions<'_> {
        WriteOptions {
            packages: vec![ManifestPackage {
                name: "mypkg".to_string(),
                version: "1.0".to_string(),
                sha256: "bb".repeat(32),
                arch: "amd64".to_string(),
            }],
            slices: vec![key("mypkg_data")],
            report,
            manifest_paths: vec!["/db/manifest.wall".to_string()],
        }
    }

    fn write_read(options: &WriteOptions<'_>) -> Manifest {
        let mut buf = Vec::new();
        write_manifest(options, &mut buf).unwrap();
        Manifest::read(&buf[..]).unwrap()
    }

    #[test]
    fn roundtrip_preserves_records() {
        let report = sample_report();
        let manifest = write_read(&sample_options(&report));

        let packages: Vec<PackageRecord> =
            manifest.iter_packages().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "mypkg");

        let slices: Vec<SliceRecord> =
            manifest.iter_slices("mypkg").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].name, "mypkg_data");

        let paths: Vec<PathRecord> =
            manifest.iter_paths("/dir/").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(paths.len(), 3);

        let contents: Vec<ContentRecord> = manifest
            .iter_contents("mypkg_data")
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(contents.len(), 3);

        manifest.validate().unwrap();
    }

    #[test]
    fn manifest_self_path_has_no_hashes() {
        let report = sample_report();
        let manifest = write_read(&sample_options(&report));
        let record = manifest.path("/db/manifest.wall").unwrap();
        assert_eq!(record.mode, "0644");
        assert!(record.sha256.is_none());
        assert!(record.slices.is_empty());
    }

    #[test]
    fn path_field_order_is_fixed() {
        let report = sample_report();
        let mut buf = Vec::new();
        write_manifest(&sample_options(&report), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("{\"kind\":\"path\"") && l.contains("\"/dir/file\""))
            .unwrap();
        assert!(line.starts_with(
            "{\"kind\":\"path\",\"path\":\"/dir/file\",\"mode\":\"0644\",\"slices\":[\"mypkg_data\"],\"sha256\":"
        ));
    }

    #[test]
    fn writer_rejects_unknown_slice_on_path() {
        let mut report = sample_report();
        report
            .add(ReportEntry {
                path: "/stray".to_string(),
                mode: 0o644,
                sha256: Some("cc".repeat(32)),
                size: Some(1),
                slices: [key("otherpkg_data")].into(),
                link: String::new(),
                final_sha256: None,
                hard_link_id: 0,
            })
            .unwrap();
        let options = sample_options(&report);
        let mut buf = Vec::new();
        let err = write_manifest(&options, &mut buf).unwrap_err();
        assert_eq!(err.category(), "manifest");
    }

    #[test]
    fn writer_rejects_single_member_groups() {
        let mut report = sample_report();
        report
            .add(ReportEntry {
                path: "/dir/solo".to_string(),
                mode: 0o644,
                sha256: Some("dd".repeat(32)),
                size: Some(2),
                slices: [key("mypkg_data")].into(),
                link: String::new(),
                final_sha256: None,
                hard_link_id: 1,
            })
            .unwrap();
        let options = sample_options(&report);
        let mut buf = Vec::new();
        let err = write_manifest(&options, &mut buf).unwrap_err();
        assert!(err.to_string().contains("single member"));
    }

    #[test]
    fn hard_link_groups_roundtrip() {
        let mut report = sample_report();
        report
            .add(ReportEntry {
                path: "/dir/file2".to_string(),
                mode: 0o644,
                sha256: Some("ee".repeat(32)),
                size: Some(7),
                slices: [key("mypkg_data")].into(),
                link: String::new(),
                final_sha256: None,
                hard_link_id: 0,
            })
            .unwrap();
        report
            .add_hard_link("/dir/hardlink", "/dir/file2", [key("mypkg_data")].into())
            .unwrap();
        let manifest = write_read(&sample_options(&report));
        let a = manifest.path("/dir/file2").unwrap();
        let b = manifest.path("/dir/hardlink").unwrap();
        assert_eq!(a.hard_link_id, Some(1));
        assert_eq!(b.hard_link_id, Some(1));
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.size, b.size);
        manifest.validate().unwrap();
    }

    #[test]
    fn reader_rejects_wrong_schema() {
        let data = b"{\"jsonwall\":\"1.0\",\"schema\":\"9.9\",\"count\":1}\n";
        let err = Manifest::read(&data[..]).unwrap_err();
        assert!(err.to_string().contains("schema"));
    }
}
