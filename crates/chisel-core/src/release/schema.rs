//! Raw wire structs for release YAML documents.
//!
//! Formats v1, v2, and v3 share most of their shape, so the raw structs
//! below accept the union and a hand-written migration layer normalises
//! each document to the v3 in-memory model before validation:
//! - v1 allows `default: true` per archive, the `v2-archives` sidecar
//!   map, optional priorities, and list-form essentials (plus the
//!   transitional `v3-essential` map)
//! - v2 drops `default` and `v2-archives` and requires priorities
//! - v3 uses map-form essentials with per-reference arch filters and
//!   rejects the transitional `v3-essential` key

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use time::macros::format_description;
use time::Date;

use crate::arch;
use crate::errors::{ChiselError, ChiselResult};
use crate::pathspec;

use super::{
    valid_slice_name, EssentialInfo, Format, Maintenance, Package, PathInfo, PathKind, Pro,
    PublicKey, ReleaseArchive, Slice, SliceKey, Until,
};

/// Archive priorities live in a fixed window so that pins and Pro
/// overrides stay comparable.
pub(super) const MAX_ARCHIVE_PRIORITY: i32 = 9999;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawChiselYaml {
    pub format: String,
    #[serde(default)]
    pub archives: BTreeMap<String, RawArchive>,
    #[serde(rename = "v2-archives")]
    pub v2_archives: Option<BTreeMap<String, RawArchive>>,
    pub maintenance: Option<RawMaintenance>,
    #[serde(rename = "public-keys", default)]
    pub public_keys: BTreeMap<String, RawPublicKey>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawArchive {
    pub version: String,
    #[serde(default)]
    pub suites: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    pub priority: Option<i32>,
    #[serde(default)]
    pub default: bool,
    pub pro: Option<String>,
    #[serde(rename = "public-keys", default)]
    pub public_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawMaintenance {
    pub standard: Option<String>,
    pub expanded: Option<String>,
    pub legacy: Option<String>,
    #[serde(rename = "end-of-life")]
    pub end_of_life: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawPublicKey {
    pub id: String,
    pub armor: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawPackageYaml {
    pub package: String,
    pub archive: Option<String>,
    pub essential: Option<RawEssential>,
    #[serde(rename = "v3-essential")]
    pub v3_essential: Option<BTreeMap<String, RawEssentialInfo>>,
    #[serde(default)]
    pub slices: BTreeMap<String, RawSlice>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum RawEssential {
    List(Vec<String>),
    Map(BTreeMap<String, RawEssentialInfo>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawEssentialInfo {
    #[serde(default)]
    pub arch: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawSlice {
    pub essential: Option<RawEssential>,
    #[serde(rename = "v3-essential")]
    pub v3_essential: Option<BTreeMap<String, RawEssentialInfo>>,
    #[serde(default)]
    pub contents: BTreeMap<String, Option<RawPathInfo>>,
    pub mutate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawPathInfo {
    pub copy: Option<String>,
    pub symlink: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub make: bool,
    pub mode: Option<RawMode>,
    #[serde(default)]
    pub mutable: bool,
    pub until: Option<String>,
    pub arch: Option<OneOrMany>,
    pub generate: Option<String>,
    pub prefer: Option<String>,
}

/// Accept `arch: amd64` as well as `arch: [amd64, i386]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Permission bits are always authored in octal, whether quoted or not,
/// so numeric values reinterpret their decimal digits as octal.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum RawMode {
    Number(u64),
    Text(String),
}

impl RawMode {
    fn parse(&self, path: &str) -> ChiselResult<u32> {
        let digits = match self {
            RawMode::Number(n) => n.to_string(),
            RawMode::Text(s) => s.trim_start_matches("0o").to_string(),
        };
        u32::from_str_radix(&digits, 8)
            .ok()
            .filter(|m| *m <= 0o7777)
            .ok_or_else(|| {
                ChiselError::config(format!("invalid mode for path {path}: {digits:?}"))
            })
    }
}

/// Parsed `chisel.yaml`, before archive maintenance flags are derived.
#[derive(Debug)]
pub(super) struct ChiselYaml {
    pub format: Format,
    pub archives: BTreeMap<String, ReleaseArchive>,
    pub maintenance: Maintenance,
    pub default_archive: Option<String>,
    pub public_keys: BTreeMap<String, PublicKey>,
}

pub(super) fn parse_chisel_yaml(text: &str) -> ChiselResult<ChiselYaml> {
    let raw: RawChiselYaml = serde_yaml::from_str(text)
        .map_err(|e| ChiselError::config(format!("cannot parse chisel.yaml: {e}")))?;
    let format = Format::parse(&raw.format)?;

    if raw.v2_archives.is_some() && format != Format::V1 {
        return Err(ChiselError::config(format!(
            "chisel.yaml: \"v2-archives\" is only accepted in format v1, not {}",
            format.as_str()
        )));
    }

    // In v1 the sidecar map supersedes the plain archive entries; it is
    // where priorities were introduced.
    let raw_archives = match raw.v2_archives {
        Some(sidecar) if !sidecar.is_empty() => sidecar,
        _ => raw.archives,
    };
    if raw_archives.is_empty() {
        return Err(ChiselError::config(
            "chisel.yaml: no archives defined".to_string(),
        ));
    }

    let mut archives = BTreeMap::new();
    let mut default_archive = None;
    let mut priorities: BTreeMap<i32, String> = BTreeMap::new();
    for (name, raw_archive) in raw_archives {
        if raw_archive.default {
            if format != Format::V1 {
                return Err(ChiselError::config(format!(
                    "chisel.yaml: archive {name}: \"default\" is only accepted in format v1"
                )));
            }
            if let Some(previous) = default_archive.replace(name.clone()) {
                return Err(ChiselError::config(format!(
                    "chisel.yaml: more than one default archive: {previous}, {name}"
                )));
            }
        }
        let priority = match raw_archive.priority {
            Some(p) => {
                if p.abs() > MAX_ARCHIVE_PRIORITY {
                    return Err(ChiselError::config(format!(
                        "chisel.yaml: archive {name}: priority must be between -{MAX_ARCHIVE_PRIORITY} and {MAX_ARCHIVE_PRIORITY}"
                    )));
                }
                if let Some(previous) = priorities.insert(p, name.clone()) {
                    return Err(ChiselError::validation(format!(
                        "chisel.yaml: archives {previous} and {name} have the same priority {p}"
                    )));
                }
                p
            }
            None if format == Format::V1 => 0,
            None => {
                return Err(ChiselError::config(format!(
                    "chisel.yaml: archive {name} missing priority"
                )))
            }
        };
        let pro = match &raw_archive.pro {
            None => Pro::None,
            Some(tag) => Pro::parse(tag).ok_or_else(|| {
                ChiselError::config(format!(
                    "chisel.yaml: archive {name}: invalid pro value \"{tag}\""
                ))
            })?,
        };
        if raw_archive.version.is_empty() {
            return Err(ChiselError::config(format!(
                "chisel.yaml: archive {name} missing version"
            )));
        }
        archives.insert(
            name.clone(),
            ReleaseArchive {
                name,
                version: raw_archive.version,
                suites: raw_archive.suites,
                components: raw_archive.components,
                priority,
                pro,
                public_keys: raw_archive.public_keys,
                maintained: true,
                old_release: false,
            },
        );
    }

    let maintenance = parse_maintenance(raw.maintenance)?;
    let public_keys = raw
        .public_keys
        .into_iter()
        .map(|(name, k)| {
            (
                name,
                PublicKey {
                    id: k.id,
                    armor: k.armor,
                },
            )
        })
        .collect();

    Ok(ChiselYaml {
        format,
        archives,
        maintenance,
        default_archive,
        public_keys,
    })
}

fn parse_maintenance(raw: Option<RawMaintenance>) -> ChiselResult<Maintenance> {
    let raw = raw.ok_or_else(|| {
        ChiselError::config("chisel.yaml: missing maintenance section".to_string())
    })?;
    let standard = parse_date("standard", raw.standard.as_deref())?;
    let end_of_life = parse_date("end-of-life", raw.end_of_life.as_deref())?;
    let expanded = raw
        .expanded
        .as_deref()
        .map(|d| parse_date("expanded", Some(d)))
        .transpose()?;
    let legacy = raw
        .legacy
        .as_deref()
        .map(|d| parse_date("legacy", Some(d)))
        .transpose()?;

    let mut bounds = vec![standard];
    bounds.extend(expanded);
    bounds.extend(legacy);
    bounds.push(end_of_life);
    if bounds.windows(2).any(|w| w[0] > w[1]) {
        return Err(ChiselError::config(
            "chisel.yaml: maintenance dates out of order".to_string(),
        ));
    }

    Ok(Maintenance {
        standard,
        expanded,
        legacy,
        end_of_life,
    })
}

fn parse_date(field: &str, value: Option<&str>) -> ChiselResult<Date> {
    let value = value.ok_or_else(|| {
        ChiselError::config(format!("chisel.yaml: missing maintenance date \"{field}\""))
    })?;
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(value, &format).map_err(|_| {
        ChiselError::config(format!(
            "chisel.yaml: invalid maintenance date \"{field}\": {value:?}"
        ))
    })
}

pub(super) fn parse_package_yaml(
    origin: &Path,
    text: &str,
    format: Format,
) -> ChiselResult<Package> {
    let where_ = origin.display();
    let raw: RawPackageYaml = serde_yaml::from_str(text)
        .map_err(|e| ChiselError::config(format!("cannot parse {where_}: {e}")))?;

    if !super::valid_package_name(&raw.package) {
        return Err(ChiselError::config(format!(
            "{where_}: invalid package name \"{}\"",
            raw.package
        )));
    }

    let package_essential = parse_essential(
        &format!("{where_}: package"),
        format,
        raw.essential,
        raw.v3_essential,
    )?;

    let mut slices = BTreeMap::new();
    for (slice_name, raw_slice) in raw.slices {
        if !valid_slice_name(&slice_name) {
            return Err(ChiselError::config(format!(
                "{where_}: invalid slice name \"{slice_name}\""
            )));
        }
        let context = format!("{where_}: slice {slice_name}");
        let essential = parse_essential(&context, format, raw_slice.essential, raw_slice.v3_essential)?;
        let mut contents = BTreeMap::new();
        for (path, raw_info) in raw_slice.contents {
            let info = parse_path_info(&context, &path, raw_info.unwrap_or_default(), &raw.package)?;
            contents.insert(path, info);
        }
        slices.insert(
            slice_name.clone(),
            Slice {
                package: raw.package.clone(),
                name: slice_name,
                essential,
                contents,
                mutate: raw_slice.mutate,
            },
        );
    }

    Ok(Package {
        name: raw.package,
        path: origin.to_path_buf(),
        archive: raw.archive,
        slices,
        essential: package_essential,
    })
}

fn parse_essential(
    context: &str,
    format: Format,
    essential: Option<RawEssential>,
    v3_essential: Option<BTreeMap<String, RawEssentialInfo>>,
) -> ChiselResult<BTreeMap<SliceKey, EssentialInfo>> {
    let mut out = BTreeMap::new();

    if let Some(map) = v3_essential {
        if format == Format::V3 {
            return Err(ChiselError::config(format!(
                "{context}: \"v3-essential\" is not accepted in format v3; use \"essential\""
            )));
        }
        insert_essential_map(context, map, &mut out)?;
    }

    match (essential, format) {
        (None, _) => {}
        (Some(RawEssential::List(list)), Format::V1 | Format::V2) => {
            for entry in list {
                let key = SliceKey::parse(&entry)
                    .map_err(|e| ChiselError::config(format!("{context}: {e}")))?;
                if out.insert(key.clone(), EssentialInfo::default()).is_some() {
                    return Err(ChiselError::config(format!(
                        "{context}: duplicate essential reference {key}"
                    )));
                }
            }
        }
        (Some(RawEssential::Map(map)), Format::V3) => {
            insert_essential_map(context, map, &mut out)?;
        }
        (Some(RawEssential::List(_)), Format::V3) => {
            return Err(ChiselError::config(format!(
                "{context}: format v3 requires essential to be a mapping"
            )));
        }
        (Some(RawEssential::Map(_)), Format::V1 | Format::V2) => {
            return Err(ChiselError::config(format!(
                "{context}: essential must be a list in formats v1 and v2"
            )));
        }
    }

    Ok(out)
}

fn insert_essential_map(
    context: &str,
    map: BTreeMap<String, RawEssentialInfo>,
    out: &mut BTreeMap<SliceKey, EssentialInfo>,
) -> ChiselResult<()> {
    for (entry, raw_info) in map {
        let key =
            SliceKey::parse(&entry).map_err(|e| ChiselError::config(format!("{context}: {e}")))?;
        let arch = parse_arches(context, raw_info.arch)?;
        if out.insert(key.clone(), EssentialInfo { arch }).is_some() {
            return Err(ChiselError::config(format!(
                "{context}: duplicate essential reference {key}"
            )));
        }
    }
    Ok(())
}

fn parse_arches(context: &str, raw: Option<OneOrMany>) -> ChiselResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for name in raw.map(OneOrMany::into_vec).unwrap_or_default() {
        if !arch::is_known(&name) {
            return Err(ChiselError::config(format!(
                "{context}: unknown architecture \"{name}\""
            )));
        }
        out.insert(name);
    }
    Ok(out)
}

/// Canonicalise one content entry, enforcing the path grammar.
fn parse_path_info(
    context: &str,
    path: &str,
    raw: RawPathInfo,
    package: &str,
) -> ChiselResult<PathInfo> {
    let fail = |msg: String| Err(ChiselError::config(format!("{context}: {msg}")));

    if !path.starts_with('/') {
        return fail(format!("path {path:?} must be absolute"));
    }
    if !is_clean_path(path) {
        return fail(format!("path {path:?} is not clean"));
    }

    let wildcard = pathspec::is_glob(path);
    let mut kinds = 0;
    for present in [
        raw.copy.is_some(),
        raw.symlink.is_some(),
        raw.text.is_some(),
        raw.make,
        raw.generate.is_some(),
    ] {
        kinds += usize::from(present);
    }
    if kinds > 1 {
        return fail(format!("conflicting options for path {path}"));
    }

    let kind = if let Some(value) = raw.generate {
        if !path.ends_with("/**") || pathspec::is_glob(&path[..path.len() - 3]) {
            return fail(format!(
                "generate path {path} must end with /** and have no other wildcard"
            ));
        }
        if raw.mode.is_some()
            || raw.mutable
            || raw.until.is_some()
            || raw.prefer.is_some()
            || raw.arch.is_some()
        {
            return fail(format!("generate path {path} accepts no other options"));
        }
        PathKind::Generate { value }
    } else if wildcard {
        if raw.copy.is_some()
            || raw.symlink.is_some()
            || raw.text.is_some()
            || raw.make
            || raw.mode.is_some()
            || raw.mutable
            || raw.prefer.is_some()
        {
            return fail(format!("wildcard path {path} accepts only until and arch"));
        }
        PathKind::Glob
    } else if let Some(target) = raw.symlink {
        if path.ends_with('/') {
            return fail(format!("symlink path {path} must not end with /"));
        }
        if target.is_empty() {
            return fail(format!("symlink path {path} has an empty target"));
        }
        if raw.mode.is_some() {
            return fail(format!("symlink path {path} does not accept a mode"));
        }
        PathKind::Symlink { target }
    } else if let Some(content) = raw.text {
        if path.ends_with('/') {
            return fail(format!("text path {path} must not end with /"));
        }
        PathKind::Text { content }
    } else if raw.make || path.ends_with('/') {
        if !path.ends_with('/') {
            return fail(format!("make path {path} must end with /"));
        }
        PathKind::Dir { make: raw.make }
    } else {
        if let Some(source) = &raw.copy {
            if !source.starts_with('/') || !is_clean_path(source) {
                return fail(format!("copy source {source:?} must be a clean absolute path"));
            }
        }
        PathKind::Copy { source: raw.copy }
    };

    if raw.mutable && !matches!(kind, PathKind::Copy { .. } | PathKind::Text { .. }) {
        return fail(format!("mutable is only valid for regular files: {path}"));
    }

    let until = match raw.until.as_deref() {
        None => Until::None,
        Some("mutate") => Until::Mutate,
        Some(other) => return fail(format!("invalid until value for path {path}: {other:?}")),
    };

    if let Some(prefer) = &raw.prefer {
        if !super::valid_package_name(prefer) {
            return fail(format!("invalid prefer package name {prefer:?} for path {path}"));
        }
        if prefer == package {
            return fail(format!("path {path} cannot prefer its own package"));
        }
        if matches!(kind, PathKind::Dir { .. }) {
            return fail(format!("directory path {path} does not accept prefer"));
        }
    }

    let mode = raw.mode.map(|m| m.parse(path)).transpose()?.unwrap_or(0);
    let arch = parse_arches(context, raw.arch)?;

    Ok(PathInfo {
        kind,
        mode,
        mutable: raw.mutable,
        until,
        arch,
        prefer: raw.prefer,
    })
}

/// A path is clean when cleaning changes nothing: no empty, `.`, or
/// `..` segments. Trailing slashes are significant (directories keep
/// them), so they are put aside before the check.
fn is_clean_path(path: &str) -> bool {
    if path.contains("//") {
        return false;
    }
    let trimmed = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    };
    path_clean::clean(trimmed).to_str() == Some(trimmed)
}
