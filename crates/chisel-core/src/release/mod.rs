//! Release model: the parsed, validated universe of a chisel release.
//!
//! A release is a directory holding `chisel.yaml` (archives, maintenance
//! dates, public keys) plus one `<package>.yaml` per package under
//! `slices/`. Loading goes through three layers:
//! - raw per-format wire structs (`schema`)
//! - migration of v1/v2 inputs to the v3 in-memory shape
//! - cross-document validation (`validate`): reference resolution,
//!   conflict detection with prefer ordering, essential cycles
//!
//! Once loaded a `Release` is immutable for the rest of the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use time::Date;

use crate::errors::{ChiselError, ChiselResult};

mod load;
mod schema;
mod validate;

pub use load::load_release_dir;

/// Release format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    V1,
    V2,
    V3,
}

impl Format {
    pub fn parse(tag: &str) -> ChiselResult<Format> {
        match tag {
            "v1" => Ok(Format::V1),
            "v2" => Ok(Format::V2),
            "v3" => Ok(Format::V3),
            "chisel-v1" => Err(ChiselError::config(
                "legacy format \"chisel-v1\" is no longer supported".to_string(),
            )),
            other => Err(ChiselError::config(format!("unknown format \"{other}\""))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::V1 => "v1",
            Format::V2 => "v2",
            Format::V3 => "v3",
        }
    }
}

/// Ubuntu Pro archive tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pro {
    #[default]
    None,
    Fips,
    FipsUpdates,
    EsmApps,
    EsmInfra,
}

impl Pro {
    pub fn parse(tag: &str) -> Option<Pro> {
        match tag {
            "" => Some(Pro::None),
            "fips" => Some(Pro::Fips),
            "fips-updates" => Some(Pro::FipsUpdates),
            "esm-apps" => Some(Pro::EsmApps),
            "esm-infra" => Some(Pro::EsmInfra),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pro::None => "",
            Pro::Fips => "fips",
            Pro::FipsUpdates => "fips-updates",
            Pro::EsmApps => "esm-apps",
            Pro::EsmInfra => "esm-infra",
        }
    }

    pub fn is_pro(&self) -> bool {
        !matches!(self, Pro::None)
    }

    pub fn is_fips(&self) -> bool {
        matches!(self, Pro::Fips | Pro::FipsUpdates)
    }
}

/// Maintenance phase dates. Each date is the end boundary of its phase,
/// ordered standard <= expanded <= legacy <= end-of-life.
#[derive(Debug, Clone)]
pub struct Maintenance {
    pub standard: Date,
    pub expanded: Option<Date>,
    pub legacy: Option<Date>,
    pub end_of_life: Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintPhase {
    Standard,
    Expanded,
    Legacy,
    EndOfLife,
}

impl Maintenance {
    /// Phase containing `today`. Missing optional boundaries collapse
    /// their phase; the last declared phase extends to end-of-life.
    pub fn phase(&self, today: Date) -> MaintPhase {
        if today < self.standard {
            return MaintPhase::Standard;
        }
        if let Some(expanded) = self.expanded {
            if today < expanded {
                return MaintPhase::Expanded;
            }
        }
        if let Some(legacy) = self.legacy {
            if today < legacy {
                return MaintPhase::Legacy;
            }
        }
        if today < self.end_of_life {
            if self.legacy.is_some() {
                return MaintPhase::Legacy;
            }
            if self.expanded.is_some() {
                return MaintPhase::Expanded;
            }
            return MaintPhase::Standard;
        }
        MaintPhase::EndOfLife
    }
}

/// An archive declared by `chisel.yaml`.
#[derive(Debug, Clone)]
pub struct ReleaseArchive {
    pub name: String,
    pub version: String,
    pub suites: Vec<String>,
    pub components: Vec<String>,
    pub priority: i32,
    pub pro: Pro,
    pub public_keys: Vec<String>,
    /// Derived from the maintenance phase and the pro tag.
    pub maintained: bool,
    /// Set for non-pro archives of a release past its end of life.
    pub old_release: bool,
}

/// A `(package, slice)` pair; canonical text form `package_slice`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceKey {
    pub package: String,
    pub slice: String,
}

impl SliceKey {
    pub fn new(package: impl Into<String>, slice: impl Into<String>) -> SliceKey {
        SliceKey {
            package: package.into(),
            slice: slice.into(),
        }
    }

    /// Parse `package_slice`, enforcing both name grammars.
    pub fn parse(text: &str) -> ChiselResult<SliceKey> {
        let (package, slice) = text
            .split_once('_')
            .ok_or_else(|| ChiselError::config(format!("invalid slice reference \"{text}\"")))?;
        if !valid_package_name(package) || !valid_slice_name(slice) {
            return Err(ChiselError::config(format!(
                "invalid slice reference \"{text}\""
            )));
        }
        Ok(SliceKey::new(package, slice))
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.package, self.slice)
    }
}

/// Package name grammar: `[a-z0-9][-.a-z0-9+]{2,}`.
pub fn valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    let rest: Vec<char> = chars.collect();
    rest.len() >= 2
        && rest
            .iter()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '+'))
}

/// Slice name grammar: `[a-z][-a-z0-9]{2,}`.
pub fn valid_slice_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    let rest: Vec<char> = chars.collect();
    rest.len() >= 2
        && rest
            .iter()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
}

/// Architecture filter attached to an essential reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EssentialInfo {
    pub arch: BTreeSet<String>,
}

impl EssentialInfo {
    /// True when the reference applies to `arch`.
    pub fn applies_to(&self, arch: &str) -> bool {
        self.arch.is_empty() || self.arch.contains(arch)
    }
}

/// Lifetime marker for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Until {
    #[default]
    None,
    Mutate,
}

/// What a content path produces. Exactly one kind per path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    /// Extract a file from the package; `source` defaults to the target.
    Copy { source: Option<String> },
    Symlink { target: String },
    Text { content: String },
    /// `make` directories are created; plain directories are extracted.
    Dir { make: bool },
    Glob,
    /// Raw generate value; only "manifest" is meaningful, and unknown
    /// values fail at selection time rather than load time.
    Generate { value: String },
}

/// A content path entry, canonicalised from its YAML form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub kind: PathKind,
    /// Unix permission bits; 0 means "inherit from the source entry".
    pub mode: u32,
    pub mutable: bool,
    pub until: Until,
    pub arch: BTreeSet<String>,
    pub prefer: Option<String>,
}

impl PathInfo {
    /// True when the entry applies to `arch`.
    pub fn applies_to(&self, arch: &str) -> bool {
        self.arch.is_empty() || self.arch.contains(arch)
    }

    /// Agreement check used by conflict detection: two declarations of
    /// the same path are compatible when kind, payload, mode, and
    /// mutability all match. Architecture filters and `until` may differ
    /// between slices.
    pub fn same_content(&self, other: &PathInfo) -> bool {
        self.kind == other.kind && self.mode == other.mode && self.mutable == other.mutable
    }
}

/// A named subset of a package's files.
#[derive(Debug, Clone)]
pub struct Slice {
    pub package: String,
    pub name: String,
    pub essential: BTreeMap<SliceKey, EssentialInfo>,
    pub contents: BTreeMap<String, PathInfo>,
    /// Mutation script source, run after extraction.
    pub mutate: Option<String>,
}

impl Slice {
    pub fn key(&self) -> SliceKey {
        SliceKey::new(self.package.clone(), self.name.clone())
    }
}

/// A package definition from one `<name>.yaml` document.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// Origin YAML file, for diagnostics.
    pub path: PathBuf,
    /// Optional archive pin.
    pub archive: Option<String>,
    pub slices: BTreeMap<String, Slice>,
    /// Essentials pulled in by every slice of this package.
    pub essential: BTreeMap<SliceKey, EssentialInfo>,
}

/// The validated universe.
#[derive(Debug, Clone)]
pub struct Release {
    pub format: Format,
    pub archives: BTreeMap<String, ReleaseArchive>,
    pub packages: BTreeMap<String, Package>,
    pub maintenance: Maintenance,
    /// Winner-first package ordering for every path that participates in
    /// a prefer chain.
    pub path_ordering: BTreeMap<String, Vec<String>>,
    /// v1 only: archive used by packages without an explicit pin.
    pub default_archive: Option<String>,
    /// Armored public keys by key name.
    pub public_keys: BTreeMap<String, PublicKey>,
}

#[derive(Debug, Clone)]
pub struct PublicKey {
    pub id: String,
    pub armor: String,
}

impl Release {
    /// Load and validate a release directory, deriving archive
    /// maintenance from `today`.
    pub fn load(dir: &Path, today: Date) -> ChiselResult<Release> {
        load::load_release_dir(dir, today)
    }

    pub fn slice(&self, key: &SliceKey) -> Option<&Slice> {
        self.packages
            .get(&key.package)
            .and_then(|p| p.slices.get(&key.slice))
    }
}
