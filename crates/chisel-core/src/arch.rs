//! Debian architecture names.

/// Architectures a release may reference. Anything else is a config error.
pub const KNOWN_ARCHES: &[&str] = &[
    "amd64", "arm64", "armel", "armhf", "i386", "ppc64el", "riscv64", "s390x",
];

/// True when `name` is a recognised Debian architecture.
pub fn is_known(name: &str) -> bool {
    KNOWN_ARCHES.contains(&name)
}
