//! Format-version behaviour: v1 defaults and sidecar archives, v2/v3
//! strictness, and maintenance-driven archive flags.

use std::fs;
use std::path::Path;

use time::macros::date;
use time::Date;

use chisel_core::release::Release;

const PACKAGE_YAML: &str = "package: hello\nslices:\n  bins:\n    contents:\n      /usr/bin/hello:\n";

fn load_with(chisel_yaml: &str, today: Date) -> Result<Release, chisel_core::ChiselError> {
    let dir = tempfile::tempdir().unwrap();
    write_release(dir.path(), chisel_yaml);
    Release::load(dir.path(), today)
}

fn write_release(dir: &Path, chisel_yaml: &str) {
    fs::create_dir_all(dir.join("slices")).unwrap();
    fs::write(dir.join("chisel.yaml"), chisel_yaml).unwrap();
    fs::write(dir.join("slices/hello.yaml"), PACKAGE_YAML).unwrap();
}

#[test]
fn v1_default_archive_without_priorities() {
    let yaml = r#"
format: v1
archives:
  ubuntu:
    version: "22.04"
    suites: [jammy]
    components: [main]
    default: true
  universe:
    version: "22.04"
    suites: [jammy]
    components: [universe]
maintenance:
  standard: 2027-06-01
  end-of-life: 2033-06-01
"#;
    let release = load_with(yaml, date!(2026 - 01 - 01)).unwrap();
    assert_eq!(release.default_archive.as_deref(), Some("ubuntu"));
    assert_eq!(release.archives["ubuntu"].priority, 0);
}

#[test]
fn v1_sidecar_archives_supersede() {
    let yaml = r#"
format: v1
archives:
  ubuntu:
    version: "22.04"
v2-archives:
  ubuntu:
    version: "22.04"
    suites: [jammy]
    components: [main]
    priority: 20
  fips:
    version: "22.04"
    suites: [jammy]
    components: [main]
    priority: 30
    pro: fips
maintenance:
  standard: 2027-06-01
  end-of-life: 2033-06-01
"#;
    let release = load_with(yaml, date!(2026 - 01 - 01)).unwrap();
    assert_eq!(release.archives.len(), 2);
    assert_eq!(release.archives["fips"].priority, 30);
    assert!(release.archives["fips"].pro.is_fips());
}

#[test]
fn v2_rejects_sidecar_archives() {
    let yaml = r#"
format: v2
archives:
  ubuntu:
    version: "22.04"
    priority: 10
v2-archives:
  ubuntu:
    version: "22.04"
    priority: 10
maintenance:
  standard: 2027-06-01
  end-of-life: 2033-06-01
"#;
    let err = load_with(yaml, date!(2026 - 01 - 01)).unwrap_err();
    assert!(err.to_string().contains("v2-archives"));
}

#[test]
fn duplicate_priorities_clash() {
    let yaml = r#"
format: v2
archives:
  one:
    version: "22.04"
    priority: 10
  two:
    version: "22.04"
    priority: 10
maintenance:
  standard: 2027-06-01
  end-of-life: 2033-06-01
"#;
    let err = load_with(yaml, date!(2026 - 01 - 01)).unwrap_err();
    assert_eq!(err.category(), "validation");
    assert!(err.to_string().contains("same priority"));
}

const PHASED_YAML: &str = r#"
format: v2
archives:
  ubuntu:
    version: "22.04"
    priority: 10
  esm:
    version: "22.04"
    priority: 20
    pro: esm-infra
  fips:
    version: "22.04"
    priority: 30
    pro: fips
maintenance:
  standard: 2027-06-01
  expanded: 2029-06-01
  legacy: 2031-06-01
  end-of-life: 2033-06-01
"#;

#[test]
fn maintained_flags_follow_the_phase() {
    // Standard: everything is maintained.
    let release = load_with(PHASED_YAML, date!(2026 - 01 - 01)).unwrap();
    assert!(release.archives["ubuntu"].maintained);
    assert!(release.archives["esm"].maintained);
    assert!(release.archives["fips"].maintained);

    // Expanded: only Pro archives.
    let release = load_with(PHASED_YAML, date!(2028 - 01 - 01)).unwrap();
    assert!(!release.archives["ubuntu"].maintained);
    assert!(release.archives["esm"].maintained);
    assert!(release.archives["fips"].maintained);

    // Legacy: only FIPS archives.
    let release = load_with(PHASED_YAML, date!(2030 - 01 - 01)).unwrap();
    assert!(!release.archives["ubuntu"].maintained);
    assert!(!release.archives["esm"].maintained);
    assert!(release.archives["fips"].maintained);

    // Past end of life: nothing, and non-Pro archives are old releases.
    let release = load_with(PHASED_YAML, date!(2034 - 01 - 01)).unwrap();
    assert!(!release.archives["fips"].maintained);
    assert!(release.archives["ubuntu"].old_release);
    assert!(!release.archives["fips"].old_release);
}

#[test]
fn out_of_order_maintenance_dates_are_rejected() {
    let yaml = r#"
format: v2
archives:
  ubuntu:
    version: "22.04"
    priority: 10
maintenance:
  standard: 2033-06-01
  end-of-life: 2027-06-01
"#;
    let err = load_with(yaml, date!(2026 - 01 - 01)).unwrap_err();
    assert!(err.to_string().contains("out of order"));
}
