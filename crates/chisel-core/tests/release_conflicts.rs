//! Conflict detection and prefer resolution, driven end-to-end through
//! release loading and selection.

use std::fs;
use std::path::Path;

use time::macros::date;

use chisel_core::release::{Release, SliceKey};
use chisel_core::selection::Selection;

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

fn write_release(dir: &Path, packages: &[(&str, &str)]) {
    fs::create_dir_all(dir.join("slices")).unwrap();
    fs::write(dir.join("chisel.yaml"), CHISEL_YAML).unwrap();
    for (name, body) in packages {
        fs::write(dir.join("slices").join(format!("{name}.yaml")), body).unwrap();
    }
}

fn load(packages: &[(&str, &str)]) -> Result<Release, chisel_core::ChiselError> {
    let dir = tempfile::tempdir().unwrap();
    write_release(dir.path(), packages);
    Release::load(dir.path(), date!(2026 - 01 - 01))
}

fn prefer_pkg(name: &str, prefer: Option<&str>) -> (String, String) {
    let prefer_line = match prefer {
        Some(p) => format!(" {{prefer: {p}}}"),
        None => String::new(),
    };
    (
        name.to_string(),
        format!("package: {name}\nslices:\n  myslice:\n    contents:\n      /path:{prefer_line}\n"),
    )
}

fn chain_release(p3_prefer: Option<&str>) -> Result<Release, chisel_core::ChiselError> {
    let pkgs = [
        prefer_pkg("mypkg1", Some("mypkg2")),
        prefer_pkg("mypkg2", Some("mypkg3")),
        prefer_pkg("mypkg3", p3_prefer),
    ];
    let refs: Vec<(&str, &str)> = pkgs.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
    load(&refs)
}

#[test]
fn prefer_chain_orders_winner_first() {
    let release = chain_release(None).unwrap();
    assert_eq!(
        release.path_ordering["/path"],
        vec!["mypkg3", "mypkg2", "mypkg1"]
    );

    // Any subset containing mypkg3 yields /path from mypkg3.
    let all: Vec<SliceKey> = ["mypkg1_myslice", "mypkg2_myslice", "mypkg3_myslice"]
        .iter()
        .map(|k| SliceKey::parse(k).unwrap())
        .collect();
    let selection = Selection::select(&release, &all, "amd64").unwrap();
    assert_eq!(selection.prefer_for("/path"), Some("mypkg3"));

    // Only mypkg1 and mypkg2 selected: mypkg2 wins.
    let partial: Vec<SliceKey> = ["mypkg1_myslice", "mypkg2_myslice"]
        .iter()
        .map(|k| SliceKey::parse(k).unwrap())
        .collect();
    let selection = Selection::select(&release, &partial, "amd64").unwrap();
    assert_eq!(selection.prefer_for("/path"), Some("mypkg2"));
}

#[test]
fn prefer_cycle_is_rejected_with_sorted_packages() {
    let err = chain_release(Some("mypkg1")).unwrap_err();
    assert_eq!(err.category(), "validation");
    let message = err.to_string();
    assert!(message.contains("prefer loop"), "{message}");
    assert!(message.contains("mypkg1, mypkg2, mypkg3"), "{message}");
}

#[test]
fn two_declarers_without_prefer_conflict() {
    let pkgs = [prefer_pkg("mypkg1", None), prefer_pkg("mypkg2", None)];
    let refs: Vec<(&str, &str)> = pkgs.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
    let err = load(&refs).unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("mypkg1_myslice and mypkg2_myslice conflict on /path"),
        "{message}"
    );
}

#[test]
fn disjoint_prefer_graph_is_rejected() {
    // Two chains that never connect: 1 -> 2, and 3 with no prefer.
    let pkgs = [
        prefer_pkg("mypkg1", Some("mypkg2")),
        prefer_pkg("mypkg2", None),
        prefer_pkg("mypkg3", None),
    ];
    let refs: Vec<(&str, &str)> = pkgs.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
    let err = load(&refs).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cannot relate packages mypkg2 and mypkg3"), "{message}");
}

#[test]
fn y_shaped_prefer_is_rejected() {
    let pkgs = [
        prefer_pkg("mypkg1", Some("mypkg3")),
        prefer_pkg("mypkg2", Some("mypkg3")),
        prefer_pkg("mypkg3", None),
    ];
    let refs: Vec<(&str, &str)> = pkgs.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
    let err = load(&refs).unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("mypkg1 and mypkg2 both prefer package \"mypkg3\""),
        "{message}"
    );
}

#[test]
fn prefer_to_non_declaring_package_is_rejected() {
    let pkgs = [prefer_pkg("mypkg1", Some("mypkg2"))];
    let refs: Vec<(&str, &str)> = pkgs.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
    let err = load(&refs).unwrap_err();
    assert!(err.to_string().contains("does not declare it"));
}

#[test]
fn identical_text_across_packages_is_allowed() {
    let body = |name: &str| {
        format!(
            "package: {name}\nslices:\n  data:\n    contents:\n      /etc/shared.conf: {{text: hello}}\n"
        )
    };
    let a = body("mypkg1");
    let b = body("mypkg2");
    let release = load(&[("mypkg1", &a), ("mypkg2", &b)]).unwrap();
    assert!(release.path_ordering.is_empty());
}

#[test]
fn diverging_text_across_packages_conflicts() {
    let a = "package: mypkg1\nslices:\n  data:\n    contents:\n      /etc/shared.conf: {text: one}\n";
    let b = "package: mypkg2\nslices:\n  data:\n    contents:\n      /etc/shared.conf: {text: two}\n";
    let err = load(&[("mypkg1", a), ("mypkg2", b)]).unwrap_err();
    assert!(err.to_string().contains("conflict on /etc/shared.conf"));
}

#[test]
fn copy_across_packages_conflicts_despite_agreement() {
    let body = |name: &str| format!("package: {name}\nslices:\n  data:\n    contents:\n      /usr/bin/tool:\n");
    let a = body("mypkg1");
    let b = body("mypkg2");
    let err = load(&[("mypkg1", &a), ("mypkg2", &b)]).unwrap_err();
    assert!(err.to_string().contains("conflict on /usr/bin/tool"));
}

#[test]
fn same_package_slices_may_share_paths() {
    let a = "package: mypkg1\nslices:\n  one:\n    contents:\n      /usr/bin/tool:\n  two:\n    contents:\n      /usr/bin/tool:\n";
    load(&[("mypkg1", a)]).unwrap();
}

#[test]
fn same_package_diverging_mode_conflicts() {
    let a = "package: mypkg1\nslices:\n  one:\n    contents:\n      /usr/bin/tool: {mode: 0755}\n  two:\n    contents:\n      /usr/bin/tool: {mode: 0644}\n";
    let err = load(&[("mypkg1", a)]).unwrap_err();
    assert!(err
        .to_string()
        .contains("mypkg1_one and mypkg1_two conflict on /usr/bin/tool"));
}

#[test]
fn glob_reaching_another_package_conflicts() {
    let a = "package: mypkg1\nslices:\n  all:\n    contents:\n      /usr/share/**:\n";
    let b = "package: mypkg2\nslices:\n  data:\n    contents:\n      /usr/share/doc/readme:\n";
    let err = load(&[("mypkg1", a), ("mypkg2", b)]).unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("mypkg1_all and mypkg2_data conflict on /usr/share/doc/readme"),
        "{message}"
    );
}

#[test]
fn glob_within_its_own_package_is_allowed() {
    let a = "package: mypkg1\nslices:\n  all:\n    contents:\n      /usr/share/**:\n  data:\n    contents:\n      /usr/share/doc/readme:\n";
    load(&[("mypkg1", a)]).unwrap();
}

#[test]
fn essential_loop_is_rejected() {
    let a = "package: mypkg1\nslices:\n  one:\n    essential:\n      - mypkg2_two\n    contents:\n      /a:\n";
    let b = "package: mypkg2\nslices:\n  two:\n    essential:\n      - mypkg1_one\n    contents:\n      /b:\n";
    let err = load(&[("mypkg1", a), ("mypkg2", b)]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("essential loop"), "{message}");
    assert!(message.contains("mypkg1_one, mypkg2_two"), "{message}");
}

#[test]
fn unknown_essential_reference_is_rejected() {
    let a = "package: mypkg1\nslices:\n  one:\n    essential:\n      - ghostpkg_none\n    contents:\n      /a:\n";
    let err = load(&[("mypkg1", a)]).unwrap_err();
    assert!(err.to_string().contains("unknown slice ghostpkg_none"));
}

#[test]
fn unknown_archive_pin_is_rejected() {
    let a = "package: mypkg1\narchive: ghost\nslices:\n  one:\n    contents:\n      /a:\n";
    let err = load(&[("mypkg1", a)]).unwrap_err();
    assert!(err.to_string().contains("unknown archive"));
}

#[test]
fn filename_must_match_package_field() {
    let a = "package: other-name\nslices:\n  one:\n    contents:\n      /a:\n";
    let err = load(&[("mypkg1", a)]).unwrap_err();
    assert!(err.to_string().contains("filename must match"));
}
