//! Black-box CLI test: build a release and pool in a tempdir, run the
//! `chisel` binary twice, and compare trees and exit codes.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

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

const PACKAGE_YAML: &str = r#"package: hello
slices:
  bins:
    contents:
      /usr/bin/hello:
      /etc/hello.conf: {text: "greeting=hi\n"}
"#;

fn build_deb(package: &str) -> Vec<u8> {
    let control_text = format!("Package: {package}\nVersion: 1.0\nArchitecture: amd64\n");
    let mut control_tar = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(control_text.len() as u64);
    header.set_path("./control").unwrap();
    header.set_cksum();
    control_tar.append(&header, control_text.as_bytes()).unwrap();
    let control_tar = control_tar.into_inner().unwrap();
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&control_tar).unwrap();
    let control_gz = gz.finish().unwrap();

    let mut data_tar = tar::Builder::new(Vec::new());
    for (path, is_dir, content, mode) in [
        ("./usr/", true, &b""[..], 0o755u32),
        ("./usr/bin/", true, &b""[..], 0o755),
        ("./usr/bin/hello", false, &b"#!/bin/sh\necho hi\n"[..], 0o755),
    ] {
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(if is_dir {
            tar::EntryType::Directory
        } else {
            tar::EntryType::Regular
        });
        header.set_mode(mode);
        header.set_size(content.len() as u64);
        // `set_path` normalises away the leading `./`, but real `.deb`
        // data tarballs (and the extractor) require it, so the raw
        // ustar name field is written directly here.
        let name_bytes = path.as_bytes();
        let ustar = header.as_ustar_mut().unwrap();
        ustar.name[..name_bytes.len()].copy_from_slice(name_bytes);
        for b in &mut ustar.name[name_bytes.len()..] {
            *b = 0;
        }
        header.set_cksum();
        data_tar.append(&header, content).unwrap();
    }
    let data_tar = data_tar.into_inner().unwrap();
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&data_tar).unwrap();
    let data_gz = gz.finish().unwrap();

    let mut deb = ar::Builder::new(Vec::new());
    for (name, bytes) in [
        ("debian-binary", b"2.0\n".to_vec()),
        ("control.tar.gz", control_gz),
        ("data.tar.gz", data_gz),
    ] {
        let header = ar::Header::new(name.as_bytes().to_vec(), bytes.len() as u64);
        deb.append(&header, &bytes[..]).unwrap();
    }
    deb.into_inner().unwrap()
}

fn setup(dir: &Path) {
    let release = dir.join("release");
    fs::create_dir_all(release.join("slices")).unwrap();
    fs::write(release.join("chisel.yaml"), CHISEL_YAML).unwrap();
    fs::write(release.join("slices/hello.yaml"), PACKAGE_YAML).unwrap();
    let pool = dir.join("pool");
    fs::create_dir_all(&pool).unwrap();
    fs::write(pool.join("hello_1.0_amd64.deb"), build_deb("hello")).unwrap();
}

fn chisel(dir: &Path, root: &str, slices: &[&str]) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_chisel"));
    command
        .arg("cut")
        .arg("--release")
        .arg(dir.join("release"))
        .arg("--root")
        .arg(dir.join(root))
        .arg("--arch")
        .arg("amd64")
        .arg("--pool")
        .arg(dir.join("pool"));
    command.args(slices);
    command.output().expect("failed to spawn chisel")
}

#[test]
fn cut_produces_the_declared_tree() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());

    let out = chisel(dir.path(), "root", &["hello_bins"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let root = dir.path().join("root");
    assert_eq!(
        fs::read(root.join("usr/bin/hello")).unwrap(),
        b"#!/bin/sh\necho hi\n"
    );
    assert_eq!(
        fs::read(root.join("etc/hello.conf")).unwrap(),
        b"greeting=hi\n"
    );
}

#[test]
fn identical_invocations_produce_identical_trees() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());

    for root in ["root1", "root2"] {
        let out = chisel(dir.path(), root, &["hello_bins"]);
        assert!(out.status.success());
    }
    let a = fs::read(dir.path().join("root1/usr/bin/hello")).unwrap();
    let b = fs::read(dir.path().join("root2/usr/bin/hello")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn unknown_slice_fails_with_error_prefix() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());

    let out = chisel(dir.path(), "root", &["hello_missing"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("error: "), "stderr: {stderr}");
    assert!(stderr.contains("hello_missing"), "stderr: {stderr}");
}

#[test]
fn bad_slice_reference_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());

    let out = chisel(dir.path(), "root", &["not-a-slice-key"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("error: "));
}
