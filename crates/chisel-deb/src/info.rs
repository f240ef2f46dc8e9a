//! Package metadata from the control tarball.

use std::collections::BTreeMap;
use std::io::Read;

use chisel_core::errors::{ChiselError, ChiselResult};

use crate::deb::{decoder, member_name};

/// Identity of one fetched package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub arch: String,
    /// Hash of the whole `.deb`, supplied by whoever read the bytes.
    pub sha256: String,
}

/// Read `Package`, `Version`, and `Architecture` from the control
/// tarball inside `deb`. Consumes the reader.
pub fn read_package_info<R: Read>(deb: R, sha256: impl Into<String>) -> ChiselResult<PackageInfo> {
    let mut outer = ar::Archive::new(deb);
    while let Some(entry) = outer.next_entry() {
        let entry =
            entry.map_err(|e| ChiselError::extraction(format!("bad ar member header: {e}")))?;
        let name = member_name(entry.header().identifier());
        if !name.starts_with("control.tar") {
            continue;
        }
        let reader = decoder(&name, entry)?;
        let fields = read_control_fields(reader)?;
        let field = |key: &str| {
            fields.get(key).cloned().ok_or_else(|| {
                ChiselError::extraction(format!("control file is missing the {key} field"))
            })
        };
        return Ok(PackageInfo {
            name: field("Package")?,
            version: field("Version")?,
            arch: field("Architecture")?,
            sha256: sha256.into(),
        });
    }
    Err(ChiselError::extraction(
        "package has no control.tar member".to_string(),
    ))
}

fn read_control_fields<R: Read>(reader: R) -> ChiselResult<BTreeMap<String, String>> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ChiselError::extraction(format!("bad control tar stream: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ChiselError::extraction(format!("bad control tar entry: {e}")))?;
        let path = String::from_utf8_lossy(&entry.path_bytes()).to_string();
        if path != "./control" && path != "control" {
            continue;
        }
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| ChiselError::extraction(format!("cannot read control file: {e}")))?;
        return Ok(parse_control(&text));
    }
    Err(ChiselError::extraction(
        "control tarball has no control file".to_string(),
    ))
}

/// Minimal deb822 field parsing; continuation lines belong to the
/// previous field and are irrelevant for the fields we need.
fn parse_control(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        if line.starts_with([' ', '\t']) {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    fields
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::deb::ItemKind;
    use std::io::Write;

    /// Assemble a `.deb` in memory: `debian-binary`, a gzipped control
    /// tarball, and a data tarball with the requested entries and
    /// compression ("gz", "xz", "zst", or "" for plain tar).
    pub(crate) fn build_deb(
        compression: &str,
        entries: &[(&str, &[u8], u32, ItemKind, &str)],
    ) -> Vec<u8> {
        build_deb_for_package("test-package", compression, entries)
    }

    pub(crate) fn build_deb_for_package(
        package: &str,
        compression: &str,
        entries: &[(&str, &[u8], u32, ItemKind, &str)],
    ) -> Vec<u8> {
        let control_text =
            format!("Package: {package}\nVersion: 1.0\nArchitecture: amd64\n");
        let mut control_tar = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(control_text.len() as u64);
        header.set_path("./control").unwrap();
        header.set_cksum();
        control_tar
            .append(&header, control_text.as_bytes())
            .unwrap();
        let control_tar = control_tar.into_inner().unwrap();
        let mut control_gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        control_gz.write_all(&control_tar).unwrap();
        let control_gz = control_gz.finish().unwrap();

        let mut data_tar = tar::Builder::new(Vec::new());
        for (path, content, mode, kind, link) in entries {
            let mut header = tar::Header::new_ustar();
            header.set_mode(*mode);
            // `set_path` normalises away a leading `./`, but real `.deb`
            // data tarballs (and the extractor) require it, so the raw
            // ustar name field is written directly here.
            {
                let bytes = path.as_bytes();
                let ustar = header.as_ustar_mut().unwrap();
                ustar.name[..bytes.len()].copy_from_slice(bytes);
                for b in &mut ustar.name[bytes.len()..] {
                    *b = 0;
                }
            }
            match kind {
                ItemKind::File => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(content.len() as u64);
                    header.set_cksum();
                    data_tar.append(&header, *content).unwrap();
                }
                ItemKind::Dir => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_cksum();
                    data_tar.append(&header, &b""[..]).unwrap();
                }
                ItemKind::Symlink => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_link_name(link).unwrap();
                    header.set_cksum();
                    data_tar.append(&header, &b""[..]).unwrap();
                }
                ItemKind::HardLink => {
                    header.set_entry_type(tar::EntryType::Link);
                    header.set_size(0);
                    header.set_link_name(link).unwrap();
                    header.set_cksum();
                    data_tar.append(&header, &b""[..]).unwrap();
                }
            }
        }
        let data_tar = data_tar.into_inner().unwrap();

        let (data_name, data_bytes) = match compression {
            "gz" => {
                let mut enc = flate2::write::GzEncoder::new(
                    Vec::new(),
                    flate2::Compression::default(),
                );
                enc.write_all(&data_tar).unwrap();
                ("data.tar.gz", enc.finish().unwrap())
            }
            "xz" => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
                enc.write_all(&data_tar).unwrap();
                ("data.tar.xz", enc.finish().unwrap())
            }
            "zst" => (
                "data.tar.zst",
                zstd::stream::encode_all(&data_tar[..], 3).unwrap(),
            ),
            "" => ("data.tar", data_tar),
            other => panic!("unknown compression {other:?}"),
        };

        let mut deb = ar::Builder::new(Vec::new());
        for (name, bytes) in [
            ("debian-binary", b"2.0\n".to_vec()),
            ("control.tar.gz", control_gz),
            (data_name, data_bytes),
        ] {
            let header = ar::Header::new(name.as_bytes().to_vec(), bytes.len() as u64);
            deb.append(&header, &bytes[..]).unwrap();
        }
        deb.into_inner().unwrap()
    }

    #[test]
    fn reads_control_fields() {
        let deb = build_deb("gz", &[("./file", b"x" as &[u8], 0o644, ItemKind::File, "")]);
        let info = read_package_info(&deb[..], "ff".repeat(32)).unwrap();
        assert_eq!(info.name, "test-package");
        assert_eq!(info.version, "1.0");
        assert_eq!(info.arch, "amd64");
        assert_eq!(info.sha256.len(), 64);
    }

    #[test]
    fn missing_control_member_is_an_error() {
        let mut deb = ar::Builder::new(Vec::new());
        let header = ar::Header::new(b"debian-binary".to_vec(), 4);
        deb.append(&header, &b"2.0\n"[..]).unwrap();
        let bytes = deb.into_inner().unwrap();
        let err = read_package_info(&bytes[..], "").unwrap_err();
        assert!(err.to_string().contains("control.tar"));
    }

    #[test]
    fn control_parsing_ignores_continuations() {
        let fields = parse_control(
            "Package: a\nDescription: short\n longer continuation\nVersion: 2\n",
        );
        assert_eq!(fields["Package"], "a");
        assert_eq!(fields["Version"], "2");
        assert_eq!(fields["Description"], "short");
    }
}
