//! Streaming access to the payload of a `.deb`.
//!
//! Two nested containers: the outer `ar` archive holds a `data.tar`
//! member (gzip, xz, zstd, or uncompressed), which in turn is a POSIX
//! tar stream. Entries are consumed strictly once, in order; seeking
//! back means reopening the package.

use std::io::Read;

use chisel_core::errors::{ChiselError, ChiselResult};

/// File kinds the cutter knows how to materialise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Dir,
    Symlink,
    HardLink,
}

/// One tar entry, with its name already sanitised: entries must arrive
/// as `./...`, and leave here rooted at `/` (directories keep their
/// trailing slash).
#[derive(Debug, Clone)]
pub struct TarItem {
    pub path: String,
    pub mode: u32,
    pub kind: ItemKind,
    pub size: u64,
    /// Symlink target as stored, or the sanitised path of the hard-link
    /// peer.
    pub link: String,
}

/// Walk the `data.tar` member of `deb`, invoking `visit` once per entry
/// with a reader positioned over that entry's content. An error from the
/// visitor stops the walk and propagates.
pub fn walk_data_tar<R, F>(deb: R, mut visit: F) -> ChiselResult<()>
where
    R: Read,
    F: FnMut(&TarItem, &mut dyn Read) -> ChiselResult<()>,
{
    let mut outer = ar::Archive::new(deb);
    while let Some(entry) = outer.next_entry() {
        let entry =
            entry.map_err(|e| ChiselError::extraction(format!("bad ar member header: {e}")))?;
        let name = member_name(entry.header().identifier());
        if !name.starts_with("data.tar") {
            continue;
        }
        let reader = decoder(&name, entry)?;
        return walk_tar(reader, &mut visit);
    }
    Err(ChiselError::extraction(
        "package has no data.tar member".to_string(),
    ))
}

pub(crate) fn member_name(identifier: &[u8]) -> String {
    String::from_utf8_lossy(identifier)
        .trim_end_matches('/')
        .trim()
        .to_string()
}

/// Pick a decompressor for a tar member from its file name.
pub(crate) fn decoder<'a, R: Read + 'a>(name: &str, reader: R) -> ChiselResult<Box<dyn Read + 'a>> {
    if name.ends_with(".tar.gz") {
        Ok(Box::new(flate2::read::GzDecoder::new(reader)))
    } else if name.ends_with(".tar.xz") {
        Ok(Box::new(xz2::read::XzDecoder::new(reader)))
    } else if name.ends_with(".tar.zst") {
        let decoder = zstd::stream::read::Decoder::new(reader)
            .map_err(|e| ChiselError::extraction(format!("bad zstd stream in {name}: {e}")))?;
        Ok(Box::new(decoder))
    } else if name.ends_with(".tar") {
        Ok(Box::new(reader))
    } else {
        Err(ChiselError::extraction(format!(
            "unsupported compression in member {name:?}"
        )))
    }
}

fn walk_tar<R, F>(reader: R, visit: &mut F) -> ChiselResult<()>
where
    R: Read,
    F: FnMut(&TarItem, &mut dyn Read) -> ChiselResult<()>,
{
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ChiselError::extraction(format!("bad tar stream: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ChiselError::extraction(format!("bad tar entry: {e}")))?;

        let kind = match entry.header().entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => ItemKind::File,
            tar::EntryType::Directory => ItemKind::Dir,
            tar::EntryType::Symlink => ItemKind::Symlink,
            tar::EntryType::Link => ItemKind::HardLink,
            // Extended headers carry metadata for the entry that
            // follows; the tar crate folds them in for us.
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader => continue,
            other => {
                return Err(ChiselError::extraction(format!(
                    "unsupported tar entry type {other:?}"
                )))
            }
        };

        let raw = String::from_utf8_lossy(&entry.path_bytes()).to_string();
        let path = sanitize_entry_path(&raw, kind == ItemKind::Dir)?;

        let mode = entry
            .header()
            .mode()
            .map_err(|e| ChiselError::extraction(format!("bad mode for {path}: {e}")))?
            & 0o7777;
        let size = entry.size();
        let link = match kind {
            ItemKind::Symlink | ItemKind::HardLink => {
                let raw = entry
                    .link_name_bytes()
                    .map(|b| String::from_utf8_lossy(&b).to_string())
                    .unwrap_or_default();
                if raw.is_empty() {
                    return Err(ChiselError::extraction(format!(
                        "link entry {path} has no target"
                    )));
                }
                if kind == ItemKind::HardLink {
                    // Hard link targets name another entry of the same
                    // tarball and get the same sanitisation.
                    sanitize_entry_path(&raw, false)?
                } else {
                    raw
                }
            }
            _ => String::new(),
        };

        let item = TarItem {
            path,
            mode,
            kind,
            size,
            link,
        };
        visit(&item, &mut entry)?;
    }
    Ok(())
}

/// Entry names must begin with `./`; the leading dot goes away and
/// directories keep exactly one trailing slash.
fn sanitize_entry_path(raw: &str, is_dir: bool) -> ChiselResult<String> {
    let rest = raw.strip_prefix("./").ok_or_else(|| {
        ChiselError::extraction(format!("tar entry name {raw:?} is not relative to ./"))
    })?;
    let mut path = format!("/{rest}");
    if is_dir && !path.ends_with('/') {
        path.push('/');
    }
    if !is_dir && path.len() > 1 {
        while path.ends_with('/') {
            path.pop();
        }
    }
    if path.contains("/../") || path.ends_with("/..") {
        return Err(ChiselError::extraction(format!(
            "tar entry name {raw:?} escapes the target root"
        )));
    }
    Ok(path)
}
