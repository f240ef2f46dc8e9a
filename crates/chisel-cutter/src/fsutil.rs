//! Filesystem primitives for materialising a target tree.
//!
//! Every path handed in is release-validated: absolute, clean, rooted at
//! the target. Modes are applied explicitly; the process umask never
//! shows through.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::{symlink, DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use chisel_core::errors::{ChiselError, ChiselResult};

/// Default mode for directories nobody declared a mode for.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default mode for files created from literal text.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Join a validated absolute path onto the target root.
pub fn target_path(root: &Path, rel: &str) -> PathBuf {
    root.join(rel.trim_start_matches('/'))
}

/// Create every missing ancestor of `rel` under `root`, taking each
/// directory's mode from `dir_modes` (the modes observed in the source
/// tarball) and falling back to 0755.
pub fn ensure_parents(
    root: &Path,
    rel: &str,
    dir_modes: &BTreeMap<String, u32>,
) -> ChiselResult<()> {
    let mut partial = String::new();
    let trimmed = rel.trim_start_matches('/');
    // A directory path's own segment is not a parent.
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let Some((dirs, _)) = trimmed.rsplit_once('/') else {
        return Ok(());
    };
    for segment in dirs.split('/') {
        partial.push('/');
        partial.push_str(segment);
        partial.push('/');
        let absolute = target_path(root, &partial);
        if !absolute.is_dir() {
            let mode = dir_modes
                .get(partial.as_str())
                .copied()
                .unwrap_or(DEFAULT_DIR_MODE);
            make_dir(&absolute, mode)?;
        }
    }
    Ok(())
}

/// Create one directory with an explicit mode. A directory that already
/// exists (say, as an implicit parent created with a fallback mode)
/// gets the declared bits applied; validation has already ruled out
/// diverging declarations.
pub fn make_dir(path: &Path, mode: u32) -> ChiselResult<()> {
    if !path.is_dir() {
        fs::DirBuilder::new()
            .mode(mode)
            .create(path)
            .map_err(ChiselError::from)?;
    }
    // DirBuilder honours the umask; fix the bits explicitly.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Stream `reader` into one or more files, hashing on the fly. Returns
/// the content hash and byte count.
pub fn write_files(
    paths: &[(PathBuf, u32)],
    reader: &mut dyn Read,
) -> ChiselResult<(String, u64)> {
    let mut outputs = Vec::with_capacity(paths.len());
    for (path, _) in paths {
        outputs.push(fs::File::create(path)?);
    }
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; 32 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        for output in &mut outputs {
            output.write_all(&buf[..n])?;
        }
        size += n as u64;
    }
    drop(outputs);
    for (path, mode) in paths {
        fs::set_permissions(path, fs::Permissions::from_mode(*mode))?;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// Write literal bytes to one file with an explicit mode.
pub fn write_bytes(path: &Path, mode: u32, data: &[u8]) -> ChiselResult<(String, u64)> {
    let mut data_reader = data;
    let paths = [(path.to_path_buf(), mode)];
    write_files(&paths, &mut data_reader)
}

/// Atomic write: temp file in the same directory, then rename over.
pub fn write_bytes_atomic(path: &Path, mode: u32, data: &[u8]) -> ChiselResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.new"));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn make_symlink(link_target: &str, path: &Path) -> ChiselResult<()> {
    if path.exists() || path.is_symlink() {
        fs::remove_file(path)?;
    }
    symlink(link_target, path).map_err(ChiselError::from)
}

pub fn make_hard_link(existing: &Path, path: &Path) -> ChiselResult<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    fs::hard_link(existing, path).map_err(ChiselError::from)
}

/// Hash a file that is already on disk.
pub fn sha256_file(path: &Path) -> ChiselResult<(String, u64)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}
