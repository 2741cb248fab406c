//! Atomic file replacement with a restorable backup.
//!
//! Uses a temp file + rename pattern so readers never observe a half-written file.
//! Before an existing file is replaced its previous contents are copied to a
//! sibling backup, which [`restore_backup`] moves back into place.
//!
//! Every overwrite gets its own backup: the first is `<name>.warden-bak`,
//! later ones `<name>.warden-bak.1`, `<name>.warden-bak.2`, ... Names are
//! reserved with `create_new`, so concurrent writers never share one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

const BACKUP_SUFFIX: &str = "warden-bak";
const MAX_BACKUPS_PER_FILE: u32 = 10_000;

/// Path of the first backup kept for `path`: `<dir>/<name>.warden-bak`.
#[must_use]
pub fn backup_path_for(path: &Path) -> PathBuf {
    numbered_backup_path(path, 0)
}

fn numbered_backup_path(path: &Path, index: u32) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    if index > 0 {
        name.push(format!(".{index}"));
    }
    path.with_file_name(name)
}

/// Existing backups of `path`, oldest first.
#[must_use]
pub fn backups_for(path: &Path) -> Vec<PathBuf> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(parent_dir(path)) else {
        return Vec::new();
    };
    let first = format!("{name}.{BACKUP_SUFFIX}");

    let mut found: Vec<(u32, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let file_name = file_name.to_str()?;
            let rest = file_name.strip_prefix(first.as_str())?;
            let index = if rest.is_empty() {
                0
            } else {
                rest.strip_prefix('.')?.parse().ok()?
            };
            Some((index, path.with_file_name(file_name)))
        })
        .collect();
    found.sort_by_key(|(index, _)| *index);
    found.into_iter().map(|(_, backup)| backup).collect()
}

/// Claim the next unused backup name for `path`.
fn reserve_backup(path: &Path) -> io::Result<PathBuf> {
    for index in 0..MAX_BACKUPS_PER_FILE {
        let candidate = numbered_backup_path(path, index);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::other(format!(
        "too many backups of {}",
        path.display()
    )))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Write `bytes` to `path` via temp file + rename.
///
/// An existing file keeps its Unix permission bits.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = parent_dir(path);

    #[cfg(unix)]
    let existing_mode = {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).ok().map(|m| m.permissions().mode())
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    #[cfg(unix)]
    if let Some(mode) = existing_mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }

    Ok(())
}

/// Replace `path` with `bytes`, first copying any existing file to its backup.
///
/// Returns the backup path when a previous version existed. A failed backup
/// aborts the write and leaves the original untouched.
pub fn write_with_backup(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<Option<PathBuf>> {
    let path = path.as_ref();
    let backup = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => {
            let backup = reserve_backup(path)?;
            if let Err(e) = fs::copy(path, &backup) {
                let _ = fs::remove_file(&backup);
                return Err(e);
            }
            debug!(
                path = %path.display(),
                backup = %backup.display(),
                "Backed up file before overwrite"
            );
            Some(backup)
        }
        Ok(meta) if meta.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }
        Ok(_) | Err(_) => None,
    };

    atomic_write(path, bytes)?;
    Ok(backup)
}

/// Move a backup produced by [`write_with_backup`] back over `path`.
pub fn restore_backup(path: &Path, backup: &Path) -> io::Result<()> {
    fs::rename(backup, path)?;
    tracing::info!(path = %path.display(), "Restored file from backup");
    Ok(())
}

/// Undo the most recent overwrite of `path`.
///
/// Returns the backup that was moved back, or `None` when there is none.
pub fn restore_latest_backup(path: &Path) -> io::Result<Option<PathBuf>> {
    let Some(latest) = backups_for(path).pop() else {
        return Ok(None);
    };
    restore_backup(path, &latest)?;
    Ok(Some(latest))
}
