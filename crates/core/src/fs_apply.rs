//! Filesystem primitives: exclusive-create moves with `_N` conflict
//! resolution, and idempotent relative symlinks.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::FlowError;

/// Suffix attempts before giving up on a destination directory.
pub const MAX_COLLISION_ATTEMPTS: u32 = 1000;

/// `report.pdf` with n = 2 becomes `report_2.pdf`; n = 0 is the name itself.
/// Works on the raw name, so names that are not valid UTF-8 survive intact.
pub fn candidate_name(name: &OsStr, n: u32) -> OsString {
    if n == 0 {
        return name.to_os_string();
    }
    let path = Path::new(name);
    let mut candidate = path
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from("file"));
    candidate.push(format!("_{n}"));
    if let Some(ext) = path.extension() {
        candidate.push(".");
        candidate.push(ext);
    }
    candidate
}

/// Moves `src` into `dest_dir`, keeping its name when free and otherwise
/// trying `_1`, `_2`, … Each candidate is claimed with a single exclusive
/// create, so two concurrent movers can never resolve to the same name.
/// On failure `src` is left where it was.
pub fn move_into(src: &Path, dest_dir: &Path) -> Result<PathBuf, FlowError> {
    let name = src.file_name().ok_or_else(|| FlowError::MoveFailed {
            path: src.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
    fs::create_dir_all(dest_dir).map_err(|source| FlowError::MoveFailed {
        path: src.to_path_buf(),
        source,
    })?;

    for n in 0..=MAX_COLLISION_ATTEMPTS {
        let candidate = dest_dir.join(candidate_name(name, n));
        match place(src, &candidate) {
            Ok(()) => {
                debug!("moved {:?} -> {:?}", src, candidate);
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(FlowError::MoveFailed {
                    path: src.to_path_buf(),
                    source,
                })
            }
        }
    }
    Err(FlowError::NameCollisionExhausted {
        dir: dest_dir.to_path_buf(),
        name: name.to_string_lossy().into_owned(),
        attempts: MAX_COLLISION_ATTEMPTS + 1,
    })
}

/// Claims `dest` atomically and moves `src` there. `AlreadyExists` means the
/// name is taken and nothing was touched.
fn place(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::hard_link(src, dest) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(src) {
                // Undo the claim so the file keeps a single name.
                let _ = fs::remove_file(dest);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            debug!("hard link {:?} failed ({}), copying instead", src, e);
            copy_then_delete(src, dest)
        }
    }
}

/// Cross-device fallback: exclusive create, copy, fsync, verify, carry over
/// metadata, then remove the source.
fn copy_then_delete(src: &Path, dest: &Path) -> io::Result<()> {
    let mut out = OpenOptions::new().write(true).create_new(true).open(dest)?;
    let result = (|| {
        let mut input = File::open(src)?;
        io::copy(&mut input, &mut out)?;
        out.sync_all()?;
        if full_hash(src)? != full_hash(dest)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "copy verification failed",
            ));
        }
        let meta = fs::metadata(src)?;
        fs::set_permissions(dest, meta.permissions())?;
        filetime::set_file_times(
            dest,
            FileTime::from_last_access_time(&meta),
            FileTime::from_last_modification_time(&meta),
        )?;
        copy_attributes(src, dest);
        fs::remove_file(src)
    })();
    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

fn copy_attributes(src: &Path, dest: &Path) {
    if !xattr::SUPPORTED_PLATFORM {
        return;
    }
    let Ok(names) = xattr::list(src) else {
        return;
    };
    for name in names {
        if let Ok(Some(value)) = xattr::get(src, &name) {
            if let Err(e) = xattr::set(dest, &name, &value) {
                warn!("could not copy attribute {:?} to {:?}: {}", name, dest, e);
            }
        }
    }
}

fn full_hash(path: &Path) -> io::Result<blake3::Hash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Unchanged,
    Created,
    Replaced,
}

/// Makes `link` a symlink to `target`. An existing link with the same target
/// is left alone; a link pointing elsewhere is replaced. A regular file in
/// the way is never touched.
pub fn ensure_link(link: &Path, target: &Path) -> Result<LinkChange, FlowError> {
    let repair_err = |source: io::Error| FlowError::SymlinkRepairFailed {
        link: link.to_path_buf(),
        source,
    };
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(repair_err)?;
    }
    let change = match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(link).map_err(repair_err)? == target {
                return Ok(LinkChange::Unchanged);
            }
            remove_if_present(link).map_err(repair_err)?;
            LinkChange::Replaced
        }
        Ok(_) => {
            return Err(repair_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a non-link entry occupies the link path",
            )))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => LinkChange::Created,
        Err(e) => return Err(repair_err(e)),
    };
    match symlink(target, link) {
        Ok(()) => Ok(change),
        // Someone else created it in the meantime.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if fs::read_link(link).ok().as_deref() == Some(target) {
                Ok(LinkChange::Unchanged)
            } else {
                Err(repair_err(e))
            }
        }
        Err(e) => Err(repair_err(e)),
    }
}

/// Removes the symlink at `link`. Returns false if it was already gone.
pub fn remove_link(link: &Path) -> Result<bool, FlowError> {
    let repair_err = |source: io::Error| FlowError::SymlinkRepairFailed {
        link: link.to_path_buf(),
        source,
    };
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => remove_if_present(link).map_err(repair_err),
        Ok(_) => Err(repair_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a symlink",
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(repair_err(e)),
    }
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// A symlink whose target does not exist.
pub fn is_broken_link(path: &Path) -> bool {
    matches!(fs::symlink_metadata(path), Ok(meta) if meta.file_type().is_symlink())
        && matches!(fs::metadata(path), Err(e) if e.kind() == io::ErrorKind::NotFound)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
