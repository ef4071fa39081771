//! Extended-attribute access split into the `flowsort` and `xdg` namespaces.
//!
//! Support is discovered lazily: each call simply tries the syscall and maps
//! "operation not supported" to [`FlowError::UnsupportedMetadata`]. Callers
//! decide whether that degrades to a no-op.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::FlowError;

pub mod keys {
    pub const CATEGORY: &str = "category";
    pub const CONFIDENCE: &str = "confidence";
    pub const TAGS: &str = "tags";
    pub const COLLECTED: &str = "collected";
    /// Modification time recorded when the file entered the archive.
    pub const ARCHIVE_DATE: &str = "archive_date";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Flowsort,
    Xdg,
}

impl Namespace {
    fn prefix(&self) -> &'static str {
        match self {
            Namespace::Flowsort => "user.flowsort.",
            Namespace::Xdg => "user.xdg.",
        }
    }

    /// Full attribute name, e.g. `user.xdg.tags`.
    pub fn attribute(&self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }
}

pub trait AttributeStore: Send + Sync {
    fn get(&self, path: &Path, ns: Namespace, key: &str) -> Result<Option<String>, FlowError>;
    fn set(&self, path: &Path, ns: Namespace, key: &str, value: &str) -> Result<(), FlowError>;
    /// Removing an absent key succeeds.
    fn remove(&self, path: &Path, ns: Namespace, key: &str) -> Result<(), FlowError>;
    fn list_keys(&self, path: &Path, ns: Namespace) -> Result<BTreeSet<String>, FlowError>;
}

/// Real extended attributes via the `xattr` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct XattrStore;

impl XattrStore {
    pub fn new() -> Self {
        Self
    }

    fn check_platform(path: &Path) -> Result<(), FlowError> {
        if xattr::SUPPORTED_PLATFORM {
            Ok(())
        } else {
            Err(FlowError::UnsupportedMetadata(path.to_path_buf()))
        }
    }
}

impl AttributeStore for XattrStore {
    fn get(&self, path: &Path, ns: Namespace, key: &str) -> Result<Option<String>, FlowError> {
        Self::check_platform(path)?;
        match xattr::get(path, ns.attribute(key)) {
            Ok(value) => Ok(value.map(|raw| String::from_utf8_lossy(&raw).into_owned())),
            Err(e) => Err(map_err(path, e)),
        }
    }

    fn set(&self, path: &Path, ns: Namespace, key: &str, value: &str) -> Result<(), FlowError> {
        Self::check_platform(path)?;
        xattr::set(path, ns.attribute(key), value.as_bytes()).map_err(|e| map_err(path, e))
    }

    fn remove(&self, path: &Path, ns: Namespace, key: &str) -> Result<(), FlowError> {
        if self.get(path, ns, key)?.is_none() {
            return Ok(());
        }
        xattr::remove(path, ns.attribute(key)).map_err(|e| map_err(path, e))
    }

    fn list_keys(&self, path: &Path, ns: Namespace) -> Result<BTreeSet<String>, FlowError> {
        Self::check_platform(path)?;
        let names = xattr::list(path).map_err(|e| map_err(path, e))?;
        Ok(names
            .filter_map(|name| {
                name.to_str()
                    .and_then(|n| n.strip_prefix(ns.prefix()))
                    .map(str::to_string)
            })
            .collect())
    }
}

fn map_err(path: &Path, err: io::Error) -> FlowError {
    if is_unsupported(&err) {
        FlowError::UnsupportedMetadata(path.to_path_buf())
    } else {
        FlowError::Io(err)
    }
}

#[cfg(unix)]
fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
        || matches!(err.raw_os_error(), Some(code) if code == libc::ENOTSUP || code == libc::EOPNOTSUPP)
}

#[cfg(not(unix))]
fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
}

/// Emits the "attributes unsupported" warning once per invocation.
#[derive(Debug, Default)]
pub struct MetadataWarning {
    emitted: AtomicBool,
}

impl MetadataWarning {
    pub fn note(&self, err: &FlowError) {
        if let FlowError::UnsupportedMetadata(path) = err {
            if !self.emitted.swap(true, Ordering::Relaxed) {
                warn!(
                    "extended attributes unsupported at {:?}; tagging disabled for this run",
                    path
                );
            }
        }
    }

    pub fn emitted(&self) -> bool {
        self.emitted.load(Ordering::Relaxed)
    }
}

/// True when `dir` accepts user extended attributes. Used by tests and by
/// `status` to report whether attribute-based counts are meaningful.
pub fn probe_support(dir: &Path) -> bool {
    if !xattr::SUPPORTED_PLATFORM {
        return false;
    }
    let probe = dir.join(".flowsort-xattr-probe");
    if std::fs::write(&probe, b"").is_err() {
        return false;
    }
    let ok = xattr::set(&probe, Namespace::Flowsort.attribute("probe"), b"1").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}
