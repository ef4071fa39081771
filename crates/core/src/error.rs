use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no free name for {name} in {dir} after {attempts} attempts")]
    NameCollisionExhausted {
        dir: PathBuf,
        name: String,
        attempts: u32,
    },
    #[error("moving {path} failed: {source}")]
    MoveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("symlink {link} could not be repaired: {source}")]
    SymlinkRepairFailed {
        link: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("extended attributes are not supported for {0}")]
    UnsupportedMetadata(PathBuf),
    #[error("invalid time rules: {0}")]
    InvalidTimeRuleConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("lock {path} still held after {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("{0} is not inside any stage's all/ directory")]
    NotManaged(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FlowError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FlowError::NameCollisionExhausted { .. } => FailureKind::NameCollisionExhausted,
            FlowError::MoveFailed { .. } => FailureKind::MoveFailed,
            FlowError::SymlinkRepairFailed { .. } => FailureKind::SymlinkRepairFailed,
            FlowError::UnsupportedMetadata(_) => FailureKind::UnsupportedMetadata,
            FlowError::NotManaged(_) => FailureKind::NotManaged,
            _ => FailureKind::Io,
        }
    }
}

/// Serialisable tag for a per-file failure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NameCollisionExhausted,
    MoveFailed,
    SymlinkRepairFailed,
    UnsupportedMetadata,
    NotManaged,
    Io,
}
