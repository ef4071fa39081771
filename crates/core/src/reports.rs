//! Batch results. Per-file failures are collected here and never abort the
//! rest of the batch.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{FailureKind, FlowError};
use crate::models::{ClassificationMethod, Stage};
use crate::rules::TimeRule;

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: &Path, err: &FlowError) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub succeeded: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "succeeded={}, degraded={}, failed={}",
            self.succeeded, self.degraded, self.failed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectedFile {
    pub source: PathBuf,
    pub stored: PathBuf,
    pub category: String,
    pub confidence: f32,
    pub method: ClassificationMethod,
    /// Steps after the move that did not complete (missing link, attribute
    /// write). `cleanup` repairs links later.
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub collected: Vec<CollectedFile>,
    pub failures: Vec<FileFailure>,
    pub interrupted: bool,
}

impl CollectionReport {
    pub fn summary(&self) -> Summary {
        let degraded = self.collected.iter().filter(|c| !c.degraded.is_empty()).count();
        Summary {
            succeeded: self.collected.len() - degraded,
            degraded,
            failed: self.failures.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
    pub from_stage: Stage,
    pub to_stage: Stage,
    /// `None` for explicit transitions.
    pub rule: Option<TimeRule>,
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitionReport {
    pub examined: usize,
    pub moved: Vec<MovedFile>,
    pub failures: Vec<FileFailure>,
    pub interrupted: bool,
}

impl TransitionReport {
    pub fn summary(&self) -> Summary {
        let degraded = self.moved.iter().filter(|m| !m.degraded.is_empty()).count();
        Summary {
            succeeded: self.moved.len() - degraded,
            degraded,
            failed: self.failures.len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub created: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    pub interrupted: bool,
}

impl CleanupReport {
    /// No link added or removed and nothing failed.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.created.is_empty() && self.failures.is_empty()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            succeeded: self.removed.len() + self.created.len(),
            degraded: 0,
            failed: self.failures.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetaggedFile {
    pub path: PathBuf,
    pub previous: Option<String>,
    pub category: String,
    pub confidence: f32,
    pub relinked: bool,
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetagReport {
    pub retagged: Vec<RetaggedFile>,
    pub failures: Vec<FileFailure>,
    pub interrupted: bool,
}

impl RetagReport {
    pub fn summary(&self) -> Summary {
        let degraded = self.retagged.iter().filter(|r| !r.degraded.is_empty()).count();
        Summary {
            succeeded: self.retagged.len() - degraded,
            degraded,
            failed: self.failures.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_separates_degraded_from_clean() {
        let entry = |degraded: Vec<String>| CollectedFile {
            source: "/dl/a.pdf".into(),
            stored: "/in/all/a.pdf".into(),
            category: "documents".into(),
            confidence: 0.9,
            method: ClassificationMethod::ExtensionMatch,
            degraded,
        };
        let report = CollectionReport {
            collected: vec![entry(vec![]), entry(vec!["link missing".into()])],
            failures: vec![FileFailure::new(
                Path::new("/dl/b.pdf"),
                &FlowError::NotManaged("/dl/b.pdf".into()),
            )],
            interrupted: false,
        };
        assert_eq!(
            report.summary().to_string(),
            "succeeded=1, degraded=1, failed=1"
        );
        assert_eq!(report.failures[0].kind, FailureKind::NotManaged);
    }

    #[test]
    fn empty_cleanup_report() {
        assert!(CleanupReport::default().is_empty());
        let report = CleanupReport {
            removed: vec!["/x/documents/a".into()],
            ..Default::default()
        };
        assert!(!report.is_empty());
        assert_eq!(report.summary().succeeded, 1);
    }
}
