//! Read-only summary of the stage trees. Never takes the lock and never
//! mutates anything.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::attributes::{keys, AttributeStore, MetadataWarning, Namespace};
use crate::error::FlowError;
use crate::fs_apply::is_broken_link;
use crate::layout::{Layout, RESERVED_DIRS};
use crate::models::Stage;
use crate::scanner::{canonical_files, view_links};

#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub path: PathBuf,
    pub total_files: usize,
    /// Live links per category directory.
    pub categories: BTreeMap<String, usize>,
    pub broken_links: usize,
    /// Files carrying a category attribute; `None` when attributes are
    /// unsupported for this stage.
    pub classified_files: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub stages: Vec<StageStatus>,
    pub broken_links: usize,
}

pub struct Reporter<'a> {
    layout: &'a Layout,
    attributes: &'a dyn AttributeStore,
    warning: &'a MetadataWarning,
}

impl<'a> Reporter<'a> {
    pub fn new(layout: &'a Layout, attributes: &'a dyn AttributeStore, warning: &'a MetadataWarning) -> Self {
        Self {
            layout,
            attributes,
            warning,
        }
    }

    pub fn report(&self) -> Result<StatusReport, FlowError> {
        let stages = Stage::ALL
            .into_iter()
            .map(|stage| self.stage_status(stage))
            .collect::<Result<Vec<_>, _>>()?;
        let broken_links = stages.iter().map(|s| s.broken_links).sum();
        Ok(StatusReport {
            stages,
            broken_links,
        })
    }

    fn stage_status(&self, stage: Stage) -> Result<StageStatus, FlowError> {
        let root = self.layout.root(stage);
        let files = canonical_files(&self.layout.all_dir(stage))?;

        let mut categories = BTreeMap::new();
        let mut broken_links = 0;
        for link in view_links(root) {
            if is_broken_link(&link) {
                broken_links += 1;
            } else if let Some(category) = category_of(root, &link) {
                *categories.entry(category).or_insert(0) += 1;
            }
        }

        Ok(StageStatus {
            stage,
            path: root.to_path_buf(),
            total_files: files.len(),
            categories,
            broken_links,
            classified_files: self.classified(&files),
        })
    }

    fn classified(&self, files: &[PathBuf]) -> Option<usize> {
        let mut count = 0;
        for file in files {
            match self.attributes.get(file, Namespace::Flowsort, keys::CATEGORY) {
                Ok(Some(_)) => count += 1,
                Ok(None) => {}
                Err(e @ FlowError::UnsupportedMetadata(_)) => {
                    self.warning.note(&e);
                    return None;
                }
                Err(_) => {}
            }
        }
        Some(count)
    }
}

/// `<root>/<category>/<name>` only; `by-type`/`by-date` views are not
/// counted twice.
fn category_of(root: &Path, link: &Path) -> Option<String> {
    let relative = link.strip_prefix(root).ok()?;
    let mut parts = relative.iter();
    let category = parts.next()?.to_str()?;
    parts.next()?;
    if parts.next().is_some() || RESERVED_DIRS.contains(&category) {
        return None;
    }
    Some(category.to_string())
}
