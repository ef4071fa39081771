use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::attributes::{keys, AttributeStore, Namespace};
use crate::error::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Inbox,
    Documents,
    Archive,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Inbox, Stage::Documents, Stage::Archive];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Inbox => "INBOX",
            Stage::Documents => "DOCUMENTS",
            Stage::Archive => "ARCHIVE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    ExtensionMatch,
    MimeFallback,
    ContentModel,
    /// Nothing matched; the file lands in `misc`.
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub confidence: f32,
    pub method: ClassificationMethod,
}

impl ClassificationResult {
    pub fn is_ambiguous(&self) -> bool {
        self.method == ClassificationMethod::Unmatched
    }
}

/// Snapshot of a canonical file: filesystem metadata plus whatever the
/// attribute store knows about it. Never persisted as a whole.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub collected: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Reads metadata and the flowsort attributes of `path`. Attribute
    /// failures (including unsupported filesystems) leave the fields empty.
    pub fn read(path: &Path, attributes: &dyn AttributeStore) -> Result<Self, FlowError> {
        let meta = fs::metadata(path)?;
        let stamp = |t: std::io::Result<std::time::SystemTime>| t.ok().map(DateTime::<Utc>::from);
        let collected = attributes
            .get(path, Namespace::Flowsort, keys::COLLECTED)
            .ok()
            .flatten()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(Self {
            path: path.to_path_buf(),
            modified: stamp(meta.modified()),
            accessed: stamp(meta.accessed()),
            created: stamp(meta.created()),
            collected,
        })
    }

    /// Birth time when the filesystem reports one, else the recorded
    /// first-observed time.
    pub fn collection_time(&self) -> Option<DateTime<Utc>> {
        self.created.or(self.collected)
    }
}
