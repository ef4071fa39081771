//! On-disk layout of the stage roots.
//!
//! ```text
//! <stage>/all/<file>                          canonical file
//! <stage>/<category>/<file>         -> ../all/<file>
//! ARCHIVE/by-type/<category>/<file> -> ../../all/<file>
//! ARCHIVE/by-date/<YYYY>/<Month>/<file> -> ../../../all/<file>
//! ```

use chrono::{DateTime, Local, Utc};
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::{expand_home, AppConfig};
use crate::error::FlowError;
use crate::models::Stage;

pub const ALL_DIR: &str = "all";
pub const BY_DATE_DIR: &str = "by-date";
pub const BY_TYPE_DIR: &str = "by-type";
pub const MISC: &str = "misc";
pub const LOCK_FILE: &str = "flowsort.lock";

/// Directory names under a stage root that are not categories.
pub const RESERVED_DIRS: [&str; 3] = [ALL_DIR, BY_DATE_DIR, BY_TYPE_DIR];

#[derive(Debug, Clone)]
pub struct Layout {
    inbox: PathBuf,
    documents: PathBuf,
    archive: PathBuf,
    system: PathBuf,
}

impl Layout {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let base = expand_home(&cfg.base_path);
        let resolve = |explicit: &Option<PathBuf>, default: &str| {
            explicit
                .as_deref()
                .map(expand_home)
                .unwrap_or_else(|| base.join(default))
        };
        Self {
            inbox: resolve(&cfg.inbox_path, "INBOX"),
            documents: resolve(&cfg.documents_path, "DOCUMENTS"),
            archive: resolve(&cfg.archive_path, "ARCHIVE"),
            system: resolve(&cfg.system_path, "SYSTEM"),
        }
    }

    pub fn root(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Inbox => &self.inbox,
            Stage::Documents => &self.documents,
            Stage::Archive => &self.archive,
        }
    }

    pub fn all_dir(&self, stage: Stage) -> PathBuf {
        self.root(stage).join(ALL_DIR)
    }

    pub fn system_dir(&self) -> &Path {
        &self.system
    }

    pub fn lock_path(&self) -> PathBuf {
        self.system.join(LOCK_FILE)
    }

    /// Every categorized view `name` should have in `stage`, as
    /// `(link path, relative target)` pairs.
    pub fn expected_links(
        &self,
        stage: Stage,
        category: &str,
        name: &OsStr,
        modified: Option<DateTime<Utc>>,
    ) -> Vec<(PathBuf, PathBuf)> {
        let root = self.root(stage);
        let mut links = vec![(root.join(category).join(name), link_target(1, name))];
        if stage == Stage::Archive {
            links.push((
                root.join(BY_TYPE_DIR).join(category).join(name),
                link_target(2, name),
            ));
            let local: DateTime<Local> = modified.unwrap_or_else(Utc::now).with_timezone(&Local);
            links.push((
                root.join(BY_DATE_DIR)
                    .join(local.format("%Y").to_string())
                    .join(local.format("%B").to_string())
                    .join(name),
                link_target(3, name),
            ));
        }
        links
    }

    /// Which stage's `all/` directly contains `path`.
    pub fn stage_of(&self, path: &Path) -> Option<Stage> {
        let parent = normalize(path.parent()?);
        Stage::ALL
            .into_iter()
            .find(|stage| normalize(&self.all_dir(*stage)) == parent)
    }

    /// Creates the directory skeleton. Safe to call repeatedly.
    pub fn ensure<'a>(&self, categories: impl IntoIterator<Item = &'a String>) -> Result<(), FlowError> {
        let categories: Vec<&String> = categories.into_iter().collect();
        let mut dirs = vec![
            self.all_dir(Stage::Inbox),
            self.all_dir(Stage::Documents),
            self.all_dir(Stage::Archive),
            self.archive.join(BY_DATE_DIR),
            self.archive.join(BY_TYPE_DIR),
            self.system.clone(),
        ];
        for root in [&self.inbox, &self.documents] {
            dirs.extend(categories.iter().map(|c| root.join(c.as_str())));
            dirs.push(root.join(MISC));
        }
        for dir in dirs {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// `../` repeated `depth` times, then `all/<name>`.
pub fn link_target(depth: usize, name: &OsStr) -> PathBuf {
    let mut target = PathBuf::new();
    for _ in 0..depth {
        target.push("..");
    }
    target.push(ALL_DIR);
    target.push(name);
    target
}

/// Lexical normalisation; symlinked stage roots are compared through
/// `canonicalize` when both sides exist.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(real) = path.canonicalize() {
        return real;
    }
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn layout() -> Layout {
        Layout::from_config(&AppConfig::with_base("/data"))
    }

    #[test]
    fn stage_roots_derive_from_base() {
        let layout = layout();
        assert_eq!(layout.root(Stage::Inbox), Path::new("/data/INBOX"));
        assert_eq!(layout.all_dir(Stage::Archive), Path::new("/data/ARCHIVE/all"));
        assert_eq!(layout.lock_path(), Path::new("/data/SYSTEM/flowsort.lock"));
    }

    #[test]
    fn explicit_stage_path_wins() {
        let mut cfg = AppConfig::with_base("/data");
        cfg.documents_path = Some("/elsewhere/docs".into());
        let layout = Layout::from_config(&cfg);
        assert_eq!(layout.root(Stage::Documents), Path::new("/elsewhere/docs"));
    }

    #[test]
    fn link_targets_are_relative() {
        let name = OsStr::new("a.pdf");
        assert_eq!(link_target(1, name), PathBuf::from("../all/a.pdf"));
        assert_eq!(link_target(3, name), PathBuf::from("../../../all/a.pdf"));
    }

    #[test]
    fn archive_gets_date_and_type_views() {
        let layout = layout();
        let modified = Local
            .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let links = layout.expected_links(Stage::Archive, "documents", OsStr::new("a.pdf"), Some(modified));
        let paths: Vec<_> = links.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/data/ARCHIVE/documents/a.pdf"),
                PathBuf::from("/data/ARCHIVE/by-type/documents/a.pdf"),
                PathBuf::from("/data/ARCHIVE/by-date/2024/March/a.pdf"),
            ]
        );
        assert_eq!(links[2].1, PathBuf::from("../../../all/a.pdf"));

        let inbox = layout.expected_links(Stage::Inbox, "documents", OsStr::new("a.pdf"), Some(modified));
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn stage_of_recognises_canonical_files_only() {
        let layout = layout();
        assert_eq!(
            layout.stage_of(Path::new("/data/DOCUMENTS/all/x.txt")),
            Some(Stage::Documents)
        );
        assert_eq!(layout.stage_of(Path::new("/data/DOCUMENTS/documents/x.txt")), None);
        assert_eq!(layout.stage_of(Path::new("/tmp/x.txt")), None);
    }
}
