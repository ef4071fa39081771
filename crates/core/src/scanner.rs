//! Directory walks: collect sources, canonical `all/` files and the link
//! views around them.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::CollectConfig;
use crate::error::FlowError;
use crate::layout::ALL_DIR;

/// Regular files under `source` eligible for collection, in walk order
/// (directories visited depth-first, entries sorted by name). Symlinks are
/// never collected.
pub fn source_files(source: &Path, opts: &CollectConfig) -> Result<Vec<PathBuf>, FlowError> {
    if !fs::metadata(source)?.is_dir() {
        return Err(FlowError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", source.display()),
        )));
    }
    let excludes = build_globset(&opts.exclude)?;
    let max_depth = if opts.recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| should_descend(e.path(), source, opts.include_hidden, &excludes));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry under {:?}: {}", source, e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Regular files directly inside a stage's `all/`, sorted. A missing
/// directory yields nothing.
pub fn canonical_files(all_dir: &Path) -> Result<Vec<PathBuf>, FlowError> {
    let entries = match fs::read_dir(all_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Every symlink under a stage root outside its `all/` directory.
pub fn view_links(stage_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(stage_root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ALL_DIR))
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .map(|e| e.into_path())
        .collect()
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet, FlowError> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| FlowError::InvalidConfig(format!("exclude pattern {pat:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| FlowError::InvalidConfig(format!("exclude patterns: {e}")))
}

/// Patterns match against the path relative to the collect source, so the
/// location of the source itself never excludes anything.
fn should_descend(path: &Path, source: &Path, include_hidden: bool, excludes: &GlobSet) -> bool {
    let relative = path.strip_prefix(source).unwrap_or(path);
    if excludes.is_match(relative) {
        return false;
    }
    include_hidden || !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn non_recursive_by_default_and_hidden_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path();
        touch(&src.join("b.pdf"));
        touch(&src.join("a.txt"));
        touch(&src.join(".hidden"));
        touch(&src.join("nested").join("c.png"));

        let files = source_files(src, &CollectConfig::default()).unwrap();
        assert_eq!(files, vec![src.join("a.txt"), src.join("b.pdf")]);

        let recursive = CollectConfig {
            recursive: true,
            include_hidden: true,
            exclude: vec![],
        };
        let files = source_files(src, &recursive).unwrap();
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn excludes_match_relative_paths() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path();
        touch(&src.join("keep.pdf"));
        touch(&src.join("partial.crdownload"));
        let opts = CollectConfig {
            exclude: vec!["*.crdownload".into()],
            ..Default::default()
        };
        assert_eq!(source_files(src, &opts).unwrap(), vec![src.join("keep.pdf")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_collected() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path();
        touch(&src.join("real.txt"));
        std::os::unix::fs::symlink("real.txt", src.join("alias.txt")).unwrap();
        assert_eq!(
            source_files(src, &CollectConfig::default()).unwrap(),
            vec![src.join("real.txt")]
        );
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let err = build_globset(&["a[".into()]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[cfg(unix)]
    #[test]
    fn view_links_skip_all_dir() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        touch(&root.join("all").join("a.pdf"));
        fs::create_dir_all(root.join("documents")).unwrap();
        std::os::unix::fs::symlink("../all/a.pdf", root.join("documents").join("a.pdf")).unwrap();
        std::os::unix::fs::symlink("../x", root.join("all").join("stray")).unwrap();

        assert_eq!(view_links(root), vec![root.join("documents").join("a.pdf")]);
        assert_eq!(canonical_files(&root.join("all")).unwrap(), vec![root.join("all").join("a.pdf")]);
        assert!(canonical_files(&root.join("missing")).unwrap().is_empty());
    }
}
