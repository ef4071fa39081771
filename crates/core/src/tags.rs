//! Tag sets stored in extended attributes, mirrored between the `flowsort`
//! and `xdg` namespaces.
//!
//! The preferred namespace is written first and is authoritative; the other
//! one is a best-effort mirror. When xdg compatibility is on, the xdg tags
//! are kept a superset of the flowsort tags plus the category.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::attributes::{keys, AttributeStore, MetadataWarning, Namespace};
use crate::config::{PreferredNamespace, TaggingConfig};
use crate::error::FlowError;
use crate::models::ClassificationResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagSet {
    pub category: Option<String>,
    pub confidence: Option<f32>,
    pub flowsort_tags: BTreeSet<String>,
    pub xdg_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Preserve,
    Replace,
}

/// Union under `Preserve`, overwrite under `Replace`.
pub fn merge(existing: &BTreeSet<String>, incoming: &BTreeSet<String>, policy: WritePolicy) -> BTreeSet<String> {
    match policy {
        WritePolicy::Preserve => existing.union(incoming).cloned().collect(),
        WritePolicy::Replace => incoming.clone(),
    }
}

pub fn split_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_tags(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(",")
}

#[derive(Clone)]
pub struct TagManager {
    config: TaggingConfig,
    store: Arc<dyn AttributeStore>,
    warning: Arc<MetadataWarning>,
}

impl TagManager {
    pub fn new(config: TaggingConfig, store: Arc<dyn AttributeStore>, warning: Arc<MetadataWarning>) -> Self {
        Self {
            config,
            store,
            warning,
        }
    }

    fn policy(&self) -> WritePolicy {
        if self.config.preserve_existing {
            WritePolicy::Preserve
        } else {
            WritePolicy::Replace
        }
    }

    fn xdg_first(&self) -> bool {
        self.config.xdg_compat && self.config.preferred_namespace == PreferredNamespace::Xdg
    }

    /// Runs `op`, turning "attributes unsupported" into a silent no-op after
    /// the one-time warning.
    fn degrade<T: Default>(&self, op: impl FnOnce() -> Result<T, FlowError>) -> Result<T, FlowError> {
        match op() {
            Err(e @ FlowError::UnsupportedMetadata(_)) => {
                self.warning.note(&e);
                Ok(T::default())
            }
            other => other,
        }
    }

    pub fn read_tags(&self, path: &Path) -> Result<TagSet, FlowError> {
        self.degrade(|| {
            let category = self
                .store
                .get(path, Namespace::Flowsort, keys::CATEGORY)?
                .filter(|c| !c.is_empty());
            let confidence = self
                .store
                .get(path, Namespace::Flowsort, keys::CONFIDENCE)?
                .and_then(|c| c.parse::<f32>().ok());
            let flowsort_tags = self.read_ns(path, Namespace::Flowsort)?;
            let xdg_tags = self.read_ns(path, Namespace::Xdg)?;
            Ok(TagSet {
                category,
                confidence,
                flowsort_tags,
                xdg_tags,
            })
        })
    }

    /// Tags a classified file with its category, when auto-tagging is on.
    /// A `previous` category that differs is dropped from both namespaces
    /// first. The category/confidence attributes themselves are written by
    /// the flow store regardless of tagging settings.
    pub fn apply_category_tags(
        &self,
        path: &Path,
        classification: &ClassificationResult,
        previous: Option<&str>,
    ) -> Result<(), FlowError> {
        if !self.config.enabled || !self.config.auto_tag {
            return Ok(());
        }
        let category = classification.category.as_str();
        let incoming = BTreeSet::from([category.to_string()]);
        self.degrade(|| {
            if let Some(old) = previous.filter(|old| *old != category) {
                self.drop_tags(path, &BTreeSet::from([old.to_string()]))?;
            }
            self.write(path, &incoming, self.policy(), Some(category))
        })
    }

    pub fn add_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), FlowError> {
        if !self.config.enabled {
            debug!("tagging disabled, ignoring add for {:?}", path);
            return Ok(());
        }
        self.degrade(|| {
            let category = self.store.get(path, Namespace::Flowsort, keys::CATEGORY)?;
            self.write(path, tags, self.policy(), category.as_deref())
        })
    }

    pub fn remove_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), FlowError> {
        if !self.config.enabled {
            return Ok(());
        }
        self.degrade(|| self.drop_tags(path, tags))
    }

    /// Removes the tag keys; category and confidence stay.
    pub fn clear_tags(&self, path: &Path) -> Result<(), FlowError> {
        self.degrade(|| {
            self.store.remove(path, Namespace::Flowsort, keys::TAGS)?;
            if self.config.xdg_compat {
                self.store.remove(path, Namespace::Xdg, keys::TAGS)?;
            }
            Ok(())
        })
    }

    /// Namespaces to write, authoritative one first.
    fn order(&self) -> Vec<Namespace> {
        match (self.config.xdg_compat, self.xdg_first()) {
            (false, _) => vec![Namespace::Flowsort],
            (true, true) => vec![Namespace::Xdg, Namespace::Flowsort],
            (true, false) => vec![Namespace::Flowsort, Namespace::Xdg],
        }
    }

    fn drop_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), FlowError> {
        for (i, ns) in self.order().into_iter().enumerate() {
            let existing = self.read_ns(path, ns)?;
            let remaining: BTreeSet<String> = existing.difference(tags).cloned().collect();
            if remaining != existing {
                self.put_ns(path, ns, &remaining, i == 0)?;
            }
        }
        Ok(())
    }

    fn write(
        &self,
        path: &Path,
        incoming: &BTreeSet<String>,
        policy: WritePolicy,
        category: Option<&str>,
    ) -> Result<(), FlowError> {
        for (i, ns) in self.order().into_iter().enumerate() {
            let existing = self.read_ns(path, ns)?;
            let mut next = merge(&existing, incoming, policy);
            if ns == Namespace::Xdg {
                // superset mirror: flowsort tags plus category
                if policy == WritePolicy::Preserve {
                    next.extend(self.read_ns(path, Namespace::Flowsort)?);
                }
                next.extend(category.map(str::to_string));
            }
            self.put_ns(path, ns, &next, i == 0)?;
        }
        Ok(())
    }

    fn read_ns(&self, path: &Path, ns: Namespace) -> Result<BTreeSet<String>, FlowError> {
        Ok(self
            .store
            .get(path, ns, keys::TAGS)?
            .map(|raw| split_tags(&raw))
            .unwrap_or_default())
    }

    /// Authoritative writes propagate errors; mirror writes only warn.
    fn put_ns(&self, path: &Path, ns: Namespace, tags: &BTreeSet<String>, authoritative: bool) -> Result<(), FlowError> {
        let result = if tags.is_empty() {
            self.store.remove(path, ns, keys::TAGS)
        } else {
            self.store.set(path, ns, keys::TAGS, &join_tags(tags))
        };
        match result {
            Err(e) if !authoritative && !matches!(e, FlowError::UnsupportedMetadata(_)) => {
                warn!("mirroring {:?} tags for {:?} failed: {}", ns, path, e);
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassificationMethod;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<(PathBuf, String), String>>,
    }

    impl AttributeStore for MemoryStore {
        fn get(&self, path: &Path, ns: Namespace, key: &str) -> Result<Option<String>, FlowError> {
            let values = self.values.lock().unwrap();
            Ok(values.get(&(path.to_path_buf(), ns.attribute(key))).cloned())
        }

        fn set(&self, path: &Path, ns: Namespace, key: &str, value: &str) -> Result<(), FlowError> {
            self.values
                .lock()
                .unwrap()
                .insert((path.to_path_buf(), ns.attribute(key)), value.to_string());
            Ok(())
        }

        fn remove(&self, path: &Path, ns: Namespace, key: &str) -> Result<(), FlowError> {
            self.values
                .lock()
                .unwrap()
                .remove(&(path.to_path_buf(), ns.attribute(key)));
            Ok(())
        }

        fn list_keys(&self, _path: &Path, _ns: Namespace) -> Result<BTreeSet<String>, FlowError> {
            Ok(BTreeSet::new())
        }
    }

    struct Unsupported;

    impl AttributeStore for Unsupported {
        fn get(&self, path: &Path, _: Namespace, _: &str) -> Result<Option<String>, FlowError> {
            Err(FlowError::UnsupportedMetadata(path.to_path_buf()))
        }
        fn set(&self, path: &Path, _: Namespace, _: &str, _: &str) -> Result<(), FlowError> {
            Err(FlowError::UnsupportedMetadata(path.to_path_buf()))
        }
        fn remove(&self, path: &Path, _: Namespace, _: &str) -> Result<(), FlowError> {
            Err(FlowError::UnsupportedMetadata(path.to_path_buf()))
        }
        fn list_keys(&self, path: &Path, _: Namespace) -> Result<BTreeSet<String>, FlowError> {
            Err(FlowError::UnsupportedMetadata(path.to_path_buf()))
        }
    }

    fn manager(store: Arc<dyn AttributeStore>, preferred: PreferredNamespace, preserve: bool, xdg: bool) -> TagManager {
        TagManager::new(
            TaggingConfig {
                enabled: true,
                auto_tag: true,
                xdg_compat: xdg,
                preferred_namespace: preferred,
                preserve_existing: preserve,
            },
            store,
            Arc::new(MetadataWarning::default()),
        )
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn file() -> PathBuf {
        PathBuf::from("/inbox/all/report.pdf")
    }

    #[test]
    fn preserve_unions_and_replace_overwrites() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        let preserving = manager(store.clone(), PreferredNamespace::Flowsort, true, true);
        let replacing = manager(store.clone(), PreferredNamespace::Flowsort, false, true);

        preserving.add_tags(&file(), &set(&["work"])).unwrap();
        preserving.add_tags(&file(), &set(&["project"])).unwrap();
        assert_eq!(preserving.read_tags(&file()).unwrap().flowsort_tags, set(&["work", "project"]));

        replacing.add_tags(&file(), &set(&["final"])).unwrap();
        let tags = replacing.read_tags(&file()).unwrap();
        assert_eq!(tags.flowsort_tags, set(&["final"]));
        assert_eq!(tags.xdg_tags, set(&["final"]));
    }

    #[test]
    fn xdg_mirror_includes_category() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        store
            .set(&file(), Namespace::Flowsort, keys::CATEGORY, "documents")
            .unwrap();
        let tags = manager(store, PreferredNamespace::Flowsort, true, true);

        tags.add_tags(&file(), &set(&["work"])).unwrap();

        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.category.as_deref(), Some("documents"));
        assert_eq!(read.flowsort_tags, set(&["work"]));
        assert_eq!(read.xdg_tags, set(&["documents", "work"]));
    }

    #[test]
    fn xdg_preferred_writes_both_namespaces() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        store.set(&file(), Namespace::Xdg, keys::TAGS, "starred").unwrap();
        let tags = manager(store, PreferredNamespace::Xdg, true, true);

        tags.add_tags(&file(), &set(&["work"])).unwrap();

        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.xdg_tags, set(&["starred", "work"]));
        assert_eq!(read.flowsort_tags, set(&["work"]));
    }

    #[test]
    fn without_xdg_compat_only_flowsort_is_written() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        let tags = manager(store, PreferredNamespace::Xdg, true, false);

        tags.add_tags(&file(), &set(&["work"])).unwrap();

        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.flowsort_tags, set(&["work"]));
        assert!(read.xdg_tags.is_empty());
    }

    #[test]
    fn category_tags_are_applied_on_classification() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        let tags = manager(store, PreferredNamespace::Flowsort, false, true);
        let classification = ClassificationResult {
            category: "images".into(),
            confidence: 0.9,
            method: ClassificationMethod::ExtensionMatch,
        };

        tags.apply_category_tags(&file(), &classification, None).unwrap();

        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.flowsort_tags, set(&["images"]));
        assert_eq!(read.xdg_tags, set(&["images"]));
    }

    fn classified(category: &str) -> ClassificationResult {
        ClassificationResult {
            category: category.into(),
            confidence: 0.9,
            method: ClassificationMethod::ExtensionMatch,
        }
    }

    #[test]
    fn changed_category_replaces_the_old_category_tag() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        let tags = manager(store, PreferredNamespace::Flowsort, true, true);
        tags.apply_category_tags(&file(), &classified("documents"), None).unwrap();
        tags.add_tags(&file(), &set(&["work"])).unwrap();

        tags.apply_category_tags(&file(), &classified("papers"), Some("documents"))
            .unwrap();

        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.flowsort_tags, set(&["papers", "work"]));
        assert_eq!(read.xdg_tags, set(&["papers", "work"]));
    }

    #[test]
    fn unchanged_category_keeps_user_tags() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        let tags = manager(store, PreferredNamespace::Xdg, true, true);
        tags.apply_category_tags(&file(), &classified("documents"), None).unwrap();
        tags.add_tags(&file(), &set(&["work"])).unwrap();

        tags.apply_category_tags(&file(), &classified("documents"), Some("documents"))
            .unwrap();

        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.flowsort_tags, set(&["documents", "work"]));
        assert_eq!(read.xdg_tags, set(&["documents", "work"]));
    }

    #[test]
    fn replace_policy_overwrites_on_category_tagging() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        let preserving = manager(store.clone(), PreferredNamespace::Flowsort, true, true);
        preserving.add_tags(&file(), &set(&["work"])).unwrap();
        let replacing = manager(store, PreferredNamespace::Flowsort, false, true);

        replacing.apply_category_tags(&file(), &classified("images"), None).unwrap();

        let read = replacing.read_tags(&file()).unwrap();
        assert_eq!(read.flowsort_tags, set(&["images"]));
        assert_eq!(read.xdg_tags, set(&["images"]));
    }

    #[test]
    fn remove_and_clear() {
        let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::default());
        store
            .set(&file(), Namespace::Flowsort, keys::CATEGORY, "documents")
            .unwrap();
        let tags = manager(store, PreferredNamespace::Flowsort, true, true);
        tags.add_tags(&file(), &set(&["work", "draft"])).unwrap();

        tags.remove_tags(&file(), &set(&["draft"])).unwrap();
        let read = tags.read_tags(&file()).unwrap();
        assert_eq!(read.flowsort_tags, set(&["work"]));
        assert_eq!(read.xdg_tags, set(&["documents", "work"]));

        tags.clear_tags(&file()).unwrap();
        let read = tags.read_tags(&file()).unwrap();
        assert!(read.flowsort_tags.is_empty());
        assert!(read.xdg_tags.is_empty());
        assert_eq!(read.category.as_deref(), Some("documents"));
    }

    #[test]
    fn unsupported_attributes_degrade_to_noop() {
        let warning = Arc::new(MetadataWarning::default());
        let tags = TagManager::new(TaggingConfig::default(), Arc::new(Unsupported), warning.clone());

        tags.add_tags(&file(), &set(&["work"])).unwrap();
        assert_eq!(tags.read_tags(&file()).unwrap(), TagSet::default());
        assert!(warning.emitted());
    }

    #[test]
    fn tag_strings_roundtrip_through_commas() {
        assert_eq!(split_tags(" work, ,project "), set(&["project", "work"]));
        assert_eq!(join_tags(&set(&["b", "a"])), "a,b");
    }
}
