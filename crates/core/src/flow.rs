//! The flow store: moves canonical files between stages and keeps the
//! category link views in step with them.
//!
//! Every mutating entry point takes the cross-process lock first and then
//! runs its unlocked body, so nothing is touched before the lock is held.
//! Per-file failures land in the batch report; only configuration and lock
//! errors abort a batch.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::attributes::{keys, AttributeStore, MetadataWarning, Namespace, XattrStore};
use crate::classifier::{detect_mime, Classifier, HeuristicClassifier};
use crate::config::AppConfig;
use crate::error::FlowError;
use crate::fs_apply::{self, LinkChange};
use crate::layout::{Layout, ALL_DIR};
use crate::lock::FlowLock;
use crate::models::{ClassificationResult, FileRecord, Stage};
use crate::reports::{
    CleanupReport, CollectedFile, CollectionReport, FileFailure, MovedFile, RetagReport, RetaggedFile,
    TransitionReport,
};
use crate::rules::{RuleContext, StageDecision, TimeRule, TimeRulePolicy};
use crate::scanner::{self, canonical_files, view_links};
use crate::status::{Reporter, StatusReport};
use crate::tags::{TagManager, TagSet};

pub struct FlowStore {
    config: Arc<AppConfig>,
    layout: Layout,
    policy: TimeRulePolicy,
    classifier: Arc<dyn Classifier>,
    attributes: Arc<dyn AttributeStore>,
    tags: TagManager,
    warning: Arc<MetadataWarning>,
    cancel: Arc<AtomicBool>,
}

impl FlowStore {
    /// Validates `config` up front; nothing on disk is touched.
    pub fn new(config: AppConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let policy = TimeRulePolicy::new(config.time_rules())?;
        let layout = Layout::from_config(&config);
        let classifier: Arc<dyn Classifier> = Arc::new(HeuristicClassifier::from_categories(&config.categories));
        let attributes: Arc<dyn AttributeStore> = Arc::new(XattrStore::new());
        let warning = Arc::new(MetadataWarning::default());
        let tags = TagManager::new(config.tagging.clone(), attributes.clone(), warning.clone());
        Ok(Self {
            config: Arc::new(config),
            layout,
            policy,
            classifier,
            attributes,
            tags,
            warning,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_attributes(mut self, attributes: Arc<dyn AttributeStore>) -> Self {
        self.tags = TagManager::new(self.config.tagging.clone(), attributes.clone(), self.warning.clone());
        self.attributes = attributes;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn metadata_warning(&self) -> &MetadataWarning {
        &self.warning
    }

    /// Set to stop a running batch before its next file.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<FlowLock, FlowError> {
        FlowLock::acquire(
            &self.layout.lock_path(),
            Duration::from_secs(self.config.lock.timeout_secs),
        )
    }

    /// Creates the stage skeleton.
    pub fn init(&self) -> Result<(), FlowError> {
        self.layout.ensure(self.config.categories.keys())?;
        info!("initialized stage roots under {:?}", self.config.base_path);
        Ok(())
    }

    pub fn classify_single(&self, path: &Path) -> ClassificationResult {
        let name = path.file_name().map(OsStr::to_string_lossy).unwrap_or_default();
        let mime = detect_mime(path);
        self.classifier.classify(&name, mime.as_deref())
    }

    pub fn report_status(&self) -> Result<StatusReport, FlowError> {
        Reporter::new(&self.layout, self.attributes.as_ref(), &self.warning).report()
    }

    pub fn collect(&self, source: &Path) -> Result<CollectionReport, FlowError> {
        self.collect_with(source, self.config.collect.recursive)
    }

    pub fn collect_with(&self, source: &Path, recursive: bool) -> Result<CollectionReport, FlowError> {
        let _lock = self.lock()?;
        let mut opts = self.config.collect.clone();
        opts.recursive = recursive;
        let sources = scanner::source_files(source, &opts)?;
        info!("collecting {} files from {:?}", sources.len(), source);

        let mut report = CollectionReport::default();
        for src in sources {
            if self.cancelled() {
                report.interrupted = true;
                break;
            }
            match self.collect_one(&src) {
                Ok(entry) => report.collected.push(entry),
                Err(e) => {
                    warn!("collect {:?} failed: {}", src, e);
                    report.failures.push(FileFailure::new(&src, &e));
                }
            }
        }
        info!("collect summary: {}", report.summary());
        Ok(report)
    }

    fn collect_one(&self, src: &Path) -> Result<CollectedFile, FlowError> {
        let classification = self.classify_single(src);
        let stored = fs_apply::move_into(src, &self.layout.all_dir(Stage::Inbox))?;

        // The file is safe from here on; later steps only degrade.
        let mut degraded = Vec::new();
        self.record_classification(&stored, &classification, Some(Utc::now()), &mut degraded);
        if let Err(e) = self.tags.apply_category_tags(&stored, &classification, None) {
            degraded.push(format!("tags: {e}"));
        }
        let name = file_name(&stored);
        for (link, target) in self
            .layout
            .expected_links(Stage::Inbox, &classification.category, &name, None)
        {
            if let Err(e) = fs_apply::ensure_link(&link, &target) {
                warn!("{}", e);
                degraded.push(e.to_string());
            }
        }

        Ok(CollectedFile {
            source: src.to_path_buf(),
            stored,
            category: classification.category,
            confidence: classification.confidence,
            method: classification.method,
            degraded,
        })
    }

    pub fn sweep(&self) -> Result<TransitionReport, FlowError> {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<TransitionReport, FlowError> {
        let _lock = self.lock()?;

        // Snapshot first so a file moved forward is not evaluated twice.
        let mut snapshot = Vec::new();
        for stage in Stage::ALL {
            for path in canonical_files(&self.layout.all_dir(stage))? {
                snapshot.push((stage, path));
            }
        }

        let mut report = TransitionReport::default();
        for (stage, path) in snapshot {
            if self.cancelled() {
                report.interrupted = true;
                break;
            }
            report.examined += 1;
            let record = match FileRecord::read(&path, self.attributes.as_ref()) {
                Ok(r) => r,
                Err(e) => {
                    report.failures.push(FileFailure::new(&path, &e));
                    continue;
                }
            };
            let Some(last_access) = record.accessed.or(record.modified) else {
                debug!("no access time for {:?}, leaving it", path);
                continue;
            };
            let ctx = RuleContext {
                stage,
                last_access,
                collected: record.collection_time(),
                now,
            };
            if let StageDecision::Move { to, rule } = self.policy.decide(&ctx) {
                match self.transition_unlocked(&path, stage, to, Some(rule)) {
                    Ok(moved) => report.moved.push(moved),
                    Err(e) => {
                        warn!("transition {:?} -> {} failed: {}", path, to, e);
                        report.failures.push(FileFailure::new(&path, &e));
                    }
                }
            }
        }
        info!("sweep summary: {}", report.summary());
        Ok(report)
    }

    /// Moves one canonical file to `target`. `Ok(None)` when it already
    /// lives there.
    pub fn transition(&self, path: &Path, target: Stage) -> Result<Option<MovedFile>, FlowError> {
        let _lock = self.lock()?;
        let from = self
            .layout
            .stage_of(path)
            .ok_or_else(|| FlowError::NotManaged(path.to_path_buf()))?;
        if from == target {
            return Ok(None);
        }
        self.transition_unlocked(path, from, target, None).map(Some)
    }

    fn transition_unlocked(
        &self,
        path: &Path,
        from: Stage,
        to: Stage,
        rule: Option<TimeRule>,
    ) -> Result<MovedFile, FlowError> {
        let old_name = file_name(path);
        let (category, reclassified) = match self.persisted_category(path) {
            Some(category) => (category, None),
            None => {
                let classification = self.classify_single(path);
                (classification.category.clone(), Some(classification))
            }
        };

        let dest = fs_apply::move_into(path, &self.layout.all_dir(to))?;

        let mut degraded = Vec::new();
        for link in self.links_to(from, &old_name) {
            if let Err(e) = fs_apply::remove_link(&link) {
                degraded.push(e.to_string());
            }
        }
        if let Some(classification) = &reclassified {
            self.record_classification(&dest, classification, None, &mut degraded);
        }
        let dated = modified_time(&dest);
        if to == Stage::Archive {
            if let Some(at) = dated {
                self.set_attribute(&dest, keys::ARCHIVE_DATE, &at.to_rfc3339(), &mut degraded);
            }
        }
        let name = file_name(&dest);
        for (link, target) in self.layout.expected_links(to, &category, &name, dated) {
            if let Err(e) = fs_apply::ensure_link(&link, &target) {
                warn!("{}", e);
                degraded.push(e.to_string());
            }
        }
        info!("{:?}: {} -> {}", dest, from, to);

        Ok(MovedFile {
            from: path.to_path_buf(),
            to: dest,
            from_stage: from,
            to_stage: to,
            rule,
            degraded,
        })
    }

    /// Links under `stage` that point at `all/<name>`.
    fn links_to(&self, stage: Stage, name: &OsStr) -> Vec<PathBuf> {
        let suffix = Path::new(ALL_DIR).join(name);
        view_links(self.layout.root(stage))
            .into_iter()
            .filter(|link| {
                fs::read_link(link)
                    .map(|target| target.ends_with(&suffix))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn cleanup(&self) -> Result<CleanupReport, FlowError> {
        let _lock = self.lock()?;
        let mut report = CleanupReport::default();

        'stages: for stage in Stage::ALL {
            for link in view_links(self.layout.root(stage)) {
                if self.cancelled() {
                    report.interrupted = true;
                    break 'stages;
                }
                if !fs_apply::is_broken_link(&link) {
                    continue;
                }
                match fs_apply::remove_link(&link) {
                    Ok(true) => report.removed.push(link),
                    Ok(false) => {}
                    Err(e) => report.failures.push(FileFailure::new(&link, &e)),
                }
            }

            for file in canonical_files(&self.layout.all_dir(stage))? {
                if self.cancelled() {
                    report.interrupted = true;
                    break 'stages;
                }
                let category = self
                    .persisted_category(&file)
                    .unwrap_or_else(|| self.classify_single(&file).category);
                let name = file_name(&file);
                for (link, target) in self
                    .layout
                    .expected_links(stage, &category, &name, self.view_date(&file))
                {
                    match fs_apply::ensure_link(&link, &target) {
                        Ok(LinkChange::Unchanged) => {}
                        Ok(_) => report.created.push(link),
                        Err(e) => report.failures.push(FileFailure::new(&file, &e)),
                    }
                }
            }
        }
        info!("cleanup summary: {}", report.summary());
        Ok(report)
    }

    /// Re-classifies every canonical file and moves its category link when
    /// the category changed.
    pub fn retag(&self) -> Result<RetagReport, FlowError> {
        let _lock = self.lock()?;
        let mut report = RetagReport::default();

        'stages: for stage in Stage::ALL {
            for file in canonical_files(&self.layout.all_dir(stage))? {
                if self.cancelled() {
                    report.interrupted = true;
                    break 'stages;
                }
                report.retagged.push(self.retag_one(stage, &file));
            }
        }
        info!("retag summary: {}", report.summary());
        Ok(report)
    }

    fn retag_one(&self, stage: Stage, file: &Path) -> RetaggedFile {
        let previous = self.persisted_category(file);
        let classification = self.classify_single(file);
        let name = file_name(file);
        let modified = self.view_date(file);

        let mut degraded = Vec::new();
        self.record_classification(file, &classification, None, &mut degraded);
        if let Err(e) = self.tags.apply_category_tags(file, &classification, previous.as_deref()) {
            degraded.push(format!("tags: {e}"));
        }

        if let Some(old) = previous.as_deref().filter(|old| *old != classification.category) {
            for (link, _) in self.layout.expected_links(stage, old, &name, modified) {
                if let Err(e) = fs_apply::remove_link(&link) {
                    degraded.push(e.to_string());
                }
            }
        }
        let mut relinked = false;
        for (link, target) in self
            .layout
            .expected_links(stage, &classification.category, &name, modified)
        {
            match fs_apply::ensure_link(&link, &target) {
                Ok(LinkChange::Unchanged) => {}
                Ok(_) => relinked = true,
                Err(e) => degraded.push(e.to_string()),
            }
        }

        RetaggedFile {
            path: file.to_path_buf(),
            previous,
            category: classification.category,
            confidence: classification.confidence,
            relinked,
            degraded,
        }
    }

    pub fn read_tags(&self, path: &Path) -> Result<TagSet, FlowError> {
        self.tags.read_tags(path)
    }

    pub fn add_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), FlowError> {
        let _lock = self.lock()?;
        self.tags.add_tags(path, tags)
    }

    pub fn remove_tags(&self, path: &Path, tags: &BTreeSet<String>) -> Result<(), FlowError> {
        let _lock = self.lock()?;
        self.tags.remove_tags(path, tags)
    }

    pub fn clear_tags(&self, path: &Path) -> Result<(), FlowError> {
        let _lock = self.lock()?;
        self.tags.clear_tags(path)
    }

    fn persisted_category(&self, path: &Path) -> Option<String> {
        match self.attributes.get(path, Namespace::Flowsort, keys::CATEGORY) {
            Ok(category) => category.filter(|c| !c.is_empty()),
            Err(e) => {
                self.warning.note(&e);
                debug!("no persisted category for {:?}: {}", path, e);
                None
            }
        }
    }

    /// Writes category, confidence and (when given) the collection time.
    /// Unsupported attributes are silent after the one-time warning; other
    /// failures are recorded as degradations.
    fn record_classification(
        &self,
        path: &Path,
        classification: &ClassificationResult,
        collected: Option<DateTime<Utc>>,
        degraded: &mut Vec<String>,
    ) {
        let mut writes = vec![
            (keys::CATEGORY, classification.category.clone()),
            (keys::CONFIDENCE, format!("{:.2}", classification.confidence)),
        ];
        if let Some(at) = collected {
            writes.push((keys::COLLECTED, at.to_rfc3339()));
        }
        for (key, value) in writes {
            if !self.set_attribute(path, key, &value, degraded) {
                return;
            }
        }
    }

    /// False once attributes turn out to be unsupported.
    fn set_attribute(&self, path: &Path, key: &str, value: &str, degraded: &mut Vec<String>) -> bool {
        match self.attributes.set(path, Namespace::Flowsort, key, value) {
            Ok(()) => true,
            Err(e @ FlowError::UnsupportedMetadata(_)) => {
                self.warning.note(&e);
                false
            }
            Err(e) => {
                degraded.push(format!("attribute {key}: {e}"));
                true
            }
        }
    }

    /// Date behind the `by-date` view: the one recorded on entering the
    /// archive, else the current modification time.
    fn view_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        let recorded = match self.attributes.get(path, Namespace::Flowsort, keys::ARCHIVE_DATE) {
            Ok(raw) => raw.and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok()),
            Err(e) => {
                self.warning.note(&e);
                None
            }
        };
        recorded
            .map(|at| at.with_timezone(&Utc))
            .or_else(|| modified_time(path))
    }
}

fn file_name(path: &Path) -> OsString {
    path.file_name().map(OsStr::to_os_string).unwrap_or_default()
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
