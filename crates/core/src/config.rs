use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FlowError;
use crate::layout::RESERVED_DIRS;
use crate::rules::TimeRuleConfig;
use crate::scanner::build_globset;

const CONFIG_DIR: &str = ".flowsort";
const CONFIG_FILE: &str = "config.json";
const MAX_THRESHOLD_DAYS: u32 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default)]
    pub inbox_path: Option<PathBuf>,
    #[serde(default)]
    pub documents_path: Option<PathBuf>,
    #[serde(default)]
    pub archive_path: Option<PathBuf>,
    #[serde(default)]
    pub system_path: Option<PathBuf>,
    #[serde(default = "default_downloads_path")]
    pub downloads_path: PathBuf,

    #[serde(default = "default_inbox_to_documents")]
    pub inbox_to_documents_days: u32,
    #[serde(default = "default_documents_to_archive")]
    pub documents_to_archive_days: u32,
    #[serde(default = "default_inbox_to_archive")]
    pub inbox_to_archive_days: u32,

    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreferredNamespace {
    #[default]
    Flowsort,
    Xdg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingConfig {
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default = "yes")]
    pub auto_tag: bool,
    #[serde(default = "yes")]
    pub xdg_compat: bool,
    #[serde(default)]
    pub preferred_namespace: PreferredNamespace,
    #[serde(default = "yes")]
    pub preserve_existing: bool,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_tag: true,
            xdg_compat: true,
            preferred_namespace: PreferredNamespace::Flowsort,
            preserve_existing: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::with_base(default_base_path())
    }
}

impl AppConfig {
    /// Defaults rooted at `base`, stage paths derived from it.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base.into(),
            inbox_path: None,
            documents_path: None,
            archive_path: None,
            system_path: None,
            downloads_path: default_downloads_path(),
            inbox_to_documents_days: default_inbox_to_documents(),
            documents_to_archive_days: default_documents_to_archive(),
            inbox_to_archive_days: default_inbox_to_archive(),
            categories: default_categories(),
            tagging: TaggingConfig::default(),
            collect: CollectConfig::default(),
            lock: LockConfig::default(),
        }
    }

    pub fn time_rules(&self) -> TimeRuleConfig {
        TimeRuleConfig {
            inbox_to_documents: self.inbox_to_documents_days,
            documents_to_archive: self.documents_to_archive_days,
            inbox_to_archive: self.inbox_to_archive_days,
        }
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        let rules = self.time_rules();
        for (name, days) in [
            ("inbox_to_documents_days", rules.inbox_to_documents),
            ("documents_to_archive_days", rules.documents_to_archive),
            ("inbox_to_archive_days", rules.inbox_to_archive),
        ] {
            if days > MAX_THRESHOLD_DAYS {
                return Err(FlowError::InvalidTimeRuleConfig(format!(
                    "{name} must be at most {MAX_THRESHOLD_DAYS}, got {days}"
                )));
            }
        }
        rules.validate()?;
        for category in self.categories.keys() {
            if category.is_empty() || category.contains(&['/', '\\'][..]) {
                return Err(FlowError::InvalidConfig(format!(
                    "category name {category:?} is not a plain directory name"
                )));
            }
            if RESERVED_DIRS.contains(&category.as_str()) {
                return Err(FlowError::InvalidConfig(format!(
                    "category name {category:?} is reserved"
                )));
            }
        }
        build_globset(&self.collect.exclude)?;
        Ok(())
    }
}

/// Location of the preferences file when none is given explicitly.
pub fn default_config_path() -> PathBuf {
    home().join(CONFIG_DIR).join(CONFIG_FILE)
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        // May not exist yet when `init` is about to create it.
        settings = settings.add_source(config::File::with_name(p).required(false));
    } else {
        settings = settings.add_source(config::File::from(default_config_path()).required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("FLOWSORT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Writes `cfg` as pretty JSON, creating the directory and a `.gitignore`
/// that keeps the preferences out of version control.
pub fn save(cfg: &AppConfig, path: &Path) -> anyhow::Result<()> {
    cfg.validate()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
        let gitignore = dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n!.gitignore\n")?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(cfg)?)?;
    Ok(())
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn yes() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    home()
}

fn default_downloads_path() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| home().join("Downloads"))
}

fn default_inbox_to_documents() -> u32 {
    7
}

fn default_documents_to_archive() -> u32 {
    30
}

fn default_inbox_to_archive() -> u32 {
    90
}

fn default_lock_timeout() -> u64 {
    30
}

pub fn default_categories() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 8] = [
        ("documents", &[".pdf", ".doc", ".docx", ".txt", ".odt", ".rtf", ".md"]),
        ("images", &[".jpg", ".jpeg", ".png", ".gif", ".svg", ".bmp", ".tiff"]),
        ("archives", &[".zip", ".tar", ".gz", ".rar", ".7z", ".xz", ".bz2"]),
        ("media", &[".mp4", ".avi", ".mkv", ".mov", ".mp3", ".wav", ".flac"]),
        ("packages", &[".deb", ".rpm", ".appimage", ".snap", ".flatpak"]),
        ("code", &[".py", ".js", ".html", ".css", ".json", ".xml", ".yml", ".yaml"]),
        ("spreadsheets", &[".xls", ".xlsx", ".csv", ".ods"]),
        ("presentations", &[".ppt", ".pptx", ".odp"]),
    ];
    table
        .iter()
        .map(|(name, exts)| {
            (
                name.to_string(),
                exts.iter().map(|e| e.to_string()).collect(),
            )
        })
        .collect()
}
