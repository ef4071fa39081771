use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::debug;

use crate::layout::MISC;
use crate::models::{ClassificationMethod, ClassificationResult};

const EXTENSION_CONFIDENCE: f32 = 0.9;
const MIME_CONFIDENCE: f32 = 0.6;
const CONTENT_MODEL_CONFIDENCE: f32 = 0.8;

/// Anything that can put a file name (plus an optional detected MIME type)
/// into a category.
pub trait Classifier: Send + Sync {
    fn classify(&self, file_name: &str, mime: Option<&str>) -> ClassificationResult;
}

/// Extension table first, MIME prefix rules second, `misc` otherwise.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    extension_map: HashMap<String, String>,
}

impl HeuristicClassifier {
    pub fn from_categories(categories: &BTreeMap<String, Vec<String>>) -> Self {
        let mut extension_map = HashMap::new();
        for (category, extensions) in categories {
            for ext in extensions {
                extension_map.insert(normalize_extension(ext), category.clone());
            }
        }
        Self { extension_map }
    }
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, file_name: &str, mime: Option<&str>) -> ClassificationResult {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension);
        if let Some(category) = ext.as_ref().and_then(|e| self.extension_map.get(e)) {
            return ClassificationResult {
                category: category.clone(),
                confidence: EXTENSION_CONFIDENCE,
                method: ClassificationMethod::ExtensionMatch,
            };
        }
        if let Some(category) = mime.and_then(mime_category) {
            return ClassificationResult {
                category: category.to_string(),
                confidence: MIME_CONFIDENCE,
                method: ClassificationMethod::MimeFallback,
            };
        }
        debug!("no category for {:?} (mime {:?}), using misc", file_name, mime);
        ClassificationResult {
            category: MISC.to_string(),
            confidence: 0.0,
            method: ClassificationMethod::Unmatched,
        }
    }
}

fn mime_category(mime: &str) -> Option<&'static str> {
    let mime = mime.to_ascii_lowercase();
    let label = if mime.starts_with("text/") || mime == "application/pdf" {
        "documents"
    } else if mime.starts_with("image/") {
        "images"
    } else if mime.starts_with("video/") || mime.starts_with("audio/") {
        "media"
    } else if mime.starts_with("application/")
        && ["zip", "tar", "compressed", "gzip", "x-7z", "x-rar", "x-bzip", "x-xz"]
            .iter()
            .any(|marker| mime.contains(marker))
    {
        "archives"
    } else {
        return None;
    };
    Some(label)
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// A model that may label a file from its name and MIME type. No model ships
/// with the crate; this is the attachment point for one.
pub trait ContentModel: Send + Sync {
    fn infer_category(&self, file_name: &str, mime: Option<&str>) -> Option<String>;
}

/// Asks the content model first and falls back to the heuristic when the
/// model abstains.
pub struct ContentModelClassifier {
    model: Box<dyn ContentModel>,
    fallback: HeuristicClassifier,
}

impl ContentModelClassifier {
    pub fn new(model: Box<dyn ContentModel>, fallback: HeuristicClassifier) -> Self {
        Self { model, fallback }
    }
}

impl Classifier for ContentModelClassifier {
    fn classify(&self, file_name: &str, mime: Option<&str>) -> ClassificationResult {
        match self.model.infer_category(file_name, mime) {
            Some(category) => ClassificationResult {
                category,
                confidence: CONTENT_MODEL_CONFIDENCE,
                method: ClassificationMethod::ContentModel,
            },
            None => self.fallback.classify(file_name, mime),
        }
    }
}

/// Guesses the MIME type from the name; for names without a usable guess,
/// sniffs the magic bytes of the file if it exists.
pub fn detect_mime(path: &Path) -> Option<String> {
    if let Some(guess) = mime_guess::from_path(path).first_raw() {
        return Some(guess.to_string());
    }
    if path.is_file() {
        if let Ok(Some(kind)) = infer::get_from_path(path) {
            return Some(kind.mime_type().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_categories;

    fn heuristic() -> HeuristicClassifier {
        HeuristicClassifier::from_categories(&default_categories())
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let result = heuristic().classify("Report.PDF", None);
        assert_eq!(result.category, "documents");
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.method, ClassificationMethod::ExtensionMatch);
    }

    #[test]
    fn sample_files_land_in_expected_categories() {
        let classifier = heuristic();
        for (name, expected) in [
            ("photo.jpg", "images"),
            ("backup.zip", "archives"),
            ("movie.mp4", "media"),
            ("script.py", "code"),
            ("data.csv", "spreadsheets"),
            ("slides.pptx", "presentations"),
            ("tool.deb", "packages"),
            ("archive.tar.gz", "archives"),
        ] {
            assert_eq!(classifier.classify(name, None).category, expected, "{name}");
        }
    }

    #[test]
    fn mime_fallback_rules() {
        let classifier = heuristic();
        for (mime, expected) in [
            ("text/x-log", "documents"),
            ("image/webp", "images"),
            ("audio/ogg", "media"),
            ("video/webm", "media"),
            ("application/pdf", "documents"),
            ("application/x-7z-compressed", "archives"),
            ("application/gzip", "archives"),
        ] {
            let result = classifier.classify("unknown.blob", Some(mime));
            assert_eq!(result.category, expected, "{mime}");
            assert_eq!(result.confidence, 0.6);
            assert_eq!(result.method, ClassificationMethod::MimeFallback);
        }
    }

    #[test]
    fn unknown_file_is_misc_with_zero_confidence() {
        let result = heuristic().classify("unknown.xyz", Some("application/octet-stream"));
        assert_eq!(result.category, "misc");
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_ambiguous());
    }

    #[test]
    fn configured_extensions_may_omit_the_dot() {
        let mut categories = BTreeMap::new();
        categories.insert("ebooks".to_string(), vec!["EPUB".to_string()]);
        let result = HeuristicClassifier::from_categories(&categories).classify("book.epub", None);
        assert_eq!(result.category, "ebooks");
    }

    struct FixedModel(Option<&'static str>);

    impl ContentModel for FixedModel {
        fn infer_category(&self, _file_name: &str, _mime: Option<&str>) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn content_model_reports_its_own_confidence() {
        let classifier = ContentModelClassifier::new(Box::new(FixedModel(Some("invoices"))), heuristic());
        let result = classifier.classify("scan.pdf", None);
        assert_eq!(result.category, "invoices");
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.method, ClassificationMethod::ContentModel);
    }

    #[test]
    fn abstaining_content_model_falls_back() {
        let classifier = ContentModelClassifier::new(Box::new(FixedModel(None)), heuristic());
        let result = classifier.classify("scan.pdf", None);
        assert_eq!(result.method, ClassificationMethod::ExtensionMatch);
    }

    #[test]
    fn detect_mime_uses_name_then_content() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(
            detect_mime(&temp.path().join("x.png")).as_deref(),
            Some("image/png")
        );

        let sniffed = temp.path().join("noext");
        std::fs::write(&sniffed, b"%PDF-1.7\n").unwrap();
        assert_eq!(detect_mime(&sniffed).as_deref(), Some("application/pdf"));
    }
}
