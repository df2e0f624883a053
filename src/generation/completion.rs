//! Completion detection for assembled generation output.

use std::sync::LazyLock;

use regex::Regex;

static HTML_OPEN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<html[\s>]").unwrap());

static BODY_OPEN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<body[\s>]").unwrap());

static HTML_CLOSE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</html>").unwrap());

/// Decides whether assembled output is finished.
pub trait CompletionDetector: Send + Sync {
    fn is_complete(&self, assembled: &str) -> bool;

    /// Short name recorded in logs.
    fn name(&self) -> &'static str;
}

/// Complete once the designated end marker appears anywhere.
#[derive(Debug, Clone)]
pub struct EndMarkerDetector {
    marker: String,
}

impl EndMarkerDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl CompletionDetector for EndMarkerDetector {
    fn is_complete(&self, assembled: &str) -> bool {
        !self.marker.is_empty() && assembled.contains(&self.marker)
    }

    fn name(&self) -> &'static str {
        "end_marker"
    }
}

/// A single-file HTML document with `<html>`, `<body>` and `</html>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlDocumentDetector;

impl CompletionDetector for HtmlDocumentDetector {
    fn is_complete(&self, assembled: &str) -> bool {
        let text = assembled.trim();
        !text.is_empty()
            && HTML_OPEN_REGEX.is_match(text)
            && BODY_OPEN_REGEX.is_match(text)
            && HTML_CLOSE_REGEX.is_match(text)
    }

    fn name(&self) -> &'static str {
        "html_document"
    }
}

/// A JSON object or array that parses in full.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadDetector;

impl CompletionDetector for JsonPayloadDetector {
    fn is_complete(&self, assembled: &str) -> bool {
        matches!(
            serde_json::from_str::<serde_json::Value>(assembled.trim()),
            Ok(serde_json::Value::Object(_)) | Ok(serde_json::Value::Array(_))
        )
    }

    fn name(&self) -> &'static str {
        "json_payload"
    }
}
