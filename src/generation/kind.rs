//! Output shape of an artifact type and the strategies that depend on it.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::completion::{CompletionDetector, HtmlDocumentDetector, JsonPayloadDetector};
use crate::util::{to_context_token, truncate_chars};

static HTML_DETECTOR: HtmlDocumentDetector = HtmlDocumentDetector;
static JSON_DETECTOR: JsonPayloadDetector = JsonPayloadDetector;

/// Characters of a truncated document quoted in a repair prompt.
pub const REPAIR_SOURCE_MAX_CHARS: usize = 20_000;

/// How an artifact type's output is structured.
///
/// | Kind           | End marker                 | Structural check       | Repair pass |
/// |----------------|----------------------------|------------------------|-------------|
/// | `Document`     | `<<END_OF_{TYPE}>>`        | none                   | no          |
/// | `HtmlDocument` | configured shared marker   | `<html>`/`<body>`/`</html>` | yes    |
/// | `JsonPayload`  | configured shared marker   | parses as JSON         | yes         |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    #[default]
    Document,
    #[serde(alias = "html")]
    HtmlDocument,
    #[serde(alias = "json")]
    JsonPayload,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::HtmlDocument => "html_document",
            Self::JsonPayload => "json_payload",
        }
    }

    /// End marker the model appends once the artifact is finished.
    pub fn end_marker(&self, artifact_type: &str, structured_marker: &str) -> String {
        match self {
            Self::Document => {
                let token = to_context_token(artifact_type);
                let token = if token.is_empty() {
                    "ARTIFACT".to_string()
                } else {
                    token
                };
                format!("<<END_OF_{}>>", token)
            }
            Self::HtmlDocument | Self::JsonPayload => structured_marker.to_string(),
        }
    }

    /// Heuristic that can stand in for the end marker.
    pub fn structural_detector(&self) -> Option<&'static dyn CompletionDetector> {
        match self {
            Self::Document => None,
            Self::HtmlDocument => Some(&HTML_DETECTOR),
            Self::JsonPayload => Some(&JSON_DETECTOR),
        }
    }

    /// Instruction appended to the first-round prompt.
    pub fn round_instruction(&self, end_marker: &str) -> String {
        match self {
            Self::Document => format!(
                "Output the complete final content of this deliverable.\n\
                 Requirements:\n\
                 1) Output only the deliverable body, no explanations;\n\
                 2) If you cannot finish in this round, continue in the next round without repeating;\n\
                 3) When everything has been output, append a final line {}.",
                end_marker
            ),
            Self::HtmlDocument => format!(
                "Output a complete, runnable single-file HTML document.\n\
                 Requirements:\n\
                 1) Output only HTML code, no explanations;\n\
                 2) If you cannot finish in this round, continue in the next round without repeating;\n\
                 3) When everything has been output, append a final line {};\n\
                 4) The final content must contain <!doctype html>, <html>, <body> and </html>.",
                end_marker
            ),
            Self::JsonPayload => format!(
                "Output a single valid JSON document.\n\
                 Requirements:\n\
                 1) Output only JSON, no explanations or code fences;\n\
                 2) If you cannot finish in this round, continue in the next round without repeating;\n\
                 3) When everything has been output, append a final line {}.",
                end_marker
            ),
        }
    }

    /// Prompt for one "finish this truncated document" call, or `None` for
    /// kinds without a structural check.
    pub fn repair_prompt(&self, content: &str) -> Option<String> {
        let source = truncate_chars(content, REPAIR_SOURCE_MAX_CHARS);
        match self {
            Self::Document => None,
            Self::HtmlDocument => Some(format!(
                "You repair front-end prototypes. The HTML below appears to be truncated.\n\
                 Output a complete, runnable single-file HTML document, from <!doctype html> to </html>.\n\n\
                 Requirements:\n\
                 1) Keep the existing design style and structure, do not drop major sections;\n\
                 2) If the end is cut off, complete the missing tags, styles and scripts;\n\
                 3) Output only HTML, no explanations.\n\n\
                 Content to repair:\n{}",
                source
            )),
            Self::JsonPayload => Some(format!(
                "The JSON below appears to be truncated or malformed.\n\
                 Output the complete, valid JSON document it was meant to be.\n\n\
                 Requirements:\n\
                 1) Keep every existing key and value;\n\
                 2) Close any unterminated strings, arrays and objects;\n\
                 3) Output only JSON, no explanations.\n\n\
                 Content to repair:\n{}",
                source
            )),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "html_document" | "html" => Ok(Self::HtmlDocument),
            "json_payload" | "json" => Ok(Self::JsonPayload),
            _ => Err(format!("Invalid artifact kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_end_marker_uses_type_token() {
        assert_eq!(
            ArtifactKind::Document.end_marker("ui-design", "<<END_OF_DOCUMENT>>"),
            "<<END_OF_UI_DESIGN>>"
        );
        assert_eq!(
            ArtifactKind::Document.end_marker("--", "<<END_OF_DOCUMENT>>"),
            "<<END_OF_ARTIFACT>>"
        );
    }

    #[test]
    fn test_structured_kinds_use_shared_marker() {
        assert_eq!(
            ArtifactKind::HtmlDocument.end_marker("prototype", "<<DONE>>"),
            "<<DONE>>"
        );
        assert_eq!(ArtifactKind::JsonPayload.end_marker("api", "<<DONE>>"), "<<DONE>>");
    }

    #[test]
    fn test_structural_detector_per_kind() {
        assert!(ArtifactKind::Document.structural_detector().is_none());
        let html = ArtifactKind::HtmlDocument.structural_detector().unwrap();
        assert_eq!(html.name(), "html_document");
        assert!(html.is_complete("<html><body></body></html>"));
        let json = ArtifactKind::JsonPayload.structural_detector().unwrap();
        assert!(json.is_complete("{}"));
    }

    #[test]
    fn test_repair_prompt_only_for_structured_kinds() {
        assert!(ArtifactKind::Document.repair_prompt("text").is_none());
        let prompt = ArtifactKind::HtmlDocument.repair_prompt("<html><body>").unwrap();
        assert!(prompt.ends_with("<html><body>"));
    }

    #[test]
    fn test_repair_prompt_truncates_source() {
        let source = "x".repeat(REPAIR_SOURCE_MAX_CHARS + 500);
        let prompt = ArtifactKind::JsonPayload.repair_prompt(&source).unwrap();
        assert!(prompt.ends_with(&"x".repeat(REPAIR_SOURCE_MAX_CHARS)));
        assert!(!prompt.contains(&"x".repeat(REPAIR_SOURCE_MAX_CHARS + 1)));
    }

    #[test]
    fn test_kind_parsing_accepts_aliases() {
        assert_eq!("html".parse::<ArtifactKind>().unwrap(), ArtifactKind::HtmlDocument);
        assert_eq!("json_payload".parse::<ArtifactKind>().unwrap(), ArtifactKind::JsonPayload);
        assert!("pdf".parse::<ArtifactKind>().is_err());

        #[derive(Deserialize)]
        struct Wrapper {
            kind: ArtifactKind,
        }
        let w: Wrapper = toml::from_str("kind = \"html\"").unwrap();
        assert_eq!(w.kind, ArtifactKind::HtmlDocument);
    }
}
