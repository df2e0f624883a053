//! Prompt templates.
//!
//! Templates are plain text with `{TOKEN}` placeholders. A provider returns
//! the texts declared for an artifact type; rendering substitutes exact keys
//! and leaves anything unmatched in place.

pub mod cache;
pub mod prompt;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};

use crate::assets::Assets;
use crate::catalog::ArtifactTypeDef;

pub use cache::TemplateCache;
pub use prompt::{PromptInputs, build_prompt};

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").unwrap());

static CONTEXT_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]{1,63}$").unwrap());

/// Placeholder names that are formatting hints rather than context keys.
const NON_CONTEXT_PLACEHOLDERS: &[&str] = &[
    "YYYYMMDDHHMMSS",
    "YYYY_MM_DD_HH_MM_SS",
    "YYYY-MM-DD HH:MM:SS",
    "YYYY-MM-DD",
    "URL",
];

/// Every distinct placeholder name in `template`, in order of appearance.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER_REGEX
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Whether a placeholder names a context value.
pub fn is_context_placeholder(name: &str) -> bool {
    CONTEXT_TOKEN_REGEX.is_match(name)
        && !NON_CONTEXT_PLACEHOLDERS.contains(&name)
        && !name.starts_with("YYYY")
}

/// Substitute `{KEY}` placeholders whose exact key is present in `values`.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Source of prompt templates for an artifact type.
pub trait TemplateProvider: Send + Sync {
    fn templates(&self, artifact: &ArtifactTypeDef) -> Result<Vec<String>>;
}

/// Reads catalog-declared template paths relative to a root directory,
/// falling back to the templates compiled into the binary.
pub struct FileTemplateProvider {
    root: PathBuf,
    cache: Arc<TemplateCache>,
}

impl FileTemplateProvider {
    pub fn new(root: impl Into<PathBuf>, cache: Arc<TemplateCache>) -> Self {
        Self {
            root: root.into(),
            cache,
        }
    }

    fn load(&self, relative: &str) -> Result<String> {
        if relative.contains("..") {
            bail!("Template path escapes the templates root: {}", relative);
        }
        if let Some(text) = self.cache.get(relative) {
            return Ok(text);
        }

        let path = self.root.join(relative);
        let text = if path.exists() {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read template {}", path.display()))?
        } else {
            let embedded = Assets::get(&format!("templates/{}", relative))
                .with_context(|| format!("Template not found: {}", relative))?;
            String::from_utf8(embedded.data.into_owned())
                .with_context(|| format!("Template is not UTF-8: {}", relative))?
        };

        self.cache.insert(relative, &text);
        Ok(text)
    }
}

impl TemplateProvider for FileTemplateProvider {
    fn templates(&self, artifact: &ArtifactTypeDef) -> Result<Vec<String>> {
        if artifact.templates.is_empty() {
            return Ok(vec![generic_template(artifact)]);
        }
        artifact
            .templates
            .iter()
            .map(|relative| self.load(relative))
            .collect()
    }
}

/// Fallback prompt for artifact types that declare no templates.
pub fn generic_template(artifact: &ArtifactTypeDef) -> String {
    let mut text = format!("Produce the {} for this project.", artifact.name);
    if !artifact.description.trim().is_empty() {
        text.push_str("\n\n");
        text.push_str(artifact.description.trim());
    }
    text
}
