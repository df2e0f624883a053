//! Critique-revise gate.
//!
//! One review call grades the draft and returns `{pass, issues, advice}` as
//! JSON. When issues come back, a single revision call rewrites the draft
//! against the numbered issues. There is no refinement loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::GenerationError;
use crate::llm::{GenerateOptions, TextGenerator};
use crate::util::{extract_json_object, strip_code_fence, truncate_chars};

const CRITIQUE_TEMPERATURE: f32 = 0.2;
const REVISE_TEMPERATURE: f32 = 0.5;
const CRITIQUE_DRAFT_MAX_CHARS: usize = 12_000;
const REVISE_DRAFT_MAX_CHARS: usize = 14_000;

/// Record of what the gate did, stored on the run and the artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CritiqueTrace {
    pub enabled: bool,
    pub revised: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
    /// The gate is on globally but this artifact type opts out
    #[serde(default)]
    pub skipped: bool,
}

impl CritiqueTrace {
    /// Trace for an artifact that bypassed the gate.
    pub fn bypassed(globally_enabled: bool) -> Self {
        Self {
            enabled: globally_enabled,
            skipped: globally_enabled,
            ..Self::default()
        }
    }
}

/// Parsed review verdict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    pub pass: bool,
    pub issues: Vec<String>,
    pub advice: Option<String>,
}

impl Verdict {
    pub fn needs_revision(&self) -> bool {
        !self.pass && !self.issues.is_empty()
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    pass: Option<serde_json::Value>,
    #[serde(default)]
    issues: Option<serde_json::Value>,
    #[serde(default)]
    advice: Option<serde_json::Value>,
}

/// Parse a review response. Unparseable output yields an empty verdict,
/// which leaves the draft unchanged.
pub fn parse_verdict(text: &str) -> Verdict {
    let Some(json) = extract_json_object(text) else {
        return Verdict::default();
    };
    let Ok(raw) = serde_json::from_str::<RawVerdict>(&json) else {
        return Verdict::default();
    };

    let pass = match raw.pass {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let issues = match raw.issues {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    let advice = match raw.advice {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };

    Verdict {
        pass,
        issues,
        advice,
    }
}

#[derive(Debug, Clone)]
pub struct CritiqueSettings {
    pub critique_max_tokens: u32,
    pub revise_max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CritiqueSettings {
    fn default() -> Self {
        Self {
            critique_max_tokens: 600,
            revise_max_tokens: 4000,
            timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CritiqueOutcome {
    pub content: String,
    pub tokens: u64,
    pub trace: CritiqueTrace,
}

pub struct CritiqueGate {
    generator: Arc<dyn TextGenerator>,
    settings: CritiqueSettings,
}

impl CritiqueGate {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: CritiqueSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Review `content` and revise it at most once.
    ///
    /// `revise_max_tokens` overrides the configured revision budget, for
    /// long-form types whose loop budget is larger.
    pub async fn review(
        &self,
        artifact_type: &str,
        content: &str,
        revise_max_tokens: Option<u32>,
    ) -> Result<CritiqueOutcome, GenerationError> {
        let critique_prompt = format!(
            "You are a document quality reviewer. Check whether the following {} draft is \
             structurally complete, consistent with its dependency inputs and free of obvious \
             self-contradictions.\n\n\
             Respond with JSON only:\n\
             {{\"pass\": true/false, \"issues\": [\"issue 1\", \"issue 2\"], \"advice\": \"one-line fix suggestion\"}}\n\n\
             Draft:\n{}",
            artifact_type,
            truncate_chars(content, CRITIQUE_DRAFT_MAX_CHARS)
        );
        let options = GenerateOptions {
            max_output_tokens: self.settings.critique_max_tokens,
            temperature: CRITIQUE_TEMPERATURE,
            timeout: self.settings.timeout,
            json_mode: true,
        };
        let critique = self.generator.generate(&critique_prompt, &options).await?;
        let mut tokens = critique.total_tokens;
        let verdict = parse_verdict(&critique.content);

        debug!(
            artifact_type,
            pass = verdict.pass,
            issue_count = verdict.issues.len(),
            "critique verdict received"
        );

        if !verdict.needs_revision() {
            return Ok(CritiqueOutcome {
                content: content.to_string(),
                tokens,
                trace: CritiqueTrace {
                    enabled: true,
                    revised: false,
                    issues: verdict.issues,
                    advice: verdict.advice,
                    skipped: false,
                },
            });
        }

        let numbered: Vec<String> = verdict
            .issues
            .iter()
            .enumerate()
            .map(|(i, issue)| format!("{}. {}", i + 1, issue))
            .collect();
        let revise_prompt = format!(
            "Revise the document below to address the review issues. Output only the final \
             revised content, with no explanation.\n\n\
             Review issues:\n{}\n\n\
             Original:\n{}",
            numbered.join("\n"),
            truncate_chars(content, REVISE_DRAFT_MAX_CHARS)
        );
        let options = GenerateOptions {
            max_output_tokens: revise_max_tokens.unwrap_or(self.settings.revise_max_tokens),
            temperature: REVISE_TEMPERATURE,
            timeout: self.settings.timeout,
            json_mode: false,
        };
        let revised = self.generator.generate(&revise_prompt, &options).await?;
        tokens += revised.total_tokens;

        info!(
            artifact_type,
            issue_count = verdict.issues.len(),
            "draft revised after critique"
        );

        let revised_content = strip_code_fence(&revised.content);
        let content = if revised_content.is_empty() {
            content.to_string()
        } else {
            revised_content
        };

        Ok(CritiqueOutcome {
            content,
            tokens,
            trace: CritiqueTrace {
                enabled: true,
                revised: true,
                issues: verdict.issues,
                advice: verdict.advice,
                skipped: false,
            },
        })
    }
}
