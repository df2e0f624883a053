//! Extractive compression of artifact content.
//!
//! Lines are ranked heading > constraint > bullet > other and the top few
//! unique lines become key points. No model call is involved.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::stageforge_config::ContextSection;
use crate::util::{char_len, truncate_chars};

static HEADING_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+").unwrap());

static BULLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*•]\s+|\d+\.\s+)").unwrap());

static CONSTRAINT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)must|forbidden|not allowed|constraint|dependenc|depends on|acceptance|risk|boundar|input|output|requirement|必须|不得|约束|依赖|验收|风险|边界|输入|输出|要求",
    )
    .unwrap()
});

/// Identifier recorded in artifact digests.
pub const COMPRESSION_ALGORITHM: &str = "extractive-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LineClass {
    Heading,
    Constraint,
    Bullet,
    Other,
}

fn classify(line: &str) -> LineClass {
    if HEADING_REGEX.is_match(line) {
        LineClass::Heading
    } else if BULLET_REGEX.is_match(line) {
        LineClass::Bullet
    } else if CONSTRAINT_REGEX.is_match(line) {
        LineClass::Constraint
    } else {
        LineClass::Other
    }
}

/// Limits applied by [`compress`].
#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub max_chars: usize,
    pub summary_max_chars: usize,
    pub key_points_max: usize,
    pub key_point_max_chars: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self::from(&ContextSection::default())
    }
}

impl From<&ContextSection> for CompressionSettings {
    fn from(section: &ContextSection) -> Self {
        Self {
            max_chars: section.dependency_max_chars,
            summary_max_chars: section.summary_max_chars,
            key_points_max: section.key_points_max,
            key_point_max_chars: section.key_point_max_chars,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compressed {
    pub summary: String,
    pub key_points: Vec<String>,
    pub compressed: String,
    pub source_chars: usize,
    pub compressed_chars: usize,
}

/// Compress `content` into a summary, key points and a bounded digest.
pub fn compress(content: &str, settings: &CompressionSettings) -> Compressed {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return Compressed::default();
    }

    let mut ranked: Vec<(LineClass, usize, &str)> = lines
        .iter()
        .enumerate()
        .map(|(idx, line)| (classify(line), idx, *line))
        .collect();
    ranked.sort();

    let mut seen = HashSet::new();
    let mut key_points = Vec::new();
    for (_, _, line) in ranked {
        if !seen.insert(line) {
            continue;
        }
        key_points.push(truncate_chars(line, settings.key_point_max_chars).to_string());
        if key_points.len() >= settings.key_points_max {
            break;
        }
    }

    let summary_cap = settings.max_chars.min(settings.summary_max_chars);
    let summary = truncate_chars(&key_points.join("\n"), summary_cap).to_string();

    let mut sections = Vec::new();
    if !summary.is_empty() {
        sections.push(format!("[Summary]\n{}", summary));
    }
    if !key_points.is_empty() {
        let bullets: Vec<String> = key_points.iter().map(|p| format!("- {}", p)).collect();
        sections.push(format!("[Key Points]\n{}", bullets.join("\n")));
    }
    let compressed = truncate_chars(&sections.join("\n\n"), settings.max_chars).to_string();

    Compressed {
        summary,
        key_points,
        compressed_chars: char_len(&compressed),
        compressed,
        source_chars: char_len(content),
    }
}
