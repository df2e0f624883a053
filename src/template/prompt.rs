//! Final prompt assembly for one artifact type.

use std::collections::BTreeMap;

use super::render;
use crate::context::DependencyInput;
use crate::util::{to_context_token, truncate_chars};

const CONVERSATION_KEY: &str = "CONVERSATION";

const DEFAULT_ALIGNMENT: &[&str] = &[
    "The output must explicitly align with the dependency inputs",
    "Where dependency inputs conflict, state the resolution principle before the final result",
];

/// Everything `build_prompt` needs.
pub struct PromptInputs<'a> {
    pub templates: &'a [String],
    pub values: &'a BTreeMap<String, String>,
    pub dependencies: &'a [DependencyInput],
    /// Type-specific alignment rules; defaults apply when empty
    pub alignment: &'a [String],
    pub conversation_max_chars: usize,
    pub dependency_max_chars: usize,
}

/// Render the templates and append the conversation and dependency sections.
pub fn build_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut values = inputs.values.clone();
    for dep in inputs.dependencies {
        values
            .entry(to_context_token(&dep.artifact_type))
            .or_insert_with(|| dep.content.clone());
    }

    let mut prompt = inputs
        .templates
        .iter()
        .map(|t| render(t, &values))
        .collect::<Vec<_>>()
        .join("\n\n");

    if let Some(conversation) = inputs
        .values
        .get(CONVERSATION_KEY)
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
    {
        prompt.push_str(&format!(
            "\n\n## Conversation context (must be referenced)\n{}\n\n\
             ## Alignment requirements\n\
             - Keep goals, constraints and key terms consistent with the conversation\n\
             - Mark any information the conversation lacks but the deliverable needs as [Assumption]",
            truncate_chars(conversation, inputs.conversation_max_chars)
        ));
    }

    if !inputs.dependencies.is_empty() {
        let sections: Vec<String> = inputs
            .dependencies
            .iter()
            .map(|dep| {
                format!(
                    "[{} | {}]\n{}",
                    dep.name,
                    dep.artifact_type,
                    truncate_chars(&dep.content, inputs.dependency_max_chars)
                )
            })
            .collect();
        let rules: Vec<String> = if inputs.alignment.is_empty() {
            DEFAULT_ALIGNMENT.iter().map(|r| format!("- {}", r)).collect()
        } else {
            inputs.alignment.iter().map(|r| format!("- {}", r)).collect()
        };
        prompt.push_str(&format!(
            "\n\n## Dependency inputs (the basis for this deliverable)\n\n{}\n\n## Hard constraints\n{}",
            sections.join("\n\n"),
            rules.join("\n")
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(artifact_type: &str, name: &str, content: &str) -> DependencyInput {
        DependencyInput {
            artifact_type: artifact_type.into(),
            name: name.into(),
            artifact_id: format!("artifact-{}", artifact_type),
            content: content.into(),
            content_hash: "h".into(),
            source_chars: content.len(),
            compressed_chars: content.len(),
        }
    }

    #[test]
    fn test_templates_joined_and_rendered() {
        let templates = vec!["Write for {AUDIENCE}.".to_string(), "Cite {UI_DESIGN}.".to_string()];
        let mut values = BTreeMap::new();
        values.insert("AUDIENCE".to_string(), "admins".to_string());
        let deps = vec![dep("ui-design", "UI Design", "screens")];
        let prompt = build_prompt(&PromptInputs {
            templates: &templates,
            values: &values,
            dependencies: &deps,
            alignment: &[],
            conversation_max_chars: 6000,
            dependency_max_chars: 8000,
        });

        assert!(prompt.starts_with("Write for admins.\n\nCite screens."));
        assert!(prompt.contains("[UI Design | ui-design]\nscreens"));
        assert!(prompt.contains("- The output must explicitly align"));
        assert!(!prompt.contains("Conversation context"));
    }

    #[test]
    fn test_conversation_section_is_capped() {
        let templates = vec!["Base".to_string()];
        let mut values = BTreeMap::new();
        values.insert(CONVERSATION_KEY.to_string(), "c".repeat(50));
        let prompt = build_prompt(&PromptInputs {
            templates: &templates,
            values: &values,
            dependencies: &[],
            alignment: &[],
            conversation_max_chars: 10,
            dependency_max_chars: 8000,
        });
        assert!(prompt.contains(&format!("(must be referenced)\n{}\n", "c".repeat(10))));
        assert!(!prompt.contains(&"c".repeat(11)));
        assert!(!prompt.contains("Dependency inputs"));
    }

    #[test]
    fn test_custom_alignment_and_value_precedence() {
        let templates = vec!["{PRD}".to_string()];
        let mut values = BTreeMap::new();
        values.insert("PRD".to_string(), "caller prd".to_string());
        let deps = vec![dep("prd", "PRD", "stored prd")];
        let alignment = vec!["Trace every flow to the PRD".to_string()];
        let prompt = build_prompt(&PromptInputs {
            templates: &templates,
            values: &values,
            dependencies: &deps,
            alignment: &alignment,
            conversation_max_chars: 6000,
            dependency_max_chars: 4,
        });
        assert!(prompt.starts_with("caller prd"));
        assert!(prompt.contains("[PRD | prd]\nstor\n"));
        assert!(prompt.ends_with("## Hard constraints\n- Trace every flow to the PRD"));
    }
}
