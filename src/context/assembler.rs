//! Character-budgeted context assembly.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::compress::{CompressionSettings, compress};
use crate::catalog::ArtifactTypeDef;
use crate::stageforge_config::ContextSection;
use crate::store::{Artifact, Project};
use crate::template::{extract_placeholders, is_context_placeholder};
use crate::util::{char_len, content_hash, to_context_token, truncate_chars};

/// Compressed content of one resolved hard dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyInput {
    pub artifact_type: String,
    pub name: String,
    pub artifact_id: String,
    pub content: String,
    /// Hash of the dependency's full content
    pub content_hash: String,
    pub source_chars: usize,
    pub compressed_chars: usize,
}

/// Fingerprint of the dependency inputs a run was started with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    pub types: Vec<String>,
    pub source_chars: usize,
    pub compressed_chars: usize,
    pub hash: String,
}

/// Output of [`ContextAssembler::assemble`].
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Base and harvested values, keyed by context token
    pub values: BTreeMap<String, String>,
    pub required_keys: Vec<String>,
    pub dependencies: Vec<DependencyInput>,
    /// Declared prerequisites with no usable content upstream
    pub missing: Vec<String>,
    pub snapshot: DependencySnapshot,
}

impl AssembledContext {
    /// Characters across all context values.
    pub fn context_chars(&self) -> usize {
        self.values.values().map(|v| char_len(v)).sum()
    }

    /// Characters across values whose key is required.
    pub fn required_chars(&self) -> usize {
        self.required_keys
            .iter()
            .filter_map(|k| self.values.get(k))
            .map(|v| char_len(v))
            .sum()
    }
}

/// What the assembler needs to know about one generation.
pub struct AssemblyRequest<'a> {
    pub project_id: &'a str,
    pub stage_id: &'a str,
    pub artifact: &'a ArtifactTypeDef,
    pub templates: &'a [String],
    pub base: &'a HashMap<String, String>,
    pub project: Option<&'a Project>,
    /// Artifacts already produced earlier in the same request
    pub generated: &'a [Artifact],
}

pub struct ContextAssembler {
    settings: ContextSection,
}

impl ContextAssembler {
    pub fn new(settings: ContextSection) -> Self {
        Self { settings }
    }

    pub fn assemble(&self, request: &AssemblyRequest<'_>) -> AssembledContext {
        let required = required_keys(request.templates, &request.artifact.required_context);
        let values =
            self.budgeted_values(request.base, request.project, request.stage_id, &required);
        let (dependencies, missing) = self.resolve_dependencies(
            &request.artifact.depends_on,
            request.generated,
            request.project,
        );
        let snapshot = dependency_snapshot(
            request.project_id,
            request.stage_id,
            &request.artifact.id,
            &request.artifact.depends_on,
            &dependencies,
        );

        debug!(
            project_id = request.project_id,
            stage_id = request.stage_id,
            artifact_type = %request.artifact.id,
            required_keys = required.len(),
            value_count = values.len(),
            dependency_count = dependencies.len(),
            missing = missing.len(),
            "context assembled"
        );

        AssembledContext {
            values,
            required_keys: required.into_iter().collect(),
            dependencies,
            missing,
            snapshot,
        }
    }

    /// Base values plus values harvested from upstream stages.
    ///
    /// Only required keys count against the aggregate budget. Base values
    /// for required keys are charged first; harvested values are capped per
    /// value and then to whatever budget remains, and are dropped once it
    /// runs out.
    pub fn budgeted_values(
        &self,
        base: &HashMap<String, String>,
        project: Option<&Project>,
        stage_id: &str,
        required: &BTreeSet<String>,
    ) -> BTreeMap<String, String> {
        let value_cap = self.settings.value_max_chars;
        let total = self.settings.total_budget_chars;
        let mut used = 0usize;
        let mut values = BTreeMap::new();

        let mut base_entries: Vec<(String, &String)> = base
            .iter()
            .map(|(k, v)| (to_context_token(k), v))
            .filter(|(k, v)| !k.is_empty() && !v.trim().is_empty())
            .collect();
        base_entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, value) in base_entries {
            if values.contains_key(&key) {
                continue;
            }
            let capped = truncate_chars(value.trim(), value_cap);
            if required.contains(&key) {
                let remaining = total.saturating_sub(used);
                if remaining == 0 {
                    continue;
                }
                let fitted = truncate_chars(capped, remaining);
                used += char_len(fitted);
                values.insert(key, fitted.to_string());
            } else {
                values.insert(key, capped.to_string());
            }
        }

        let Some(project) = project else {
            return values;
        };
        let upstream = match project.stages.iter().position(|s| s.id == stage_id) {
            Some(idx) => &project.stages[..idx],
            None => &project.stages[..],
        };

        for stage in upstream {
            for artifact in stage.artifacts.iter().rev().filter(|a| a.has_content()) {
                let candidates = [
                    to_context_token(&artifact.artifact_type),
                    to_context_token(&artifact.name),
                    to_context_token(&format!("stage_{}", stage.id)),
                    to_context_token(&format!("stage_name_{}", stage.name)),
                ];
                for key in candidates {
                    if key.is_empty() || !required.contains(&key) || values.contains_key(&key) {
                        continue;
                    }
                    let remaining = total.saturating_sub(used);
                    if remaining == 0 {
                        continue;
                    }
                    let fitted =
                        truncate_chars(truncate_chars(&artifact.content, value_cap), remaining);
                    used += char_len(fitted);
                    values.insert(key, fitted.to_string());
                }
            }
        }

        values
    }

    /// Find the latest non-empty artifact for each declared prerequisite.
    ///
    /// Artifacts generated earlier in the request win; otherwise project
    /// stages are searched last stage first, newest artifact first.
    pub fn resolve_dependencies(
        &self,
        depends_on: &[String],
        generated: &[Artifact],
        project: Option<&Project>,
    ) -> (Vec<DependencyInput>, Vec<String>) {
        let mut inputs = Vec::new();
        let mut missing = Vec::new();

        for dep in depends_on {
            let from_request = generated
                .iter()
                .rev()
                .find(|a| &a.artifact_type == dep && a.has_content());
            let found = from_request.or_else(|| {
                project.and_then(|p| {
                    p.stages
                        .iter()
                        .rev()
                        .flat_map(|s| s.artifacts.iter().rev())
                        .find(|a| &a.artifact_type == dep && a.has_content())
                })
            });
            match found {
                Some(artifact) => inputs.push(self.dependency_input(artifact)),
                None => missing.push(dep.clone()),
            }
        }

        (inputs, missing)
    }

    fn dependency_input(&self, artifact: &Artifact) -> DependencyInput {
        let max_chars = self.settings.dependency_max_chars;
        let content = [&artifact.context_summary, &artifact.compressed_context]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                let compressed =
                    compress(&artifact.content, &CompressionSettings::from(&self.settings));
                if compressed.compressed.is_empty() {
                    truncate_chars(&artifact.content, max_chars).to_string()
                } else {
                    compressed.compressed
                }
            });

        DependencyInput {
            artifact_type: artifact.artifact_type.clone(),
            name: artifact.name.clone(),
            artifact_id: artifact.id.clone(),
            compressed_chars: char_len(&content),
            content,
            content_hash: content_hash(&artifact.content),
            source_chars: char_len(&artifact.content),
        }
    }
}

/// Context keys an artifact type needs: context-like template placeholders
/// plus the catalog's explicit keys, all normalized.
pub fn required_keys(templates: &[String], explicit: &[String]) -> BTreeSet<String> {
    templates
        .iter()
        .flat_map(|t| extract_placeholders(t))
        .filter(|name| is_context_placeholder(name))
        .chain(explicit.iter().cloned())
        .map(|name| to_context_token(&name))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Digest of the dependency inputs for a (project, stage, type) generation.
pub fn dependency_snapshot(
    project_id: &str,
    stage_id: &str,
    artifact_type: &str,
    declared: &[String],
    inputs: &[DependencyInput],
) -> DependencySnapshot {
    let mut material = format!("{}|{}|{}", project_id, stage_id, artifact_type);
    for input in inputs {
        material.push_str(&format!("|{}:{}", input.artifact_type, input.content_hash));
    }
    DependencySnapshot {
        types: declared.to_vec(),
        source_chars: inputs.iter().map(|i| i.source_chars).sum(),
        compressed_chars: inputs.iter().map(|i| i.compressed_chars).sum(),
        hash: content_hash(&material),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProjectStage;

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(ContextSection::default())
    }

    fn artifact(id: &str, ty: &str, name: &str, stage: &str, content: &str) -> Artifact {
        Artifact::new(id, ty, name, stage, content)
    }

    fn project() -> Project {
        let mut requirement = ProjectStage::new("requirement", "Requirement Analysis");
        requirement
            .artifacts
            .push(artifact("a1", "prd", "PRD", "requirement", "old prd"));
        requirement
            .artifacts
            .push(artifact("a2", "prd", "PRD", "requirement", "new prd"));
        let mut design = ProjectStage::new("design", "Design");
        design
            .artifacts
            .push(artifact("a3", "ui-design", "UI Design", "design", "screens"));
        let mut project = Project::new("p1", "Demo");
        project.stages = vec![requirement, design];
        project
    }

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_required_keys_from_templates_and_catalog() {
        let templates =
            vec!["Use {PRD} and {UI_DESIGN} at {URL} on {YYYY-MM-DD} {lower}".to_string()];
        let explicit = vec!["conversation".to_string()];
        assert_eq!(
            required_keys(&templates, &explicit),
            keys(&["CONVERSATION", "PRD", "UI_DESIGN"])
        );
    }

    #[test]
    fn test_harvest_uses_only_upstream_stages_newest_first() {
        let required = keys(&[
            "PRD",
            "UI_DESIGN",
            "STAGE_REQUIREMENT",
            "STAGE_NAME_REQUIREMENT_ANALYSIS",
        ]);
        let values =
            assembler().budgeted_values(&HashMap::new(), Some(&project()), "design", &required);

        assert_eq!(values.get("PRD").map(String::as_str), Some("new prd"));
        assert_eq!(values.get("STAGE_REQUIREMENT").map(String::as_str), Some("new prd"));
        assert_eq!(
            values.get("STAGE_NAME_REQUIREMENT_ANALYSIS").map(String::as_str),
            Some("new prd")
        );
        assert!(!values.contains_key("UI_DESIGN"));
    }

    #[test]
    fn test_unknown_stage_harvests_all_stages() {
        let required = keys(&["UI_DESIGN"]);
        let values =
            assembler().budgeted_values(&HashMap::new(), Some(&project()), "nowhere", &required);
        assert_eq!(values.get("UI_DESIGN").map(String::as_str), Some("screens"));
    }

    #[test]
    fn test_base_values_win_over_harvest() {
        let mut base = HashMap::new();
        base.insert("prd".to_string(), "caller prd".to_string());
        base.insert("EXTRA".to_string(), "kept".to_string());
        base.insert("EMPTY".to_string(), "   ".to_string());
        let values =
            assembler().budgeted_values(&base, Some(&project()), "design", &keys(&["PRD"]));
        assert_eq!(values.get("PRD").map(String::as_str), Some("caller prd"));
        assert_eq!(values.get("EXTRA").map(String::as_str), Some("kept"));
        assert!(!values.contains_key("EMPTY"));
    }

    #[test]
    fn test_aggregate_budget_is_never_exceeded() {
        let mut stage = ProjectStage::new("upstream", "Upstream");
        let mut required = BTreeSet::new();
        for i in 0..10 {
            let ty = format!("doc-{}", i);
            stage.artifacts.push(artifact(
                &format!("a{}", i),
                &ty,
                &format!("Doc {}", i),
                "upstream",
                &"x".repeat(7000),
            ));
            required.insert(to_context_token(&ty));
        }
        let mut project = Project::new("p1", "Demo");
        project.stages = vec![stage, ProjectStage::new("current", "Current")];

        let settings = ContextSection::default();
        let values = ContextAssembler::new(settings.clone()).budgeted_values(
            &HashMap::new(),
            Some(&project),
            "current",
            &required,
        );
        let total: usize = values.values().map(|v| v.chars().count()).sum();
        assert_eq!(total, settings.total_budget_chars);
        assert!(values.values().all(|v| v.chars().count() <= settings.value_max_chars));
    }

    #[test]
    fn test_per_value_cap_applies_to_harvest() {
        let mut stage = ProjectStage::new("upstream", "Upstream");
        stage
            .artifacts
            .push(artifact("a1", "prd", "PRD", "upstream", &"y".repeat(9000)));
        let mut project = Project::new("p1", "Demo");
        project.stages = vec![stage];
        let values =
            assembler().budgeted_values(&HashMap::new(), Some(&project), "later", &keys(&["PRD"]));
        assert_eq!(values["PRD"].chars().count(), 8000);
    }

    #[test]
    fn test_dependency_resolution_prefers_request_artifacts() {
        let generated = vec![artifact("g1", "prd", "PRD", "requirement", "# Fresh PRD")];
        let (inputs, missing) = assembler().resolve_dependencies(
            &["prd".to_string(), "tech-stack".to_string()],
            &generated,
            Some(&project()),
        );
        assert_eq!(missing, vec!["tech-stack"]);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].artifact_id, "g1");
        assert!(inputs[0].content.starts_with("[Summary]\n# Fresh PRD"));
        assert_eq!(inputs[0].source_chars, "# Fresh PRD".len());
    }

    #[test]
    fn test_dependency_uses_stored_summary_first() {
        let mut stored = artifact("s1", "prd", "PRD", "requirement", "full body");
        stored.compressed_context = "compressed".into();
        stored.context_summary = "summary".into();
        let mut stage = ProjectStage::new("requirement", "Requirement");
        stage.artifacts.push(stored);
        let mut project = Project::new("p1", "Demo");
        project.stages = vec![stage];

        let (inputs, missing) =
            assembler().resolve_dependencies(&["prd".to_string()], &[], Some(&project));
        assert!(missing.is_empty());
        assert_eq!(inputs[0].content, "summary");
        assert_eq!(inputs[0].compressed_chars, 7);
        assert_eq!(inputs[0].source_chars, 9);
    }

    #[test]
    fn test_blank_artifacts_count_as_missing() {
        let mut stage = ProjectStage::new("requirement", "Requirement");
        stage.artifacts.push(artifact("s1", "prd", "PRD", "requirement", "  \n "));
        let mut project = Project::new("p1", "Demo");
        project.stages = vec![stage];
        let (inputs, missing) =
            assembler().resolve_dependencies(&["prd".to_string()], &[], Some(&project));
        assert!(inputs.is_empty());
        assert_eq!(missing, vec!["prd"]);

        let (_, missing) = assembler().resolve_dependencies(&["prd".to_string()], &[], None);
        assert_eq!(missing, vec!["prd"]);
    }

    #[test]
    fn test_snapshot_hash_tracks_dependency_content() {
        let generated_a = vec![artifact("g1", "prd", "PRD", "requirement", "version a")];
        let generated_b = vec![artifact("g1", "prd", "PRD", "requirement", "version b")];
        let deps = vec!["prd".to_string()];
        let (inputs_a, _) = assembler().resolve_dependencies(&deps, &generated_a, None);
        let (inputs_b, _) = assembler().resolve_dependencies(&deps, &generated_b, None);

        let a = dependency_snapshot("p1", "strategy", "strategy-doc", &deps, &inputs_a);
        let a_again = dependency_snapshot("p1", "strategy", "strategy-doc", &deps, &inputs_a);
        let b = dependency_snapshot("p1", "strategy", "strategy-doc", &deps, &inputs_b);
        assert_eq!(a, a_again);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.types, deps);
        assert_eq!(a.source_chars, 9);
    }

    #[test]
    fn test_assemble_end_to_end() {
        let def: ArtifactTypeDef = toml::from_str(
            r#"
name = "Strategy"
depends_on = ["prd"]
required_context = ["CONVERSATION"]
"#,
        )
        .unwrap();
        let def = ArtifactTypeDef {
            id: "strategy-doc".into(),
            ..def
        };
        let templates = vec!["Plan from {PRD}".to_string()];
        let mut base = HashMap::new();
        base.insert("CONVERSATION".to_string(), "we chatted".to_string());
        let project = project();

        let ctx = assembler().assemble(&AssemblyRequest {
            project_id: "p1",
            stage_id: "strategy",
            artifact: &def,
            templates: &templates,
            base: &base,
            project: Some(&project),
            generated: &[],
        });

        assert_eq!(ctx.required_keys, vec!["CONVERSATION", "PRD"]);
        assert_eq!(ctx.values["PRD"], "new prd");
        assert!(ctx.missing.is_empty());
        assert_eq!(ctx.dependencies[0].artifact_id, "a2");
        assert_eq!(ctx.required_chars(), "we chatted".len() + "new prd".len());
        assert_eq!(ctx.context_chars(), ctx.required_chars());
        assert_eq!(ctx.snapshot.types, vec!["prd"]);
    }
}
