//! Chunked generation loop.
//!
//! Calls the generator repeatedly, merging each round into a single
//! assembly, until the output signals completion or the round budget runs
//! out. A loop can resume from content persisted by an earlier attempt.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::kind::ArtifactKind;
use super::merge::OverlapMerger;
use crate::errors::GenerationError;
use crate::llm::{GenerateOptions, TextGenerator};
use crate::util::{char_len, strip_code_fence, tail_chars};

const FIRST_ROUND_TEMPERATURE: f32 = 0.6;
const CONTINUATION_TEMPERATURE: f32 = 0.4;
const REPAIR_TEMPERATURE: f32 = 0.3;

/// One round's output, reported before the next round starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    pub round: u32,
    pub piece: String,
    pub finish_reason: Option<String>,
    pub total_rounds: u32,
}

/// Receives every non-empty round so progress survives a crash mid-loop.
#[async_trait]
pub trait ChunkObserver: Send + Sync {
    async fn on_chunk(&self, report: &ChunkReport);
}

/// Content and round count carried over from an interrupted attempt.
#[derive(Debug, Clone, Default)]
pub struct ResumePoint {
    pub content: String,
    pub completed_rounds: u32,
}

/// Inputs for a single artifact.
#[derive(Debug, Clone)]
pub struct LoopRequest {
    pub prompt: String,
    pub artifact_type: String,
    pub kind: ArtifactKind,
    pub max_rounds: u32,
    pub chunk_max_tokens: u32,
    pub resume: ResumePoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub content: String,
    pub tokens: u64,
    pub rounds: u32,
    pub finish_reasons: Vec<Option<String>>,
    pub is_complete: bool,
    pub repaired: bool,
}

/// Settings shared by every loop run.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub structured_end_marker: String,
    pub continuation_tail_chars: usize,
    pub repair_max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            structured_end_marker: "<<END_OF_DOCUMENT>>".to_string(),
            continuation_tail_chars: 5000,
            repair_max_tokens: 8000,
            timeout: Duration::from_secs(180),
        }
    }
}

pub struct GenerationLoop {
    generator: Arc<dyn TextGenerator>,
    merger: Arc<dyn OverlapMerger>,
    settings: LoopSettings,
}

impl GenerationLoop {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        merger: Arc<dyn OverlapMerger>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            generator,
            merger,
            settings,
        }
    }

    /// Drive rounds `completed_rounds + 1 ..= max_rounds`.
    ///
    /// Running out of rounds is not an error: the outcome carries
    /// `is_complete = false`. Only a failed generator call aborts.
    pub async fn run(
        &self,
        request: &LoopRequest,
        observer: Option<&dyn ChunkObserver>,
    ) -> Result<LoopOutcome, GenerationError> {
        let kind = request.kind;
        let end_marker = kind.end_marker(
            &request.artifact_type,
            &self.settings.structured_end_marker,
        );
        let structural = kind.structural_detector();
        let max_rounds = request.max_rounds.max(1);

        let mut assembled = request.resume.content.clone();
        let mut tokens: u64 = 0;
        let mut finish_reasons = Vec::new();
        let start_round = request.resume.completed_rounds + 1;

        let mut next_prompt = if assembled.is_empty() {
            format!("{}\n\n{}", request.prompt, kind.round_instruction(&end_marker))
        } else {
            self.continuation_prompt(&assembled, &end_marker)
        };

        if start_round > 1 {
            info!(
                artifact_type = %request.artifact_type,
                start_round,
                resume_chars = char_len(&assembled),
                "resuming chunked generation"
            );
        }

        let mut completed = false;
        let mut last_round = request.resume.completed_rounds;
        for round in start_round..=max_rounds {
            let options = GenerateOptions {
                max_output_tokens: request.chunk_max_tokens,
                temperature: if round == 1 {
                    FIRST_ROUND_TEMPERATURE
                } else {
                    CONTINUATION_TEMPERATURE
                },
                timeout: self.settings.timeout,
                json_mode: false,
            };
            let generation = self.generator.generate(&next_prompt, &options).await?;
            let piece = strip_code_fence(&generation.content);
            assembled = self.merger.merge(&assembled, &piece);
            tokens += generation.total_tokens;
            finish_reasons.push(generation.finish_reason.clone());
            last_round = round;

            debug!(
                artifact_type = %request.artifact_type,
                round,
                piece_chars = char_len(&piece),
                assembled_chars = char_len(&assembled),
                finish_reason = ?generation.finish_reason,
                "generation round finished"
            );

            if let Some(observer) = observer
                && !piece.is_empty()
            {
                observer
                    .on_chunk(&ChunkReport {
                        round,
                        piece: piece.clone(),
                        finish_reason: generation.finish_reason.clone(),
                        total_rounds: max_rounds,
                    })
                    .await;
            }

            let normalized = assembled.replace(&end_marker, "").trim().to_string();
            if assembled.contains(&end_marker)
                || structural.is_some_and(|detector| detector.is_complete(&normalized))
            {
                assembled = normalized;
                completed = true;
                break;
            }

            next_prompt = self.continuation_prompt(&assembled, &end_marker);
        }

        let mut content = if completed {
            assembled
        } else {
            let normalized = assembled.replace(&end_marker, "").trim().to_string();
            if start_round > max_rounds {
                completed = structural.is_some_and(|detector| detector.is_complete(&normalized));
            } else {
                warn!(
                    artifact_type = %request.artifact_type,
                    max_rounds,
                    content_chars = char_len(&normalized),
                    "round budget exhausted without completion signal"
                );
                last_round = max_rounds;
            }
            normalized
        };

        let mut repaired = false;
        if let Some(detector) = structural
            && !content.is_empty()
            && !detector.is_complete(&content)
            && let Some(repair_prompt) = kind.repair_prompt(&content)
        {
            warn!(
                artifact_type = %request.artifact_type,
                detector = detector.name(),
                content_chars = char_len(&content),
                "structured output looks truncated, attempting repair"
            );
            let options = GenerateOptions {
                max_output_tokens: self.settings.repair_max_tokens,
                temperature: REPAIR_TEMPERATURE,
                timeout: self.settings.timeout,
                json_mode: false,
            };
            match self.generator.generate(&repair_prompt, &options).await {
                Ok(generation) => {
                    tokens += generation.total_tokens;
                    let fixed = strip_code_fence(&generation.content)
                        .replace(&end_marker, "")
                        .trim()
                        .to_string();
                    if !fixed.is_empty() {
                        info!(
                            artifact_type = %request.artifact_type,
                            source_chars = char_len(&content),
                            repaired_chars = char_len(&fixed),
                            "structured output repaired"
                        );
                        content = fixed;
                        repaired = true;
                    }
                }
                Err(e) => {
                    warn!(
                        artifact_type = %request.artifact_type,
                        error = %e,
                        "repair call failed, keeping unrepaired content"
                    );
                }
            }
        }

        Ok(LoopOutcome {
            content,
            tokens,
            rounds: last_round,
            finish_reasons,
            is_complete: completed,
            repaired,
        })
    }

    fn continuation_prompt(&self, assembled: &str, end_marker: &str) -> String {
        format!(
            "Continue the same deliverable from where it stopped. Do not repeat anything already written.\n\
             The end of the content written so far:\n{}\n\n\
             Output only the new content that follows; append {} when finished.",
            tail_chars(assembled, self.settings.continuation_tail_chars),
            end_marker
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::merge::SuffixPrefixMerger;
    use crate::llm::Generation;
    use crate::llm::testing::ScriptedGenerator;
    use std::sync::Mutex;

    struct RecordingObserver {
        reports: Mutex<Vec<ChunkReport>>,
    }

    impl RecordingObserver {
        fn new() -> Self {
            Self {
                reports: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChunkObserver for RecordingObserver {
        async fn on_chunk(&self, report: &ChunkReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn looper(generator: Arc<ScriptedGenerator>) -> GenerationLoop {
        GenerationLoop::new(
            generator,
            Arc::new(SuffixPrefixMerger::default()),
            LoopSettings::default(),
        )
    }

    fn request(kind: ArtifactKind, max_rounds: u32) -> LoopRequest {
        LoopRequest {
            prompt: "Write the PRD".to_string(),
            artifact_type: "prd".to_string(),
            kind,
            max_rounds,
            chunk_max_tokens: 1000,
            resume: ResumePoint::default(),
        }
    }

    #[tokio::test]
    async fn test_single_round_with_marker_completes() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&["# PRD\nbody\n<<END_OF_PRD>>"]));
        let outcome = looper(generator.clone())
            .run(&request(ArtifactKind::Document, 3), None)
            .await
            .unwrap();

        assert!(outcome.is_complete);
        assert_eq!(outcome.content, "# PRD\nbody");
        assert_eq!(outcome.rounds, 1);
        assert_eq!(generator.call_count(), 1);

        let calls = generator.calls();
        assert!(calls[0].0.starts_with("Write the PRD\n\n"));
        assert!(calls[0].0.contains("<<END_OF_PRD>>"));
        assert_eq!(calls[0].1.temperature, FIRST_ROUND_TEMPERATURE);
        assert_eq!(calls[0].1.max_output_tokens, 1000);
    }

    #[tokio::test]
    async fn test_exhaustion_is_soft() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&["partial draft"]));
        let outcome = looper(generator)
            .run(&request(ArtifactKind::Document, 1), None)
            .await
            .unwrap();

        assert!(!outcome.is_complete);
        assert_eq!(outcome.content, "partial draft");
        assert_eq!(outcome.rounds, 1);
        assert!(!outcome.repaired);
    }

    #[tokio::test]
    async fn test_multi_round_merges_overlap_and_reports_chunks() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&[
            "```markdown\n# PRD\nSection one\n```",
            "Section one\nSection two\n<<END_OF_PRD>>",
        ]));
        let observer = RecordingObserver::new();
        let outcome = looper(generator.clone())
            .run(&request(ArtifactKind::Document, 4), Some(&observer))
            .await
            .unwrap();

        assert!(outcome.is_complete);
        assert_eq!(outcome.content, "# PRD\nSection one\nSection two");
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.tokens, 20);

        let reports = observer.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].round, 1);
        assert_eq!(reports[0].piece, "# PRD\nSection one");
        assert_eq!(reports[1].total_rounds, 4);

        let calls = generator.calls();
        assert!(calls[1].0.contains("Do not repeat"));
        assert!(calls[1].0.contains("# PRD\nSection one"));
        assert_eq!(calls[1].1.temperature, CONTINUATION_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_resume_continues_after_completed_rounds() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&[
            "part C\npart D\n<<END_OF_PRD>>",
        ]));
        let mut req = request(ArtifactKind::Document, 4);
        req.resume = ResumePoint {
            content: "intro\npart C".to_string(),
            completed_rounds: 2,
        };
        let observer = RecordingObserver::new();
        let outcome = looper(generator.clone())
            .run(&req, Some(&observer))
            .await
            .unwrap();

        let merger = SuffixPrefixMerger::default();
        let expected = merger
            .merge("intro\npart C", "part C\npart D\n<<END_OF_PRD>>")
            .replace("<<END_OF_PRD>>", "")
            .trim()
            .to_string();
        assert!(outcome.is_complete);
        assert_eq!(outcome.content, expected);
        assert_eq!(outcome.content, "intro\npart C\npart D");
        assert_eq!(outcome.rounds, 3);
        assert_eq!(observer.reports.lock().unwrap()[0].round, 3);

        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].0.contains("Write the PRD"));
        assert!(calls[0].0.contains("intro\npart C"));
        assert_eq!(calls[0].1.temperature, CONTINUATION_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_continuation_prompt_uses_bounded_tail() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&["x<<END_OF_PRD>>"]));
        let mut req = request(ArtifactKind::Document, 2);
        req.resume = ResumePoint {
            content: format!("{}{}", "a".repeat(100), "b".repeat(5000)),
            completed_rounds: 1,
        };
        looper(generator.clone()).run(&req, None).await.unwrap();
        let prompt = &generator.calls()[0].0;
        assert!(prompt.contains(&"b".repeat(5000)));
        assert!(!prompt.contains("aa"));
    }

    #[tokio::test]
    async fn test_html_structure_counts_as_completion() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&[
            "<!doctype html><html><body><p>ok</p></body></html>",
        ]));
        let outcome = looper(generator.clone())
            .run(&request(ArtifactKind::HtmlDocument, 3), None)
            .await
            .unwrap();
        assert!(outcome.is_complete);
        assert!(!outcome.repaired);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_truncated_html_gets_one_repair_pass() {
        let generator = Arc::new(ScriptedGenerator::with_texts(&[
            "<html><body><p>cut",
            "```html\n<html><body><p>fixed</p></body></html>\n```",
        ]));
        let outcome = looper(generator.clone())
            .run(&request(ArtifactKind::HtmlDocument, 1), None)
            .await
            .unwrap();
        assert!(!outcome.is_complete);
        assert!(outcome.repaired);
        assert_eq!(outcome.content, "<html><body><p>fixed</p></body></html>");
        assert_eq!(generator.call_count(), 2);
        assert!(generator.calls()[1].0.contains("<html><body><p>cut"));
    }

    #[tokio::test]
    async fn test_repair_failure_keeps_original_content() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_text("{\"a\": [1, 2");
        generator.push(Err(GenerationError::Transport("reset".into())));
        let outcome = looper(generator)
            .run(&request(ArtifactKind::JsonPayload, 1), None)
            .await
            .unwrap();
        assert!(!outcome.repaired);
        assert_eq!(outcome.content, "{\"a\": [1, 2");
    }

    #[tokio::test]
    async fn test_generator_failure_propagates() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(Err(GenerationError::Timeout { seconds: 5 }));
        let result = looper(generator)
            .run(&request(ArtifactKind::Document, 2), None)
            .await;
        assert!(matches!(result, Err(GenerationError::Timeout { seconds: 5 })));
    }

    #[tokio::test]
    async fn test_empty_piece_is_not_reported() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(Ok(Generation {
            content: "   ".into(),
            finish_reason: Some("length".into()),
            total_tokens: 1,
        }));
        generator.push_text("done <<END_OF_PRD>>");
        let observer = RecordingObserver::new();
        let outcome = looper(generator)
            .run(&request(ArtifactKind::Document, 3), Some(&observer))
            .await
            .unwrap();
        assert_eq!(outcome.content, "done");
        assert_eq!(outcome.finish_reasons.len(), 2);
        let reports = observer.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].round, 2);
    }
}
