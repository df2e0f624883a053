//! Stage engine: generates the selected artifact types of one stage.
//!
//! For each type, in dependency order: assemble context, record the run,
//! drive the chunked loop with every round persisted to the ledger, run the
//! critique gate, then finalize the artifact into its target stage. Ledger
//! writes are bookkeeping and never fail a request; the artifact write does.

pub mod inflight;

pub use inflight::{FlightGuard, InFlightRegistry};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::catalog::{ArtifactTypeDef, Catalog};
use crate::context::{AssemblyRequest, CompressionSettings, ContextAssembler};
use crate::critique::{CritiqueGate, CritiqueSettings, CritiqueTrace};
use crate::errors::EngineError;
use crate::finalize::ArtifactFinalizer;
use crate::generation::{
    ChunkObserver, ChunkReport, GenerationLoop, LoopRequest, LoopSettings, OverlapMerger,
    ResumePoint, SuffixPrefixMerger,
};
use crate::ledger::{
    AssembledSnapshot, ChunkSession, ContextDigest, LedgerDb, LedgerHandle, ModelRequestMeta,
    NewRun, RunError, RunErrorCode, RunResult, RunStatus, SessionStatus, new_run_id,
};
use crate::llm::TextGenerator;
use crate::resolver::resolve_order;
use crate::stageforge_config::StageforgeToml;
use crate::store::{Artifact, GenerationMeta, Project, ProjectStore};
use crate::template::{PromptInputs, TemplateProvider, build_prompt};
use crate::util::{char_len, content_hash, random_suffix};

/// One stage generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub project_id: String,
    pub stage_id: String,
    /// Selected artifact types, in any order
    pub artifact_types: Vec<String>,
    /// Base context values (conversation, user inputs, ...)
    pub context: HashMap<String, String>,
    /// Run id to resume, keyed by artifact type
    pub resume: HashMap<String, String>,
}

/// Progress callbacks for interactive front-ends.
pub trait ProgressListener: Send + Sync {
    fn artifact_started(&self, _artifact_type: &str, _position: usize, _total: usize) {}
    fn round_finished(&self, _artifact_type: &str, _report: &ChunkReport) {}
    fn artifact_finished(&self, _artifact: &Artifact) {}
}

pub struct StageEngine {
    catalog: Arc<Catalog>,
    config: StageforgeToml,
    generator: Arc<dyn TextGenerator>,
    merger: Arc<dyn OverlapMerger>,
    templates: Arc<dyn TemplateProvider>,
    store: Arc<dyn ProjectStore>,
    ledger: LedgerHandle,
    in_flight: InFlightRegistry,
    assembler: ContextAssembler,
    finalizer: ArtifactFinalizer,
    critique: CritiqueGate,
    progress: Option<Arc<dyn ProgressListener>>,
}

impl StageEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        config: StageforgeToml,
        generator: Arc<dyn TextGenerator>,
        templates: Arc<dyn TemplateProvider>,
        store: Arc<dyn ProjectStore>,
        ledger: LedgerHandle,
    ) -> Self {
        let generation = &config.generation;
        let merger: Arc<dyn OverlapMerger> = Arc::new(SuffixPrefixMerger::new(
            generation.merge_window_chars,
            generation.merge_min_overlap,
        ));
        let critique = CritiqueGate::new(
            generator.clone(),
            CritiqueSettings {
                critique_max_tokens: generation.critique_max_tokens,
                revise_max_tokens: generation.revise_max_tokens,
                timeout: Duration::from_secs(config.llm.timeout_secs),
            },
        );
        let assembler = ContextAssembler::new(config.context.clone());
        let finalizer =
            ArtifactFinalizer::new(store.clone(), CompressionSettings::from(&config.context));

        Self {
            catalog,
            config,
            generator,
            merger,
            templates,
            store,
            ledger,
            in_flight: InFlightRegistry::new(),
            assembler,
            finalizer,
            critique,
            progress: None,
        }
    }

    pub fn with_merger(mut self, merger: Arc<dyn OverlapMerger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Share a single-flight registry with other engines in this process.
    pub fn with_in_flight(mut self, in_flight: InFlightRegistry) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    /// Generate the selected artifact types of one stage, in dependency
    /// order. Returns the artifacts produced by this request.
    pub async fn generate_stage(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<Artifact>, EngineError> {
        let mut project = self
            .store
            .load_project(&request.project_id)
            .await
            .with_context(|| format!("Failed to load project {}", request.project_id))?;

        self.recover_stale_runs(&request.project_id, &request.stage_id)
            .await;

        let selected = self.effective_types(request, project.as_ref())?;
        let ordered = resolve_order(&selected, self.catalog.as_ref());
        info!(
            project_id = %request.project_id,
            stage_id = %request.stage_id,
            artifact_types = ?ordered,
            "stage generation started"
        );

        let delay = Duration::from_millis(self.config.generation.inter_artifact_delay_ms);
        let mut generated: Vec<Artifact> = Vec::with_capacity(ordered.len());
        for (position, artifact_type) in ordered.iter().enumerate() {
            if position > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let def = self
                .catalog
                .artifact(artifact_type)
                .cloned()
                .unwrap_or_else(|| ArtifactTypeDef::ad_hoc(artifact_type));
            if let Some(progress) = &self.progress {
                progress.artifact_started(artifact_type, position, ordered.len());
            }

            let artifact = self
                .generate_artifact(request, &def, project.as_ref(), &generated)
                .await?;

            if let Some(progress) = &self.progress {
                progress.artifact_finished(&artifact);
            }
            generated.push(artifact);

            if position + 1 < ordered.len() {
                match self.store.load_project(&request.project_id).await {
                    Ok(Some(reloaded)) => project = Some(reloaded),
                    Ok(None) => {}
                    Err(e) => warn!(
                        project_id = %request.project_id,
                        error = %e,
                        "project reload failed, harvesting from previous snapshot"
                    ),
                }
            }
        }

        info!(
            project_id = %request.project_id,
            stage_id = %request.stage_id,
            generated = generated.len(),
            "stage generation finished"
        );
        Ok(generated)
    }

    /// Selected types that the stage actually produces, deduplicated.
    fn effective_types(
        &self,
        request: &GenerationRequest,
        project: Option<&Project>,
    ) -> Result<Vec<String>, EngineError> {
        let catalog_stage = self.catalog.stage(&request.stage_id);
        let project_stage = project.and_then(|p| p.stage(&request.stage_id));
        if catalog_stage.is_none() && project_stage.is_none() {
            return Err(EngineError::UnknownStage {
                project: request.project_id.clone(),
                stage: request.stage_id.clone(),
            });
        }

        if request.artifact_types.iter().all(|t| t.trim().is_empty()) {
            return Err(EngineError::NoArtifactTypes {
                stage: request.stage_id.clone(),
            });
        }

        let outputs: &[String] = match project_stage {
            Some(stage) if !stage.outputs.is_empty() => &stage.outputs,
            _ => catalog_stage
                .map(|s| s.outputs.as_slice())
                .unwrap_or_default(),
        };

        let mut effective: Vec<String> = Vec::new();
        for artifact_type in request.artifact_types.iter().map(|t| t.trim()) {
            if outputs.iter().any(|o| o == artifact_type)
                && !effective.iter().any(|e| e == artifact_type)
            {
                effective.push(artifact_type.to_string());
            }
        }

        if effective.is_empty() {
            return Err(EngineError::NoEffectiveArtifactTypes {
                stage: request.stage_id.clone(),
                selected: request.artifact_types.clone(),
            });
        }
        Ok(effective)
    }

    async fn generate_artifact(
        &self,
        request: &GenerationRequest,
        def: &ArtifactTypeDef,
        project: Option<&Project>,
        generated: &[Artifact],
    ) -> Result<Artifact, EngineError> {
        let project_id = request.project_id.as_str();
        let stage_id = request.stage_id.as_str();
        let artifact_type = def.id.as_str();

        let _flight = self
            .in_flight
            .try_acquire(project_id, stage_id, artifact_type)
            .ok_or_else(|| EngineError::AlreadyInFlight {
                project: project_id.to_string(),
                stage: stage_id.to_string(),
                artifact_type: artifact_type.to_string(),
            })?;

        let templates =
            self.templates
                .templates(def)
                .map_err(|source| EngineError::TemplateUnavailable {
                    stage: stage_id.to_string(),
                    artifact_type: artifact_type.to_string(),
                    source,
                })?;

        let assembled = self.assembler.assemble(&AssemblyRequest {
            project_id,
            stage_id,
            artifact: def,
            templates: &templates,
            base: &request.context,
            project,
            generated,
        });
        let settings = self.config.generation_settings(artifact_type, &def.generation);

        let (run_id, pinned_session) = self.choose_run(request, artifact_type).await;

        let new_run = NewRun {
            run_id: run_id.clone(),
            project_id: project_id.to_string(),
            stage_id: stage_id.to_string(),
            artifact_type: artifact_type.to_string(),
            dependency_snapshot: assembled.snapshot.clone(),
        };
        self.bookkeep(&run_id, "create_run", move |db| db.create_run(&new_run))
            .await;
        let session = {
            let (id, project, stage, ty) = (
                run_id.clone(),
                project_id.to_string(),
                stage_id.to_string(),
                artifact_type.to_string(),
            );
            let max_rounds = settings.max_rounds;
            self.bookkeep(&run_id, "ensure_session", move |db| {
                db.ensure_session(&id, &project, &stage, &ty, max_rounds)
            })
            .await
            .or(pinned_session)
        };

        if !assembled.missing.is_empty() {
            warn!(
                project_id,
                stage_id,
                artifact_type,
                run_id = %run_id,
                missing = ?assembled.missing,
                "dependency inputs missing, run blocked"
            );
            let error = RunError::dependency_missing(
                format!(
                    "Missing dependency inputs: {}",
                    assembled.missing.join(", ")
                ),
                assembled.missing.clone(),
            );
            self.close_with_error(&run_id, RunStatus::Blocked, SessionStatus::Blocked, error)
                .await;
            return Err(EngineError::DependencyMissing {
                stage: stage_id.to_string(),
                artifact_type: artifact_type.to_string(),
                missing: assembled.missing,
            });
        }

        let prompt = build_prompt(&PromptInputs {
            templates: &templates,
            values: &assembled.values,
            dependencies: &assembled.dependencies,
            alignment: &def.alignment,
            conversation_max_chars: self.config.context.conversation_max_chars,
            dependency_max_chars: self.config.context.dependency_max_chars,
        });

        let digest = ContextDigest {
            context_chars: assembled.context_chars(),
            key_count: assembled.values.len(),
            required_keys: assembled.required_keys.clone(),
            dependency_snapshot_hash: assembled.snapshot.hash.clone(),
        };
        let model_request = ModelRequestMeta {
            model: self.generator.model().to_string(),
            chunk_max_tokens: settings.chunk_max_tokens,
            max_rounds: settings.max_rounds,
            critique_enabled: settings.critique,
        };
        {
            let id = run_id.clone();
            self.bookkeep(&run_id, "mark_run_running", move |db| {
                db.mark_run_running(&id, &digest, &model_request)
            })
            .await;
        }
        self.set_session_status(&run_id, SessionStatus::Running, None)
            .await;

        let resume = session
            .filter(|s| !s.chunks.is_empty())
            .map(|s| ResumePoint {
                content: s.assembled_content(self.merger.as_ref()),
                completed_rounds: s.completed_rounds,
            })
            .unwrap_or_default();

        info!(
            project_id,
            stage_id,
            artifact_type,
            run_id = %run_id,
            max_rounds = settings.max_rounds,
            resume_rounds = resume.completed_rounds,
            prompt_chars = char_len(&prompt),
            "artifact generation started"
        );

        let observer = LedgerObserver {
            ledger: self.ledger.clone(),
            run_id: run_id.clone(),
            artifact_type: artifact_type.to_string(),
            progress: self.progress.clone(),
        };
        let loop_request = LoopRequest {
            prompt,
            artifact_type: artifact_type.to_string(),
            kind: def.kind,
            max_rounds: settings.max_rounds,
            chunk_max_tokens: settings.chunk_max_tokens,
            resume,
        };
        let outcome = match self
            .generation_loop()
            .run(&loop_request, Some(&observer as &dyn ChunkObserver))
            .await
        {
            Ok(outcome) => outcome,
            Err(source) => {
                error!(
                    project_id,
                    stage_id,
                    artifact_type,
                    run_id = %run_id,
                    error = %source,
                    "generation call failed"
                );
                let error = RunError::new(RunErrorCode::ModelCallFailed, source.to_string());
                self.close_with_error(&run_id, RunStatus::Failed, SessionStatus::Failed, error)
                    .await;
                return Err(EngineError::GenerationCall {
                    stage: stage_id.to_string(),
                    artifact_type: artifact_type.to_string(),
                    source,
                });
            }
        };

        {
            let id = run_id.clone();
            let snapshot = AssembledSnapshot {
                content_chars: char_len(&outcome.content),
                content_hash: content_hash(&outcome.content),
                is_complete: outcome.is_complete,
                artifact_id: None,
                resource_path: None,
            };
            self.bookkeep(&run_id, "mark_session_assembled", move |db| {
                db.mark_session_assembled(&id, &snapshot)
            })
            .await;
        }

        let (content, critique_tokens, trace) = if settings.critique {
            let revise_budget = settings
                .chunk_max_tokens
                .max(self.config.generation.revise_max_tokens);
            match self
                .critique
                .review(artifact_type, &outcome.content, Some(revise_budget))
                .await
            {
                Ok(reviewed) => (reviewed.content, reviewed.tokens, reviewed.trace),
                Err(source) => {
                    error!(
                        project_id,
                        stage_id,
                        artifact_type,
                        run_id = %run_id,
                        error = %source,
                        "critique call failed"
                    );
                    let error = RunError::new(RunErrorCode::ModelCallFailed, source.to_string());
                    self.close_with_error(&run_id, RunStatus::Failed, SessionStatus::Failed, error)
                        .await;
                    return Err(EngineError::GenerationCall {
                        stage: stage_id.to_string(),
                        artifact_type: artifact_type.to_string(),
                        source,
                    });
                }
            }
        } else {
            (
                outcome.content.clone(),
                0,
                CritiqueTrace::bypassed(self.config.generation.critique),
            )
        };

        let target_stage = self.target_stage(artifact_type, stage_id, project);
        let mut artifact = Artifact::new(
            new_artifact_id(),
            artifact_type,
            def.name.clone(),
            target_stage.clone(),
            content,
        );
        artifact.tokens = outcome.tokens + critique_tokens;
        artifact.critique_trace = Some(trace.clone());
        artifact.generation_meta = Some(GenerationMeta {
            run_id: run_id.clone(),
            model: self.generator.model().to_string(),
            rounds: outcome.rounds,
            is_complete: outcome.is_complete,
            repaired: outcome.repaired,
            finish_reasons: outcome.finish_reasons.clone(),
        });

        let artifact = match self
            .finalizer
            .finalize(project_id, &target_stage, artifact, &def.extension)
            .await
        {
            Ok(artifact) => artifact,
            Err(source) => {
                error!(
                    project_id,
                    stage_id = %target_stage,
                    artifact_type,
                    run_id = %run_id,
                    error = %source,
                    "failed to persist artifact"
                );
                let error =
                    RunError::new(RunErrorCode::ArtifactPersistFailed, format!("{:#}", source));
                self.close_with_error(&run_id, RunStatus::Failed, SessionStatus::Failed, error)
                    .await;
                return Err(EngineError::ArtifactPersist {
                    stage: target_stage,
                    artifact_type: artifact_type.to_string(),
                    source,
                });
            }
        };

        let artifact_hash = content_hash(&artifact.content);
        let artifact_chars = char_len(&artifact.content);
        {
            let id = run_id.clone();
            let snapshot = AssembledSnapshot {
                content_chars: artifact_chars,
                content_hash: artifact_hash.clone(),
                is_complete: true,
                artifact_id: Some(artifact.id.clone()),
                resource_path: artifact.resource_path.clone(),
            };
            self.bookkeep(&run_id, "mark_session_assembled", move |db| {
                db.mark_session_assembled(&id, &snapshot)
            })
            .await;
        }
        self.set_session_status(&run_id, SessionStatus::Succeeded, None)
            .await;
        {
            let id = run_id.clone();
            let result = RunResult {
                artifact_id: artifact.id.clone(),
                artifact_type: artifact_type.to_string(),
                tokens: artifact.tokens,
                content_hash: artifact_hash,
                content_chars: artifact_chars,
            };
            self.bookkeep(&run_id, "mark_run_succeeded", move |db| {
                db.mark_run_succeeded(&id, &result, &trace)
            })
            .await;
        }

        info!(
            project_id,
            stage_id = %target_stage,
            artifact_type,
            run_id = %run_id,
            artifact_id = %artifact.id,
            tokens = artifact.tokens,
            rounds = outcome.rounds,
            is_complete = outcome.is_complete,
            "artifact generated"
        );
        Ok(artifact)
    }

    /// Pinned run id, else the newest resumable session, else a new run.
    async fn choose_run(
        &self,
        request: &GenerationRequest,
        artifact_type: &str,
    ) -> (String, Option<ChunkSession>) {
        if let Some(pinned) = request
            .resume
            .get(artifact_type)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
        {
            let id = pinned.to_string();
            let session = self
                .bookkeep(pinned, "get_session", move |db| db.get_session(&id))
                .await
                .flatten();
            match session {
                Some(s)
                    if s.project_id != request.project_id
                        || s.stage_id != request.stage_id
                        || s.artifact_type != artifact_type =>
                {
                    warn!(
                        run_id = pinned,
                        artifact_type,
                        "pinned run belongs to a different generation, ignoring it"
                    );
                }
                session => {
                    debug!(run_id = pinned, artifact_type, "using pinned run");
                    return (pinned.to_string(), session);
                }
            }
        }

        let (project, stage, ty) = (
            request.project_id.clone(),
            request.stage_id.clone(),
            artifact_type.to_string(),
        );
        if let Some(session) = self
            .bookkeep(artifact_type, "find_resumable_session", move |db| {
                db.find_resumable_session(&project, &stage, &ty)
            })
            .await
            .flatten()
        {
            info!(
                run_id = %session.run_id,
                artifact_type,
                completed_rounds = session.completed_rounds,
                total_rounds = session.total_rounds,
                "resuming interrupted run"
            );
            return (session.run_id.clone(), Some(session));
        }

        (
            new_run_id(&request.project_id, &request.stage_id, artifact_type),
            None,
        )
    }

    /// Catalog stage producing the type when the project has it, else the
    /// requested stage.
    fn target_stage(
        &self,
        artifact_type: &str,
        requested: &str,
        project: Option<&Project>,
    ) -> String {
        self.catalog
            .stage_for_output(artifact_type)
            .filter(|stage| project.is_some_and(|p| p.stage(&stage.id).is_some()))
            .map(|stage| stage.id.clone())
            .unwrap_or_else(|| requested.to_string())
    }

    fn generation_loop(&self) -> GenerationLoop {
        let generation = &self.config.generation;
        GenerationLoop::new(
            self.generator.clone(),
            self.merger.clone(),
            LoopSettings {
                structured_end_marker: generation.structured_end_marker.clone(),
                continuation_tail_chars: generation.continuation_tail_chars,
                repair_max_tokens: generation.repair_max_tokens,
                timeout: Duration::from_secs(self.config.llm.timeout_secs),
            },
        )
    }

    async fn recover_stale_runs(&self, project_id: &str, stage_id: &str) {
        let Some(cutoff) = self
            .config
            .ledger
            .stale_after()
            .and_then(|threshold| Utc::now().checked_sub_signed(threshold))
        else {
            warn!(
                project_id,
                stage_id,
                stale_after_minutes = self.config.ledger.stale_after_minutes,
                "stale threshold out of range, skipping stale run recovery"
            );
            return;
        };
        let (project, stage) = (project_id.to_string(), stage_id.to_string());
        match self
            .ledger
            .call(move |db| db.recover_stale_runs(&project, &stage, cutoff))
            .await
        {
            Ok(recovered) if !recovered.is_empty() => {
                warn!(project_id, stage_id, runs = ?recovered, "recovered stale runs");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(project_id, stage_id, error = %e, "stale run recovery failed");
            }
        }
    }

    async fn close_with_error(
        &self,
        run_id: &str,
        run_status: RunStatus,
        session_status: SessionStatus,
        error: RunError,
    ) {
        let (id, run_error) = (run_id.to_string(), error.clone());
        self.bookkeep(run_id, "close_run", move |db| match run_status {
            RunStatus::Blocked => db.mark_run_blocked(&id, &run_error),
            _ => db.mark_run_failed(&id, &run_error),
        })
        .await;
        self.set_session_status(run_id, session_status, Some(error))
            .await;
    }

    async fn set_session_status(
        &self,
        run_id: &str,
        status: SessionStatus,
        error: Option<RunError>,
    ) {
        let id = run_id.to_string();
        self.bookkeep(run_id, "mark_session_status", move |db| {
            db.mark_session_status(&id, status, error.as_ref())
        })
        .await;
    }

    /// Run a ledger write, logging instead of propagating failures.
    async fn bookkeep<F, R>(&self, run_id: &str, action: &'static str, f: F) -> Option<R>
    where
        F: FnOnce(&LedgerDb) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        match self.ledger.call(f).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(run_id, action, error = %e, "ledger bookkeeping failed");
                None
            }
        }
    }
}

/// `artifact-{millis}-{9 random}`
fn new_artifact_id() -> String {
    format!(
        "artifact-{}-{}",
        Utc::now().timestamp_millis(),
        random_suffix(9)
    )
}

/// Persists every round to the chunk session as it arrives.
struct LedgerObserver {
    ledger: LedgerHandle,
    run_id: String,
    artifact_type: String,
    progress: Option<Arc<dyn ProgressListener>>,
}

#[async_trait]
impl ChunkObserver for LedgerObserver {
    async fn on_chunk(&self, report: &ChunkReport) {
        let run_id = self.run_id.clone();
        let round = report.round;
        let piece = report.piece.clone();
        let finish_reason = report.finish_reason.clone();
        if let Err(e) = self
            .ledger
            .call(move |db| db.append_chunk(&run_id, round, &piece, finish_reason.as_deref()))
            .await
        {
            warn!(
                run_id = %self.run_id,
                round,
                error = %e,
                "failed to persist chunk"
            );
        }
        if let Some(progress) = &self.progress {
            progress.round_finished(&self.artifact_type, report);
        }
    }
}
