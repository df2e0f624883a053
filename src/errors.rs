//! Typed error hierarchy for stageforge.
//!
//! Three top-level enums cover the three subsystems:
//! - `EngineError`: stage generation requests (validation, dependencies, calls, persistence)
//! - `GenerationError`: a single call to the text-generation endpoint
//! - `CatalogError`: loading and validating the artifact catalog

use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::RunErrorCode;

/// Errors from a single call to the text-generation capability.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation endpoint is misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Generation request failed: {0}")]
    Transport(String),

    #[error("Generation provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Generation request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Generation provider returned an empty response")]
    EmptyResponse,

    #[error("Generation provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while loading or validating the artifact catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(String),

    #[error("Duplicate stage id '{id}'")]
    DuplicateStage { id: String },

    #[error("Stage '{stage}' lists unknown output type '{artifact_type}'")]
    UnknownOutput { stage: String, artifact_type: String },

    #[error("Artifact type '{artifact_type}' depends on unknown type '{dependency}'")]
    UnknownDependency {
        artifact_type: String,
        dependency: String,
    },

    #[error("Cycle detected in artifact dependencies. Involved types: {types:?}")]
    Cycle { types: Vec<String> },
}

/// Errors from a stage generation request.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No artifact types were selected for stage {stage}")]
    NoArtifactTypes { stage: String },

    #[error("Stage {stage} is not defined for project {project}")]
    UnknownStage { project: String, stage: String },

    #[error("None of the selected artifact types {selected:?} are outputs of stage {stage}")]
    NoEffectiveArtifactTypes { stage: String, selected: Vec<String> },

    #[error(
        "Artifact {artifact_type} in stage {stage} is missing dependency inputs: {}",
        .missing.join(", ")
    )]
    DependencyMissing {
        stage: String,
        artifact_type: String,
        missing: Vec<String>,
    },

    #[error("Prompt templates unavailable for {artifact_type} in stage {stage}: {source}")]
    TemplateUnavailable {
        stage: String,
        artifact_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Generation call failed for {artifact_type} in stage {stage}: {source}")]
    GenerationCall {
        stage: String,
        artifact_type: String,
        #[source]
        source: GenerationError,
    },

    #[error("Failed to persist artifact {artifact_type} in stage {stage}: {source}")]
    ArtifactPersist {
        stage: String,
        artifact_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Generation of {artifact_type} in stage {stage} is already in flight for project {project}")]
    AlreadyInFlight {
        project: String,
        stage: String,
        artifact_type: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True for request validation failures raised before any run is opened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoArtifactTypes { .. }
                | Self::UnknownStage { .. }
                | Self::NoEffectiveArtifactTypes { .. }
        )
    }

    /// The ledger error code recorded when this error terminates a run.
    pub fn run_error_code(&self) -> RunErrorCode {
        match self {
            Self::DependencyMissing { .. } => RunErrorCode::DependencyMissing,
            Self::GenerationCall { .. } => RunErrorCode::ModelCallFailed,
            Self::ArtifactPersist { .. } => RunErrorCode::ArtifactPersistFailed,
            Self::TemplateUnavailable { .. } => RunErrorCode::TemplateUnavailable,
            _ => RunErrorCode::Internal,
        }
    }
}
