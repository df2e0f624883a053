use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::context::DependencySnapshot;
use crate::critique::CritiqueTrace;
use crate::generation::OverlapMerger;
use crate::util::random_suffix;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Blocked)
    }

    /// Allowed edges: queued → running | blocked | failed and
    /// running → succeeded | failed | blocked.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Blocked | Self::Failed)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Blocked)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Running,
    Assembled,
    Succeeded,
    Failed,
    Blocked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Assembled => "assembled",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "assembled" => Ok(Self::Assembled),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// Machine-readable failure classes recorded on runs and sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorCode {
    DependencyMissing,
    ModelCallFailed,
    ArtifactPersistFailed,
    TemplateUnavailable,
    StaleRunRecovered,
    Internal,
}

impl RunErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::ModelCallFailed => "MODEL_CALL_FAILED",
            Self::ArtifactPersistFailed => "ARTIFACT_PERSIST_FAILED",
            Self::TemplateUnavailable => "TEMPLATE_UNAVAILABLE",
            Self::StaleRunRecovered => "STALE_RUN_RECOVERED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for RunErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub code: RunErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_dependencies: Vec<String>,
}

impl RunError {
    pub fn new(code: RunErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            missing_dependencies: Vec::new(),
        }
    }

    pub fn dependency_missing(message: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            code: RunErrorCode::DependencyMissing,
            message: message.into(),
            missing_dependencies: missing,
        }
    }
}

/// Shape of the context a run was generated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDigest {
    pub context_chars: usize,
    pub key_count: usize,
    pub required_keys: Vec<String>,
    pub dependency_snapshot_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequestMeta {
    pub model: String,
    pub chunk_max_tokens: u32,
    pub max_rounds: u32,
    pub critique_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub artifact_id: String,
    pub artifact_type: String,
    pub tokens: u64,
    pub content_hash: String,
    pub content_chars: usize,
}

/// One generation attempt for (project, stage, artifact type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRun {
    pub run_id: String,
    pub project_id: String,
    pub stage_id: String,
    pub artifact_type: String,
    pub status: RunStatus,
    pub dependency_snapshot: Option<DependencySnapshot>,
    pub context_digest: Option<ContextDigest>,
    pub model_request: Option<ModelRequestMeta>,
    pub error: Option<RunError>,
    pub result: Option<RunResult>,
    pub critique_trace: Option<CritiqueTrace>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a run is queued.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub project_id: String,
    pub stage_id: String,
    pub artifact_type: String,
    pub dependency_snapshot: DependencySnapshot,
}

/// `wfr-{project}-{stage}-{type}-{millis}-{6 random}`
pub fn new_run_id(project_id: &str, stage_id: &str, artifact_type: &str) -> String {
    format!(
        "wfr-{}-{}-{}-{}-{}",
        project_id,
        stage_id,
        artifact_type,
        Utc::now().timestamp_millis(),
        random_suffix(6)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub round: u32,
    pub content: String,
    pub content_chars: usize,
    pub content_hash: String,
    pub finish_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledSnapshot {
    pub content_chars: usize,
    pub content_hash: String,
    pub is_complete: bool,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub resource_path: Option<String>,
}

/// Durable round-by-round record of a run's generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSession {
    pub run_id: String,
    pub project_id: String,
    pub stage_id: String,
    pub artifact_type: String,
    pub status: SessionStatus,
    /// Planned rounds
    pub total_rounds: u32,
    /// Distinct rounds stored
    pub completed_rounds: u32,
    /// Ordered by round
    pub chunks: Vec<ChunkRecord>,
    pub error: Option<RunError>,
    pub assembled: Option<AssembledSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChunkSession {
    /// Rebuild the assembly by merging chunks in round order.
    pub fn assembled_content(&self, merger: &dyn OverlapMerger) -> String {
        self.chunks
            .iter()
            .fold(String::new(), |acc, chunk| merger.merge(&acc, &chunk.content))
    }

    /// Whether an interrupted attempt can be continued from this session.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Running | SessionStatus::Failed | SessionStatus::Assembled
        ) && self.completed_rounds > 0
            && self.completed_rounds < self.total_rounds
            && !self.assembled.as_ref().is_some_and(|a| a.is_complete)
    }
}

/// Filter for `list_runs`; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub project_id: Option<String>,
    pub stage_id: Option<String>,
    pub artifact_type: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}
