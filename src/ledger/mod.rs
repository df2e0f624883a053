//! Durable run ledger.
//!
//! Every generation attempt is recorded as a `GenerationRun`, and every
//! model round as a chunk in a `ChunkSession`, so interrupted attempts can
//! be inspected and resumed.

pub mod db;
pub mod models;

pub use db::{LedgerDb, LedgerHandle};
pub use models::{
    AssembledSnapshot, ChunkRecord, ChunkSession, ContextDigest, GenerationRun, ModelRequestMeta,
    NewRun, RunError, RunErrorCode, RunFilter, RunResult, RunStatus, SessionStatus, new_run_id,
};
