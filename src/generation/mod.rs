//! Chunked, resumable artifact generation.
//!
//! - `kind`: artifact output shapes and their per-kind strategies
//! - `completion`: pluggable completion detectors
//! - `merge`: pluggable overlap merging of successive chunks
//! - `chunked`: the round loop itself

pub mod chunked;
pub mod completion;
pub mod kind;
pub mod merge;

pub use chunked::{
    ChunkObserver, ChunkReport, GenerationLoop, LoopOutcome, LoopRequest, LoopSettings,
    ResumePoint,
};
pub use completion::{
    CompletionDetector, EndMarkerDetector, HtmlDocumentDetector, JsonPayloadDetector,
};
pub use kind::ArtifactKind;
pub use merge::{OverlapMerger, SuffixPrefixMerger};
