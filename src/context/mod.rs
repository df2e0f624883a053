//! Context assembly for generation prompts.
//!
//! - `compress`: extractive summaries used as dependency input
//! - `assembler`: required keys, budgeted harvesting and hard dependencies

pub mod assembler;
pub mod compress;

pub use assembler::{
    AssembledContext, AssemblyRequest, ContextAssembler, DependencyInput, DependencySnapshot,
    dependency_snapshot, required_keys,
};
pub use compress::{COMPRESSION_ALGORITHM, Compressed, CompressionSettings, compress};
