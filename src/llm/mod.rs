//! Text-generation capability.
//!
//! The engine only ever issues single-shot calls through [`TextGenerator`];
//! chunking, resumption and critique are layered on top. Calls are never
//! retried here.

pub mod chat;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::GenerationError;

pub use chat::ChatCompletionsGenerator;

/// Per-call parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

/// Result of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub content: String,
    pub finish_reason: Option<String>,
    pub total_tokens: u64,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError>;

    /// Model identifier recorded in run metadata.
    fn model(&self) -> &str;
}
