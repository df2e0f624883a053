//! OpenAI-compatible `/chat/completions` client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerateOptions, Generation, TextGenerator};
use crate::errors::GenerationError;
use crate::stageforge_config::LlmSection;
use crate::util::truncate_chars;

/// Keys shipped in sample `.env` files that must never reach a provider.
const PLACEHOLDER_KEYS: &[&str] = &["sk-your-api-key-here", "your-api-key", "changeme"];

/// HTTP-backed [`TextGenerator`] for OpenAI-compatible endpoints.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsGenerator {
    /// Build a client reading the API key from the configured environment variable.
    pub fn from_config(llm: &LlmSection) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&llm.api_key_env).unwrap_or_default();
        Self::with_api_key(llm, api_key)
    }

    pub fn with_api_key(llm: &LlmSection, api_key: String) -> Result<Self, GenerationError> {
        validate_api_key(&llm.api_key_env, &api_key)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::Misconfiguration(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(&llm.base_url),
            model: llm.model.clone(),
            api_key,
        })
    }
}

/// Reject empty or placeholder API keys before any request is made.
pub fn validate_api_key(env_var: &str, key: &str) -> Result<(), GenerationError> {
    let key = key.trim();
    if key.is_empty() || PLACEHOLDER_KEYS.contains(&key) {
        return Err(GenerationError::Misconfiguration(format!(
            "{} is not set or still holds a placeholder value",
            env_var
        )));
    }
    Ok(())
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

fn build_request<'a>(
    model: &'a str,
    prompt: &'a str,
    options: &GenerateOptions,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: prompt,
        }],
        max_tokens: options.max_output_tokens,
        temperature: options.temperature,
        response_format: options.json_mode.then_some(ResponseFormat {
            kind: "json_object",
        }),
    }
}

fn parse_response(body: &str) -> Result<Generation, GenerationError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(GenerationError::EmptyResponse)?;
    Ok(Generation {
        content: choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default(),
        finish_reason: choice.finish_reason,
        total_tokens: response.usage.map(|u| u.total_tokens).unwrap_or(0),
    })
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError> {
        let request = build_request(&self.model, prompt, options);
        debug!(
            model = %self.model,
            prompt_chars = prompt.chars().count(),
            max_tokens = options.max_output_tokens,
            temperature = options.temperature,
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        seconds: options.timeout.as_secs(),
                    }
                } else {
                    GenerationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout {
                    seconds: options.timeout.as_secs(),
                }
            } else {
                GenerationError::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(GenerationError::Provider {
                status: status.as_u16(),
                message: truncate_chars(body.trim(), 500).to_string(),
            });
        }

        parse_response(&body)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options(json_mode: bool) -> GenerateOptions {
        GenerateOptions {
            max_output_tokens: 600,
            temperature: 0.2,
            timeout: Duration::from_secs(10),
            json_mode,
        }
    }

    #[test]
    fn test_validate_api_key_rejects_placeholders() {
        assert!(validate_api_key("KEY", "").is_err());
        assert!(validate_api_key("KEY", "  ").is_err());
        assert!(validate_api_key("KEY", "sk-your-api-key-here").is_err());
        assert!(validate_api_key("KEY", "sk-live-123").is_ok());

        match validate_api_key("DEEPSEEK_API_KEY", "") {
            Err(GenerationError::Misconfiguration(msg)) => {
                assert!(msg.contains("DEEPSEEK_API_KEY"))
            }
            other => panic!("Expected Misconfiguration, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_endpoint_normalization() {
        assert_eq!(
            chat_endpoint("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_build_request_json_mode() {
        let opts = options(true);
        let body = serde_json::to_value(build_request("m", "hi", &opts)).unwrap();
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["max_tokens"], 600);
        assert_eq!(body["response_format"]["type"], "json_object");

        let opts = options(false);
        let body = serde_json::to_value(build_request("m", "hi", &opts)).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        }"#;
        let generation = parse_response(body).unwrap();
        assert_eq!(generation.content, "hello");
        assert_eq!(generation.finish_reason.as_deref(), Some("length"));
        assert_eq!(generation.total_tokens, 7);
    }

    #[test]
    fn test_parse_response_errors() {
        assert!(matches!(
            parse_response(r#"{"choices": []}"#),
            Err(GenerationError::EmptyResponse)
        ));
        assert!(matches!(
            parse_response("not json"),
            Err(GenerationError::InvalidResponse(_))
        ));
        let missing_content = parse_response(r#"{"choices": [{"message": {}}]}"#).unwrap();
        assert_eq!(missing_content.content, "");
        assert_eq!(missing_content.total_tokens, 0);
    }

    #[test]
    fn test_with_api_key_records_model() {
        let llm = LlmSection {
            model: "deepseek-reasoner".into(),
            ..Default::default()
        };
        let generator = ChatCompletionsGenerator::with_api_key(&llm, "sk-test".into()).unwrap();
        assert_eq!(generator.model(), "deepseek-reasoner");
        assert!(generator.endpoint.ends_with("/chat/completions"));
    }
}
