//! Google Gemini provider.
//!
//! Talks to the `generateContent` endpoint, replaying the session transcript
//! on every exchange so the model keeps the conversation context.

use super::{ChatProvider, Conversation, ProviderError, Role};
use async_trait::async_trait;
use haven_common::config::ProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini provider. One instance is shared by all sessions; the per-session
/// state lives entirely in the replayed transcript.
#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    top_k: i32,
    top_p: f64,
    max_output_tokens: i64,
    base_url: String,
    client: Client,
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i64,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl GeminiProvider {
    /// Build a provider from configuration.
    ///
    /// Fails when no API key is configured; the caller caches that failure
    /// for the process lifetime.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ProviderError::unavailable("gemini", "GEMINI_API_KEY environment variable not set")
            })?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::builder()
                .timeout(config.request_timeout())
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        })
    }

    /// Point the provider at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Transcript turns plus the new user message, in Gemini wire format.
    fn build_contents(conversation: &Conversation, message: &str) -> Vec<Content> {
        let mut contents: Vec<Content> = conversation
            .turns()
            .iter()
            .map(|turn| Content {
                role: Some(
                    match turn.role {
                        Role::User => "user",
                        Role::Model => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: turn.text.clone(),
                }],
            })
            .collect();

        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: message.to_string(),
            }],
        });

        contents
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send_turn(
        &self,
        conversation: &Conversation,
        message: &str,
    ) -> Result<String, ProviderError> {
        let request = GenerateContentRequest {
            contents: Self::build_contents(conversation, message),
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: self.system_prompt.clone(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_k: self.top_k,
                top_p: self.top_p,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "text/plain",
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                ProviderError::exchange("gemini", format!("Request failed: {}", e), None)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::exchange(
                "gemini",
                format!("API error ({}): {}", status.as_u16(), error_text),
                Some(status.as_u16()),
            ));
        }

        let result: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::exchange("gemini", format!("Failed to parse response: {}", e), None)
        })?;

        if let Some(err) = result.error {
            return Err(ProviderError::exchange(
                "gemini",
                format!("API error: {}", err.message),
                None,
            ));
        }

        let text = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::empty_reply("gemini"));
        }

        Ok(text)
    }
}
