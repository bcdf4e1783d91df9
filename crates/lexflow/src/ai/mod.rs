//! Gateway for LLM calls.
//!
//! Stage workers only see the [`AiClient`] trait: a request in, text and
//! token usage out, or an [`AiError`] that says whether retrying could help.

pub mod client;
pub mod decode;
pub mod error;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

pub use client::HttpAiClient;
pub use decode::{ClassificationResult, DecodeError, RawFinding};
pub use error::AiError;

/// Requested output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded image bytes.
    Image { media_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub model: String,
    pub system: Option<String>,
    pub content: Vec<ContentPart>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl AiRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            content: vec![ContentPart::Text(prompt.into())],
            temperature: Some(0.0),
            max_tokens: 4096,
            response_format: ResponseFormat::Text,
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Places an image before the text prompt.
    pub fn with_image(mut self, media_type: impl Into<String>, bytes: &[u8]) -> Self {
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.content.insert(
            0,
            ContentPart::Image {
                media_type: media_type.into(),
                data,
            },
        );
        self
    }

    /// The text parts joined, for logging and test assertions.
    pub fn prompt_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResponse {
    pub content: String,
    pub tokens_used: i64,
}

#[async_trait]
pub trait AiClient: Send + Sync {
    async fn call(&self, request: AiRequest) -> Result<AiResponse, AiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_is_encoded_and_prepended() {
        let req = AiRequest::new("vision", "Transcribe this page").with_image("image/png", b"hello");
        assert!(req.has_image());
        assert_eq!(
            req.content[0],
            ContentPart::Image {
                media_type: "image/png".into(),
                data: "aGVsbG8=".into()
            }
        );
        assert_eq!(req.prompt_text(), "Transcribe this page");
    }

    #[test]
    fn test_builder_defaults() {
        let req = AiRequest::new("m", "p").json().with_max_retries(1);
        assert_eq!(req.response_format, ResponseFormat::Json);
        assert_eq!(req.max_retries, 1);
        assert!(!req.has_image());
    }
}
