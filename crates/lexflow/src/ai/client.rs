use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::error::AiError;
use super::types::{ContentParam, ImageSource, Message, MessagesRequest, MessagesResponse};
use super::{AiClient, AiRequest, AiResponse, ContentPart, ResponseFormat};

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const JSON_INSTRUCTION: &str =
    "Respond with a single JSON value and nothing else. Do not wrap it in code fences.";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// [`AiClient`] backed by the Messages HTTP API.
///
/// Each call is bounded by the request's timeout per attempt and retried
/// internally up to `max_retries` times on retryable errors.
pub struct HttpAiClient {
    api_key: SecretString,
    client: Client,
    base_url: String,
    retry_base: Duration,
}

impl HttpAiClient {
    pub fn new(api_key: SecretString) -> Result<Self, AiError> {
        Self::with_base_url(api_key, DEFAULT_API_URL)
    }

    pub fn with_base_url(api_key: SecretString, base_url: impl Into<String>) -> Result<Self, AiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AiError::NotConfigured(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.into(),
            retry_base: Duration::from_millis(500),
        })
    }

    /// Base delay between internal retries; doubles per attempt.
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn to_wire(request: &AiRequest) -> MessagesRequest {
        let content = request
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => ContentParam::Text { text: text.clone() },
                ContentPart::Image { media_type, data } => ContentParam::Image {
                    source: ImageSource {
                        source_type: "base64",
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();

        let system = match (request.response_format, request.system.as_deref()) {
            (ResponseFormat::Json, Some(system)) => Some(format!("{}\n\n{}", system, JSON_INSTRUCTION)),
            (ResponseFormat::Json, None) => Some(JSON_INSTRUCTION.to_string()),
            (ResponseFormat::Text, system) => system.map(str::to_string),
        };

        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            system,
            temperature: request.temperature,
            messages: vec![Message {
                role: "user",
                content,
            }],
        }
    }

    async fn send_once(&self, body: &MessagesRequest) -> Result<AiResponse, AiError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(AiError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        let content = body.text();
        if content.trim().is_empty() {
            return Err(AiError::InvalidResponse(format!(
                "no text content (stop reason: {})",
                body.stop_reason.as_deref().unwrap_or("none")
            )));
        }
        Ok(AiResponse {
            content,
            tokens_used: body.usage.total(),
        })
    }

    fn delay_for(&self, error: &AiError, attempt: u32) -> Duration {
        match error {
            AiError::RateLimited { retry_after_ms } => Duration::from_millis(*retry_after_ms),
            _ => self.retry_base.saturating_mul(1u32 << attempt.min(10)),
        }
        .min(MAX_BACKOFF)
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn call(&self, request: AiRequest) -> Result<AiResponse, AiError> {
        let body = Self::to_wire(&request);
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(request.timeout, self.send_once(&body)).await {
                Ok(result) => result,
                Err(_) => Err(AiError::Timeout(request.timeout)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < request.max_retries => {
                    let delay = self.delay_for(&err, attempt);
                    tracing::warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "AI call failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
