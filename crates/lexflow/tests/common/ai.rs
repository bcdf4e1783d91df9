//! AI client double that answers from per-model scripts.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use lexflow::ai::{AiClient, AiError, AiRequest, AiResponse};

pub const CLASSIFY_MODEL: &str = "test-classify";
pub const EXTRACT_MODEL: &str = "test-extract";
pub const VISION_MODEL: &str = "test-vision";

/// Tokens reported for every scripted reply.
pub const TOKENS_PER_CALL: i64 = 10;

/// How long a stalled call hangs; far past any stage timeout in the tests.
const STALL: Duration = Duration::from_secs(600);

enum Reply {
    Content(String),
    Error(AiError),
    Stall,
}

/// Replays queued replies per model; once a model's queue is empty its
/// fallback reply (if any) is used, otherwise the call fails as not
/// configured.
#[derive(Default)]
pub struct ScriptedAi {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<AiRequest>>,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one reply for the next call to `model`.
    pub fn reply(&self, model: &str, content: impl Into<String>) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(Reply::Content(content.into()));
        self
    }

    /// Queues one failure for the next call to `model`.
    pub fn fail(&self, model: &str, error: AiError) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(Reply::Error(error));
        self
    }

    /// Queues a call to `model` that never answers.
    pub fn stall(&self, model: &str) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(Reply::Stall);
        self
    }

    /// Reply used for `model` whenever nothing is queued.
    pub fn always(&self, model: &str, content: impl Into<String>) -> &Self {
        self.fallback
            .lock()
            .unwrap()
            .insert(model.to_string(), content.into());
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<AiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, model: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .count()
    }
}

#[async_trait]
impl AiClient for ScriptedAi {
    async fn call(&self, request: AiRequest) -> Result<AiResponse, AiError> {
        let model = request.model.clone();
        self.calls.lock().unwrap().push(request);

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&model)
            .and_then(VecDeque::pop_front);
        let reply = match queued {
            Some(reply) => reply,
            None => match self.fallback.lock().unwrap().get(&model) {
                Some(content) => Reply::Content(content.clone()),
                None => {
                    return Err(AiError::NotConfigured(format!(
                        "no scripted reply for model '{}'",
                        model
                    )))
                }
            },
        };
        match reply {
            Reply::Content(content) => Ok(AiResponse {
                content,
                tokens_used: TOKENS_PER_CALL,
            }),
            Reply::Error(error) => Err(error),
            Reply::Stall => {
                tokio::time::sleep(STALL).await;
                Err(AiError::Timeout(STALL))
            }
        }
    }
}
