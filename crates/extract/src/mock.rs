//! Scripted language model for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::llm::{ChatRequest, LanguageModel, LlmError};

type Script = Box<dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync>;

/// Replies through a closure and records every request it receives.
pub struct ScriptedModel {
    script: Script,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Same reply to every request.
    pub fn replying(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Every request fails as if the service were unreachable.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| {
            Err(LlmError::Request {
                provider: "scripted",
                message: message.clone(),
            })
        })
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        (self.script)(request)
    }
}
