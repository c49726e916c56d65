use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to send request to {provider}: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} request failed: {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to parse {provider} response: {message}")]
    Response {
        provider: &'static str,
        message: String,
    },
    #[error("{0} requires an API key")]
    MissingApiKey(&'static str),
}

/// One round-trip to a text-generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// Ask the backend to constrain output to a JSON object.
    pub json: bool,
}

impl ChatRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json: false,
        }
    }

    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            json: true,
            ..Self::text(system, user)
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!(
                "unsupported provider {other:?}, expected 'ollama' or 'openai'"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    /// Defaults to the provider's public endpoint.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "llama3".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

pub const OLLAMA_URL: &str = "http://localhost:11434";
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

pub fn build_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let client = http_client(config.timeout_secs, "language model")?;
    match config.provider {
        Provider::Ollama => Ok(Arc::new(OllamaClient::with_client(
            client,
            config.base_url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            config.model.clone(),
            config.temperature,
        ))),
        Provider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or(LlmError::MissingApiKey("openai"))?;
            Ok(Arc::new(OpenAiClient::with_client(
                client,
                config.base_url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
                config.model.clone(),
                api_key,
                config.temperature,
            )))
        }
    }
}

pub fn http_client(timeout_secs: u64, purpose: &'static str) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Request {
            provider: purpose,
            message: format!("failed to build HTTP client: {e}"),
        })
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

fn messages(request: &ChatRequest) -> Vec<Message<'_>> {
    let mut messages = Vec::with_capacity(2);
    if !request.system.is_empty() {
        messages.push(Message {
            role: "system",
            content: &request.system,
        });
    }
    messages.push(Message {
        role: "user",
        content: &request.user,
    });
    messages
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, LlmError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    response.json().await.map_err(|e| LlmError::Response {
        provider,
        message: e.to_string(),
    })
}

#[derive(Clone, Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model, 0.0)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        model: String,
        temperature: f32,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            client,
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = OllamaChatRequest {
            model: &self.model,
            messages: messages(request),
            stream: false,
            format: request.json.then_some("json"),
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        tracing::debug!(model = %self.model, json = request.json, user_len = request.user.len(), "ollama chat");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: "ollama",
                message: e.to_string(),
            })?;

        let parsed: OllamaChatResponse = read_json("ollama", response).await?;
        Ok(parsed.message.content)
    }
}

/// Any endpoint implementing `/chat/completions`.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model, api_key, 0.0)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        model: String,
        api_key: String,
        temperature: f32,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            temperature,
            client,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = OpenAiChatRequest {
            model: &self.model,
            messages: messages(request),
            temperature: self.temperature,
            response_format: request.json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        tracing::debug!(model = %self.model, json = request.json, user_len = request.user.len(), "openai chat");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: "openai",
                message: e.to_string(),
            })?;

        let parsed: OpenAiChatResponse = read_json("openai", response).await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| LlmError::Response {
                provider: "openai",
                message: "response has no choices".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn ollama_sends_system_and_json_format() {
        let server = MockServer::start_async().await;
        let chat = server.mock(|when, then| {
            when.method(POST)
                .path("/api/chat")
                .is_true(|req| {
                    let body: serde_json::Value =
                        serde_json::from_slice(req.body().as_ref()).unwrap_or_default();
                    body["model"] == "llama3"
                        && body["stream"] == false
                        && body["format"] == "json"
                        && body["messages"][0]["role"] == "system"
                });
            then.status(200).json_body(json!({
                "message": { "role": "assistant", "content": "{\"relationships\": []}" }
            }));
        });

        let client = OllamaClient::new(server.base_url(), "llama3".to_string());
        let reply = client
            .complete(&ChatRequest::json("extract", "Alice works at TechCorp"))
            .await
            .unwrap();

        assert_eq!(reply, "{\"relationships\": []}");
        chat.assert_calls(1);
    }

    #[tokio::test]
    async fn ollama_reports_status_errors() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(500).body("boom");
        });

        let client = OllamaClient::new(server.base_url(), "llama3".to_string());
        let err = client
            .complete(&ChatRequest::text("", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Status { status: 500, .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn openai_uses_bearer_and_response_format() {
        let server = MockServer::start_async().await;
        let chat = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer sk-test")
                .is_true(|req| {
                    let body: serde_json::Value =
                        serde_json::from_slice(req.body().as_ref()).unwrap_or_default();
                    body["response_format"]["type"] == "json_object"
                });
            then.status(200).json_body(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{}" } }]
            }));
        });

        let client = OpenAiClient::new(
            server.base_url(),
            "gpt-4.1-mini".to_string(),
            "sk-test".to_string(),
        );
        let reply = client.complete(&ChatRequest::json("sys", "user")).await.unwrap();

        assert_eq!(reply, "{}");
        chat.assert_calls(1);
    }

    #[tokio::test]
    async fn openai_without_choices_is_a_response_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({ "choices": [] }));
        });

        let client = OpenAiClient::new(server.base_url(), "m".to_string(), "k".to_string());
        let err = client.complete(&ChatRequest::text("", "q")).await.unwrap_err();
        assert!(matches!(err, LlmError::Response { .. }));
    }

    #[test]
    fn openai_provider_requires_key() {
        let config = LlmConfig {
            provider: Provider::OpenAi,
            ..Default::default()
        };
        assert!(matches!(
            build_language_model(&config),
            Err(LlmError::MissingApiKey("openai"))
        ));
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!("gemini".parse::<Provider>().is_err());
    }
}
