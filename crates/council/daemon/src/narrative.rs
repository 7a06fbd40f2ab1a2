//! HTTP narrative backends.

use crate::config::{NarrativeBackendConfig, NarrativeBackendKind};
use crate::error::{DaemonError, DaemonResult};
use async_trait::async_trait;
use council_engine::{NarrativeGenerator, ParticipantContext, TemplateNarrator};
use council_types::{ExternalError, ExternalResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Narrative generator backed by a language model over HTTP
pub struct HttpNarrator {
    client: Client,
    config: NarrativeBackendConfig,
}

impl HttpNarrator {
    pub fn new(config: NarrativeBackendConfig) -> DaemonResult<Self> {
        if config.kind == NarrativeBackendKind::Ollama && config.endpoint.is_none() {
            return Err(DaemonError::Config(
                "ollama backend requires narrative.endpoint".into(),
            ));
        }
        if config.kind == NarrativeBackendKind::OpenaiCompatible && config.api_key.is_none() {
            return Err(DaemonError::Config(
                "openai_compatible backend requires narrative.api_key".into(),
            ));
        }
        let client = build_http_client(&config)?;
        Ok(Self { client, config })
    }

    async fn generate_ollama(&self, prompt: &str) -> ExternalResult<String> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or_default();
        let url = format!("{}/api/generate", endpoint.trim_end_matches('/'));

        let mut payload = json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
        });

        let mut options = serde_json::Map::new();
        if let Some(temp) = self.config.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = self.config.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !options.is_empty() {
            payload["options"] = Value::Object(options);
        }

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error("ollama", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::Unavailable(format!(
                "ollama error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::InvalidResponse(format!("invalid ollama response: {}", e)))?;
        Ok(body.response.trim().to_string())
    }

    async fn generate_openai_compatible(
        &self,
        system_prompt: &str,
        prompt: &str,
    ) -> ExternalResult<String> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let url = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_ENDPOINT.to_string());

        let mut payload = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": prompt },
            ],
        });
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error("chat completions", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::Unavailable(format!(
                "chat completions error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let body: OpenAiResponse = response.json().await.map_err(|e| {
            ExternalError::InvalidResponse(format!("invalid chat completions response: {}", e))
        })?;
        let choice = body.choices.first().ok_or_else(|| {
            ExternalError::InvalidResponse("response did not include choices".into())
        })?;
        Ok(extract_text(&choice.message.content))
    }

    fn request_error(&self, backend: &str, err: reqwest::Error) -> ExternalError {
        if err.is_timeout() {
            ExternalError::Timeout(self.config.request_timeout_secs.saturating_mul(1000))
        } else {
            ExternalError::Unavailable(format!("{} request failed: {}", backend, err))
        }
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrator {
    async fn generate(&self, prompt: &str, context: &ParticipantContext) -> ExternalResult<String> {
        let system_prompt = persona_prompt(context);
        match self.config.kind {
            NarrativeBackendKind::Ollama => {
                self.generate_ollama(&format!("System:\n{}\n\nUser:\n{}", system_prompt, prompt))
                    .await
            }
            NarrativeBackendKind::OpenaiCompatible => {
                self.generate_openai_compatible(&system_prompt, prompt).await
            }
            NarrativeBackendKind::Template => TemplateNarrator.generate(prompt, context).await,
        }
    }
}

/// Narrative generator selected by configuration
pub fn build_narrator(config: &NarrativeBackendConfig) -> DaemonResult<Arc<dyn NarrativeGenerator>> {
    match config.kind {
        NarrativeBackendKind::Template => Ok(Arc::new(TemplateNarrator)),
        _ => Ok(Arc::new(HttpNarrator::new(config.clone())?)),
    }
}

fn build_http_client(config: &NarrativeBackendConfig) -> DaemonResult<Client> {
    let mut builder = Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));
    if !config.use_system_proxy {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|e| DaemonError::Narrative(format!("failed to build HTTP client: {}", e)))
}

fn persona_prompt(context: &ParticipantContext) -> String {
    let mut prompt = format!(
        "You are {}, taking part in a city council deliberation.",
        context.display_name
    );
    if let Some(persona) = &context.persona {
        prompt.push_str(&format!(" Your role: {}.", persona));
    }
    if !context.interests.is_empty() {
        let interests: Vec<&str> = context.interests.iter().map(|c| c.as_str()).collect();
        prompt.push_str(&format!(" You care most about {}.", interests.join(", ")));
    }
    prompt.push_str(" Answer briefly and concretely.");
    prompt
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
