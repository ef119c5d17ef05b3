//! DeepSeek adapter (chat completions).
//!
//! Talks to any OpenAI-compatible `chat/completions` endpoint; DeepSeek is the
//! default base URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use confidant_core::{config::Config, errors::Error, ports::CompletionClient, Result};

/// Persona prepended to every request.
pub const SYSTEM_PROMPT: &str = "Ты - эмпатичный психолог-помощник. Поддержи пользователя, \
прояви участие. Будь внимательным слушателем. Задавай уточняющие вопросы. \
Избегай медицинских диагнозов.";

#[derive(Clone, Debug)]
pub struct DeepSeekClient {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

impl DeepSeekClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        // The proxy enforces the hard timeout; this one only guards the socket.
        let http = reqwest::Client::builder()
            .timeout(cfg.completion_timeout + Duration::from_secs(1))
            .user_agent("confidant/0.1")
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            api_key: cfg.completion_api_key.clone(),
            base_url: cfg.completion_base_url.clone(),
            model: cfg.completion_model.clone(),
            max_tokens: cfg.completion_max_tokens,
            temperature: cfg.completion_temperature,
            http,
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for DeepSeekClient {
    async fn complete(&self, text: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request(text))
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("deepseek request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "deepseek completion failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("deepseek json error: {e}")))?;

        if let Some(usage) = v.get("usage") {
            debug!(%usage, "deepseek usage");
        }

        extract_content(&v)
    }
}

fn extract_content(v: &serde_json::Value) -> Result<String> {
    let text = v
        .pointer("/choices/0/message/content")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if text.is_empty() {
        return Err(Error::Upstream(
            "deepseek completion returned empty text".to_string(),
        ));
    }

    Ok(text)
}
