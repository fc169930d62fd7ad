//! Blocking client for OpenAI-compatible chat completion endpoints
//! (Groq by default).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ExplanationConfig;
use crate::explain::prompts::{build_user_prompt, SYSTEM_PROMPT};
use crate::explain::{ExplainError, ExplanationProvider};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatCompletionClient {
    http: reqwest::blocking::Client,
    api_key: String,
    config: ExplanationConfig,
}

impl ChatCompletionClient {
    /// Build a client from config, reading the API key from the
    /// environment variable named by `api_key_env`.
    pub fn from_config(config: &ExplanationConfig) -> Result<Self, ExplainError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => return Err(ExplainError::MissingApiKey(config.api_key_env.clone())),
        };

        Self::new(config.clone(), api_key)
    }

    pub fn new(config: ExplanationConfig, api_key: String) -> Result<Self, ExplainError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key,
            config,
        })
    }

    /// Pull the assistant text out of a completion body.
    fn content_of(response: ChatResponse) -> Result<String, ExplainError> {
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ExplainError::EmptyContent)
    }
}

impl ExplanationProvider for ChatCompletionClient {
    fn explain(&self, job_description: &str, resume_text: &str) -> Result<String, ExplainError> {
        let prompt = build_user_prompt(job_description, resume_text, self.config.max_resume_chars);

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        log::debug!(
            "Requesting explanation from {} (model {})",
            self.config.api_url,
            self.config.model
        );

        let resp = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(ExplainError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Self::content_of(resp.json::<ChatResponse>()?)
    }
}
