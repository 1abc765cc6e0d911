//! AI room host.
//!
//! [`GenerativeTextClient`] speaks the `generateContent` JSON shape:
//! `POST {endpoint}/{model}:generateContent?key=...` with
//! `{"contents":[{"parts":[{"text":...}]}]}` and reads
//! `candidates[0].content.parts[*].text` from the response.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AiSettings;
use crate::error::AppError;

/// Produces the AI host's chat replies
#[async_trait]
pub trait AiHost: Send + Sync {
    async fn reply(&self, room_title: &str, prompt: &str) -> Result<String, AppError>;
}

/// Build the host for `settings`: the HTTP client when a key is configured,
/// the scripted fallback otherwise
pub fn from_settings(settings: &AiSettings) -> Result<Box<dyn AiHost>, AppError> {
    match &settings.api_key {
        Some(key) if !key.is_empty() => Ok(Box::new(GenerativeTextClient::new(settings, key.clone())?)),
        _ => Ok(Box::new(ScriptedHost)),
    }
}

pub struct GenerativeTextClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerativeTextClient {
    pub fn new(settings: &AiSettings, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Ai(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    fn instruction(room_title: &str, prompt: &str) -> String {
        format!(
            "You are the friendly host of a live voice chat room called \"{room_title}\". \
             Answer the listener in one or two short, upbeat sentences.\n\nListener: {prompt}"
        )
    }
}

#[async_trait]
impl AiHost for GenerativeTextClient {
    async fn reply(&self, room_title: &str, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/{}:generateContent", self.endpoint, self.model);
        debug!(model = %self.model, chars = prompt.len(), "calling generative text API");

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Self::instruction(room_title, prompt),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Ai(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Ai(format!("provider returned {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::Ai(format!("unreadable response: {e}")))?;
        extract_text(parsed)
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, AppError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Ai("provider returned no text".to_string()));
    }
    Ok(text.to_string())
}

/// Offline host used when no API key is configured
pub struct ScriptedHost;

#[async_trait]
impl AiHost for ScriptedHost {
    async fn reply(&self, room_title: &str, prompt: &str) -> Result<String, AppError> {
        let topic: String = prompt.split_whitespace().take(6).collect::<Vec<_>>().join(" ");
        Ok(format!(
            "Welcome to {room_title}! Great question about \"{topic}\". Grab a seat and tell everyone what you think."
        ))
    }
}
