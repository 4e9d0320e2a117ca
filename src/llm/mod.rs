//! Text completion clients
//!
//! Classification, summarization, and answer synthesis all go through the
//! [`CompletionClient`] trait so the engine can be tested with doubles.
//! Structured (JSON) responses are parsed into a tagged result; callers
//! route parse failures through deterministic fallbacks instead of
//! guessing at partially-parsed fields.

mod openai;

pub use openai::*;

use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.3,
            max_tokens: 300,
            json_response: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json_response(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// Trait for completion providers
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate text for a prompt
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Outcome of parsing a structured completion response
#[derive(Debug)]
pub enum Structured<T> {
    Ok(T),
    ParseFailure(String),
}

/// Parse a completion response as JSON into `T`
///
/// Tolerates markdown code fences around the payload; anything else that
/// fails to deserialize becomes a [`Structured::ParseFailure`] carrying the
/// raw text so callers can apply their deterministic fallback.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Structured<T> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    match serde_json::from_str::<T>(stripped) {
        Ok(value) => Structured::Ok(value),
        Err(_) => Structured::ParseFailure(raw.to_string()),
    }
}
