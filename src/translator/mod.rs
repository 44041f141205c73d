//! Translation backend adapter.
//!
//! Sends one chat-completion request per (text, language) pair to an
//! OpenAI-compatible endpoint and turns the model's free-form answer into a
//! typed [`TranslationResult`].

mod parser;

pub use parser::parse_translation;

use crate::config::Config;
use crate::retry::{RetryPolicy, Retryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub translated_text: String,
    /// English-letter approximation of how the translation sounds
    pub phonetic_rendering: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// Transport failure (`status: None`) or a non-success HTTP status
    #[error("translation backend error ({}): {message}", .status.map_or_else(|| "network".to_string(), |s| s.to_string()))]
    Backend { status: Option<u16>, message: String },

    #[error("translation backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("unusable translation response: {0}")]
    Parse(String),
}

impl Retryable for TranslateError {
    /// Network errors, timeouts, 429 and 5xx are transient; other 4xx and
    /// unusable content are not.
    fn is_retryable(&self) -> bool {
        match self {
            TranslateError::Backend { status: None, .. } => true,
            TranslateError::Backend {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            TranslateError::Timeout(_) => true,
            TranslateError::Parse(_) => false,
        }
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        source_text: &str,
        target_language: &str,
    ) -> Result<TranslationResult, TranslateError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = r#"You are an expert linguistic assistant specializing in phonetic transliteration of translations.
First translate the given English text into the requested target language, then give a Romanized (English letter) phonetic rendering of THAT TRANSLATION, optimized for pronunciation by a native English speaker.

Answer with exactly two lines and nothing else:
Translation: <the translation, in the target language's own script>
Phonetic: <the English-letter pronunciation of the translation>

Examples:

'Good morning' in Spanish
Translation: Buenos días
Phonetic: BWAY-nohs DEE-ahs

'Hello' in Tamil
Translation: வணக்கம்
Phonetic: Vanakkam

'Thank you' in Japanese
Translation: ありがとう
Phonetic: Ah-ree-gah-toh

'Goodbye' in French
Translation: Au revoir
Phonetic: Oh ruh-vwahr

Rules:
- The Phonetic line uses only English letters, spaces, hyphens and punctuation
- No syllable-by-syllable breakdowns, explanations, notes or alternatives
- Never add extra lines"#;

fn build_user_prompt(source_text: &str, target_language: &str) -> String {
    format!(
        "Translate the following English text into {} and give its phonetic rendering:\n\"{}\"",
        target_language, source_text
    )
}

/// OpenAI-compatible chat-completions client (Gemini, OpenAI, ...).
pub struct TranslationClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl TranslationClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            retry: RetryPolicy::translation(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.translation_api_url,
            &config.translation_api_key,
            &config.translation_model,
            config.translation_timeout,
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, system: &str, user: String, max_tokens: u32) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            max_tokens,
            temperature: 0.1,
        }
    }

    /// One HTTP round trip; returns the first choice's text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, TranslateError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(TranslateError::Backend {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TranslateError::Timeout(self.timeout)
            } else {
                TranslateError::Parse(format!("malformed response envelope: {}", e))
            }
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| TranslateError::Parse("response contained no content".to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> TranslateError {
        if e.is_timeout() {
            TranslateError::Timeout(self.timeout)
        } else {
            TranslateError::Backend {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }

    /// Startup connectivity check; returns the model's reply.
    pub async fn check_connection(&self) -> Result<String, TranslateError> {
        let request = self.request(
            "You are a helpful assistant.",
            "Say 'API connection successful' in one short sentence.".to_string(),
            20,
        );
        self.complete(&request).await
    }
}

#[async_trait]
impl Translator for TranslationClient {
    async fn translate(
        &self,
        source_text: &str,
        target_language: &str,
    ) -> Result<TranslationResult, TranslateError> {
        let request = self.request(
            SYSTEM_PROMPT,
            build_user_prompt(source_text, target_language),
            300,
        );

        let request = &request;
        let result = self
            .retry
            .run(&format!("Translation to {}", target_language), move || async move {
                let raw = self.complete(request).await?;
                debug!("Raw translation response for {}: {}", target_language, raw);
                parse_translation(&raw)
            })
            .await?;

        info!(
            "Translated to {}: '{}' ({})",
            target_language, result.translated_text, result.phonetic_rendering
        );
        Ok(result)
    }
}
