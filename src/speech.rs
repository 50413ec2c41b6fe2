//! Remote text-to-speech collaborator.
//!
//! The rest of the crate only sees [`SpeechGenerator`]: text in, base64 PCM
//! out. [`GeminiClient`] is the production implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SpeechError {
    /// The service rejected the API key.
    #[error("API key not valid: {0}")]
    InvalidCredential(String),

    /// The call succeeded but carried no audio payload.
    #[error("Received no audio data")]
    NoAudio,

    /// Connect, timeout or body read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success response not attributable to the credential.
    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },
}

impl SpeechError {
    pub fn is_credential_problem(&self) -> bool {
        matches!(self, SpeechError::InvalidCredential(_))
    }
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        SpeechError::Transport(err.to_string())
    }
}

/// Authorization credential. `Debug` never prints the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    /// Synthesize `text`, returning base64-encoded raw PCM.
    async fn generate(&self, text: &str, key: &ApiKey) -> Result<String, SpeechError>;
}

// ======================== Gemini wire types ========================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

// 不指定 voiceName，由服务端根据文本自动选择语言和音色
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn build_request(text: &str) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Content {
            parts: vec![TextPart { text }],
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO"],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: serde_json::Map::new(),
                },
            },
        },
    }
}

/// Turn an HTTP status and body into audio or a classified failure.
fn parse_response(status: StatusCode, body: &str) -> Result<String, SpeechError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.trim().to_string());

        let key_rejected = message.contains("API key not valid")
            || message.contains("Requested entity was not found")
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN;

        if key_rejected {
            return Err(SpeechError::InvalidCredential(message));
        }
        return Err(SpeechError::Service {
            status: status.as_u16(),
            message,
        });
    }

    let response: GenerateResponse = serde_json::from_str(body).map_err(|e| SpeechError::Service {
        status: status.as_u16(),
        message: format!("JSON parse error: {}", e),
    })?;

    // candidates[0].content.parts[0].inlineData.data
    let data = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.inline_data)
        .and_then(|d| d.data);

    match data {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(SpeechError::NoAudio),
    }
}

pub struct GeminiClient {
    client: Client,
    endpoint: Url,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base_url)?
            .join(&format!("v1beta/models/{}:generateContent", model))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(
            config.api_base_url,
            config.tts_model,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SpeechGenerator for GeminiClient {
    async fn generate(&self, text: &str, key: &ApiKey) -> Result<String, SpeechError> {
        log::info!("Requesting speech from {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", key.expose())
            .header("Content-Type", "application/json")
            .json(&build_request(text))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        log::debug!("Gemini responded {} with {} bytes", status, body.len());

        parse_response(status, &body)
    }
}
