use super::{ServiceAccountTokenSource, SynthesisError, Synthesizer, TokenSource};
use crate::config::VoiceConfig;
use crate::{Result, WavenetError};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const AUDIO_ENCODING: &str = "LINEAR16";
const USER_AGENT: &str = "rhasspy-tts-wavenet-hermes/0.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum SynthesisInput<'a> {
    Text(&'a str),
    Ssml(&'a str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: String,
    ssml_gender: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    sample_rate_hertz: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Google Cloud Text-to-Speech (Wavenet) client
pub struct WavenetClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    timeout_ms: u64,
}

impl WavenetClient {
    pub fn new(tokens: Arc<dyn TokenSource>, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| WavenetError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            tokens,
            timeout_ms,
        })
    }

    /// Client authenticated with a service-account credentials file.
    pub fn from_credentials_file<P: AsRef<Path>>(path: P, timeout_ms: u64) -> Result<Self> {
        let tokens = ServiceAccountTokenSource::from_file(path, timeout_ms)?;
        Self::new(Arc::new(tokens), timeout_ms)
    }

    fn map_send_error(&self, e: reqwest::Error) -> SynthesisError {
        if e.is_timeout() {
            SynthesisError::Timeout(self.timeout_ms)
        } else {
            SynthesisError::Transport(e.to_string())
        }
    }
}

fn synthesis_input(text: &str) -> SynthesisInput<'_> {
    if text.trim_start().starts_with("<speak>") {
        SynthesisInput::Ssml(text)
    } else {
        SynthesisInput::Text(text)
    }
}

#[async_trait]
impl Synthesizer for WavenetClient {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> std::result::Result<Vec<u8>, SynthesisError> {
        let token = self.tokens.token().await?;
        let body = SynthesizeRequest {
            input: synthesis_input(text),
            voice: VoiceSelection {
                language_code: &voice.language_code,
                name: voice.voice_name(),
                ssml_gender: &voice.gender,
            },
            audio_config: AudioConfig {
                audio_encoding: AUDIO_ENCODING,
                sample_rate_hertz: voice.sample_rate,
            },
        };

        debug!(target: "wavenet", voice = %body.voice.name, sample_rate = voice.sample_rate, chars = text.len(), "Calling synthesis API");
        let response = self
            .http
            .post(&voice.url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "wavenet", status = %status, "Synthesis API returned error");
            return Err(SynthesisError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SynthesizeResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SynthesisError::Timeout(self.timeout_ms)
            } else {
                SynthesisError::InvalidResponse(e.to_string())
            }
        })?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| SynthesisError::InvalidResponse(format!("audioContent: {}", e)))?;
        if audio.is_empty() {
            return Err(SynthesisError::InvalidResponse(
                "empty audioContent".to_string(),
            ));
        }
        Ok(audio)
    }
}
