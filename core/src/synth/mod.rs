//! Speech synthesis capability
//!
//! [`Synthesizer`] is the seam between the request coordinator and whatever
//! turns text into audio. The production implementation is [`WavenetClient`],
//! which calls the Google Cloud Text-to-Speech REST API with a bearer token
//! from a [`TokenSource`].
//!
//! A synthesizer makes exactly one attempt per call. Retrying is not its job.

mod auth;
mod wavenet;

pub use auth::{ServiceAccountKey, ServiceAccountTokenSource, StaticTokenSource, TokenSource};
pub use wavenet::WavenetClient;

use crate::config::VoiceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a synthesis attempt failed.
///
/// `Clone` so that one failure can be handed to every request waiting on the
/// same in-flight synthesis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("synthesis API returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("synthesis request timed out after {0} ms")]
    Timeout(u64),

    #[error("synthesis transport error: {0}")]
    Transport(String),

    #[error("invalid synthesis response: {0}")]
    InvalidResponse(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("synthesis aborted before completion")]
    Aborted,
}

impl SynthesisError {
    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SynthesisError::Http { .. } => "http",
            SynthesisError::Timeout(_) => "timeout",
            SynthesisError::Transport(_) => "transport",
            SynthesisError::InvalidResponse(_) => "invalid_response",
            SynthesisError::Auth(_) => "auth",
            SynthesisError::Aborted => "aborted",
        }
    }
}

/// A voice the service can speak with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` and return WAV bytes.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError>;

    /// Voices available for `voice`'s configuration.
    fn voices(&self, voice: &VoiceConfig) -> Vec<Voice> {
        vec![Voice {
            voice_id: voice.voice_name(),
            description: Some(format!("{} {}", voice.language_code, voice.gender)),
        }]
    }
}
