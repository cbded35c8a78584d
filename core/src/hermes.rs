//! Hermes protocol messages handled by the TTS service.
//!
//! JSON field names follow the Hermes wire format (camelCase).

use crate::bus::BusMessage;
use crate::synth::Voice;
use crate::Result;
use serde::{Deserialize, Serialize};

pub const TTS_SAY: &str = "hermes/tts/say";
pub const TTS_SAY_FINISHED: &str = "hermes/tts/sayFinished";
pub const TTS_ERROR: &str = "hermes/error/tts";
pub const GET_VOICES: &str = "rhasspy/tts/getVoices";
pub const VOICES: &str = "rhasspy/tts/voices";
/// Subscription filter for `playFinished` on any site
pub const PLAY_FINISHED_ANY: &str = "hermes/audioServer/+/playFinished";

pub const DEFAULT_SITE_ID: &str = "default";

fn default_site_id() -> String {
    DEFAULT_SITE_ID.to_string()
}

/// `hermes/audioServer/<siteId>/playBytes/<requestId>`
pub fn play_bytes_topic(site_id: &str, request_id: &str) -> String {
    format!("hermes/audioServer/{}/playBytes/{}", site_id, request_id)
}

/// `hermes/audioServer/<siteId>/playFinished`
pub fn play_finished_topic(site_id: &str) -> String {
    format!("hermes/audioServer/{}/playFinished", site_id)
}

/// Site id embedded in a `playFinished` topic.
pub fn site_from_play_finished(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("hermes/audioServer/")?;
    let site = rest.strip_suffix("/playFinished")?;
    (!site.is_empty() && !site.contains('/')).then_some(site)
}

/// Request to speak a sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsSay {
    pub text: String,
    #[serde(default = "default_site_id")]
    pub site_id: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

/// Sent once a `say` request is complete, successful or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsSayFinished {
    pub id: Option<String>,
    pub site_id: String,
    pub session_id: Option<String>,
}

impl TtsSayFinished {
    pub fn to_message(&self) -> Result<BusMessage> {
        BusMessage::json(TTS_SAY_FINISHED, self)
    }
}

/// Error report for a failed `say`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsError {
    pub error: String,
    /// Request id the error belongs to
    pub context: Option<String>,
    pub site_id: String,
    pub session_id: Option<String>,
}

impl TtsError {
    pub fn to_message(&self) -> Result<BusMessage> {
        BusMessage::json(TTS_ERROR, self)
    }
}

/// WAV audio for the audio server of one site
#[derive(Debug, Clone)]
pub struct AudioPlayBytes {
    pub site_id: String,
    pub request_id: String,
    pub wav_bytes: Vec<u8>,
    /// Informational; the WAV header is authoritative
    pub sample_rate: u32,
}

impl AudioPlayBytes {
    pub fn topic(&self) -> String {
        play_bytes_topic(&self.site_id, &self.request_id)
    }

    pub fn into_message(self) -> BusMessage {
        BusMessage::new(self.topic(), self.wav_bytes)
    }
}

/// Audio server finished playing a `playBytes` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPlayFinished {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_site_id")]
    pub site_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AudioPlayFinished {
    pub fn to_message(&self) -> Result<BusMessage> {
        BusMessage::json(play_finished_topic(&self.site_id), self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVoices {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_site_id")]
    pub site_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInfo {
    pub voice_id: String,
    pub description: Option<String>,
}

impl From<Voice> for VoiceInfo {
    fn from(v: Voice) -> Self {
        Self {
            voice_id: v.voice_id,
            description: v.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voices {
    pub voices: Vec<VoiceInfo>,
    pub id: Option<String>,
    pub site_id: String,
}

impl Voices {
    pub fn to_message(&self) -> Result<BusMessage> {
        BusMessage::json(VOICES, self)
    }
}
