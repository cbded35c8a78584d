//! Startup configuration.
//!
//! Everything here is fixed when the process starts. The bridge binary builds a
//! [`ServiceConfig`] from CLI flags and an optional TOML overlay, calls
//! [`ServiceConfig::validate`], and hands the pieces to the components.

use crate::{Result, WavenetError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_VOICE: &str = "Wavenet-C";
pub const DEFAULT_GENDER: &str = "FEMALE";
pub const DEFAULT_LANGUAGE_CODE: &str = "en-US";
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;
pub const DEFAULT_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Voice parameters sent to the synthesis API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Voice name, either short (`Wavenet-C`) or fully qualified (`en-US-Wavenet-C`)
    pub voice: String,
    /// SSML gender (`FEMALE`, `MALE`, `NEUTRAL`)
    pub gender: String,
    pub language_code: String,
    pub sample_rate: u32,
    /// Synthesize endpoint
    pub url: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            gender: DEFAULT_GENDER.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            url: DEFAULT_URL.to_string(),
        }
    }
}

impl VoiceConfig {
    /// Fully qualified Wavenet voice name, e.g. `en-US-Wavenet-C`.
    pub fn voice_name(&self) -> String {
        let prefix = format!("{}-", self.language_code);
        if self.voice.starts_with(&prefix) {
            self.voice.clone()
        } else {
            format!("{}{}", prefix, self.voice)
        }
    }

    /// Copy of this config with the language code replaced, if `language` is non-empty.
    pub fn with_language(&self, language: Option<&str>) -> VoiceConfig {
        match language.map(str::trim).filter(|l| !l.is_empty()) {
            Some(lang) if lang != self.language_code => VoiceConfig {
                language_code: lang.to_string(),
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

/// Process-wide service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Google service-account credentials JSON
    pub credentials_json: PathBuf,
    /// Directory holding cached WAV files
    pub cache_dir: PathBuf,
    pub voice: VoiceConfig,
    /// Shell command that plays WAV data from stdin. When unset, audio is
    /// published as `playBytes` instead.
    pub play_command: Option<String>,
    /// Sites this service answers for; empty means all sites
    pub site_ids: Vec<String>,
    pub synthesis_timeout_ms: u64,
    /// Upper bound on how long to wait for `playFinished`
    pub play_finished_timeout_ms: u64,
    /// Added to the audio duration when waiting for `playFinished`
    pub play_finished_slack_ms: u64,
    /// How long shutdown waits for in-flight requests
    pub shutdown_grace_ms: u64,
}

impl ServiceConfig {
    pub fn new(credentials_json: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials_json: credentials_json.into(),
            cache_dir: cache_dir.into(),
            voice: VoiceConfig::default(),
            play_command: None,
            site_ids: Vec::new(),
            synthesis_timeout_ms: 10_000,
            play_finished_timeout_ms: 30_000,
            play_finished_slack_ms: 1_000,
            shutdown_grace_ms: 5_000,
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.credentials_json.is_file() {
            return Err(WavenetError::Config(format!(
                "credentials file not found: {}",
                self.credentials_json.display()
            )));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(WavenetError::Config("cache directory is empty".into()));
        }
        if self.cache_dir.exists() && !self.cache_dir.is_dir() {
            return Err(WavenetError::Config(format!(
                "cache path is not a directory: {}",
                self.cache_dir.display()
            )));
        }
        if self.synthesis_timeout_ms == 0 {
            return Err(WavenetError::Config(
                "synthesis timeout must be greater than zero".into(),
            ));
        }
        if self.voice.sample_rate == 0 {
            return Err(WavenetError::Config(
                "sample rate must be greater than zero".into(),
            ));
        }
        if self.voice.voice.trim().is_empty() || self.voice.language_code.trim().is_empty() {
            return Err(WavenetError::Config(
                "voice and language code are required".into(),
            ));
        }
        reqwest::Url::parse(&self.voice.url).map_err(|e| {
            WavenetError::Config(format!("invalid synthesis url {}: {}", self.voice.url, e))
        })?;
        if let Some(cmd) = &self.play_command {
            if cmd.trim().is_empty() {
                return Err(WavenetError::Config("play command is empty".into()));
            }
        }
        Ok(())
    }
}
