#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wavenet_core::config::VoiceConfig;
use wavenet_core::{SynthesisError, Synthesizer};

/// Minimal mono 16-bit WAV holding `samples` frames of silence.
pub fn silent_wav(sample_rate: u32, samples: usize) -> Vec<u8> {
    let data_len = (samples * 2) as u32;
    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.resize(44 + data_len as usize, 0);
    wav
}

/// Scripted synthesizer that counts calls
pub struct MockSynthesizer {
    calls: AtomicUsize,
    delay: Duration,
    result: Mutex<Result<Vec<u8>, SynthesisError>>,
    texts: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn ok(audio: Vec<u8>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Mutex::new(Ok(audio)),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: SynthesisError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Mutex::new(Err(error)),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_result(&self, result: Result<Vec<u8>, SynthesisError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.lock().unwrap().clone()
    }
}

pub fn shared(mock: MockSynthesizer) -> Arc<MockSynthesizer> {
    Arc::new(mock)
}
