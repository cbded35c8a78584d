//! Request coordinator: cache lookup, synthesis, in-flight deduplication.
//!
//! `handle` resolves one [`SynthesisRequest`] into exactly one
//! [`SynthesisOutcome`]:
//!
//! 1. fingerprint (text + effective voice) → [`CacheKey`]
//! 2. cache hit → audio, no network call
//! 3. miss → join the in-flight synthesis for that key, or start one
//!
//! A started synthesis runs in its own task and reports through a `watch`
//! channel, so every request that joined it sees the same outcome even if
//! the request that started it goes away. Successful audio is written to the
//! cache before the in-flight entry is released; failures are never cached
//! and are shared with whoever was waiting, not retried.

use crate::cache::{AudioCache, CacheKey};
use crate::config::VoiceConfig;
use crate::synth::{SynthesisError, Synthesizer, Voice};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A request to speak `text` on `site_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub site_id: String,
    /// Echoed back on outbound messages for correlation
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    /// Per-request language override (Hermes `lang`)
    pub language: Option<String>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            site_id: site_id.into(),
            request_id: None,
            session_id: None,
            language: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Synthesized (or cached) audio
#[derive(Debug, Clone)]
pub struct Audio {
    /// WAV bytes, shared between requests that joined the same synthesis
    pub bytes: Arc<Vec<u8>>,
    pub sample_rate: u32,
    pub from_cache: bool,
}

pub type SynthesisOutcome = std::result::Result<Audio, SynthesisError>;

type Slot = watch::Sender<Option<SynthesisOutcome>>;

struct Inner {
    voice: VoiceConfig,
    cache: AudioCache,
    synthesizer: Arc<dyn Synthesizer>,
    in_flight: DashMap<CacheKey, Slot>,
}

/// Resolves synthesis requests against the cache and the synthesizer
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    pub fn new(voice: VoiceConfig, cache: AudioCache, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                voice,
                cache,
                synthesizer,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn voice(&self) -> &VoiceConfig {
        &self.inner.voice
    }

    pub fn cache(&self) -> &AudioCache {
        &self.inner.cache
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.inner.synthesizer.voices(&self.inner.voice)
    }

    /// Number of syntheses currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Cache key `request` resolves to.
    pub fn key_for(&self, request: &SynthesisRequest) -> CacheKey {
        let voice = self.inner.voice.with_language(request.language.as_deref());
        CacheKey::new(&request.text, &voice)
    }

    pub async fn handle(&self, request: &SynthesisRequest) -> SynthesisOutcome {
        let voice = self.inner.voice.with_language(request.language.as_deref());
        let key = CacheKey::new(&request.text, &voice);

        if let Some(bytes) = self.inner.read_cache(&key).await {
            info!(target: "coordinator", key = %key, site_id = %request.site_id, "Serving audio from cache");
            return Ok(Audio {
                bytes: Arc::new(bytes),
                sample_rate: voice.sample_rate,
                from_cache: true,
            });
        }

        let mut rx = self.join_or_start(key, request.text.clone(), voice);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(SynthesisError::Aborted))
    }

    fn join_or_start(
        &self,
        key: CacheKey,
        text: String,
        voice: VoiceConfig,
    ) -> watch::Receiver<Option<SynthesisOutcome>> {
        match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => {
                debug!(target: "coordinator", key = %key, "Joining in-flight synthesis");
                slot.get().subscribe()
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(tx);
                let guard = InFlightGuard {
                    inner: Arc::clone(&self.inner),
                    key: Some(key),
                };
                tokio::spawn(guard.run(text, voice));
                rx
            }
        }
    }
}

impl Inner {
    /// Cache read; I/O errors degrade to a miss.
    async fn read_cache(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(target: "coordinator", key = %key, error = %e, "Cache read failed; treating as miss");
                None
            }
        }
    }

    async fn synthesize_or_reuse(
        &self,
        key: &CacheKey,
        text: &str,
        voice: &VoiceConfig,
    ) -> SynthesisOutcome {
        // A previous synthesis may have landed between the caller's lookup and
        // claiming the slot
        if let Some(bytes) = self.read_cache(key).await {
            return Ok(Audio {
                bytes: Arc::new(bytes),
                sample_rate: voice.sample_rate,
                from_cache: true,
            });
        }

        let started = Instant::now();
        match self.synthesizer.synthesize(text, voice).await {
            Ok(bytes) => {
                info!(
                    target: "coordinator",
                    key = %key,
                    bytes = bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Synthesized audio"
                );
                if let Err(e) = self.cache.put(key, &bytes).await {
                    warn!(target: "coordinator", key = %key, error = %e, "Failed to cache audio");
                }
                Ok(Audio {
                    bytes: Arc::new(bytes),
                    sample_rate: voice.sample_rate,
                    from_cache: false,
                })
            }
            Err(e) => {
                warn!(target: "coordinator", key = %key, kind = e.kind(), error = %e, "Synthesis failed");
                Err(e)
            }
        }
    }
}

/// Owns one in-flight slot. Dropping it without completing (panic, runtime
/// shutdown) releases the slot, and waiters resolve to `Aborted`.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: Option<CacheKey>,
}

impl InFlightGuard {
    async fn run(mut self, text: String, voice: VoiceConfig) {
        let Some(key) = self.key.clone() else {
            return;
        };
        let outcome = self.inner.synthesize_or_reuse(&key, &text, &voice).await;
        self.key = None;
        if let Some((_, slot)) = self.inner.in_flight.remove(&key) {
            slot.send_replace(Some(outcome));
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            warn!(target: "coordinator", key = %key, "In-flight synthesis dropped before completing");
            self.inner.in_flight.remove(&key);
        }
    }
}
