//! Hermes bus gateway.
//!
//! Consumes inbound bus messages from a bounded channel, turns `say` requests
//! into [`SynthesisRequest`]s and each outcome into exactly one outbound
//! action:
//!
//! - audio + play command → local playback
//! - audio, no play command → `playBytes`, then wait for `playFinished`
//! - failure → `hermes/error/tts`
//!
//! Every `say` ends with `sayFinished` so the dialogue manager is never left
//! waiting. Requests run in their own tasks; the inbound loop never blocks on
//! synthesis.

use crate::bus::{topic_matches, BusMessage, Publisher};
use crate::config::ServiceConfig;
use crate::coordinator::{Audio, RequestCoordinator, SynthesisRequest};
use crate::hermes::{
    self, AudioPlayBytes, AudioPlayFinished, GetVoices, TtsError, TtsSay, TtsSayFinished, Voices,
};
use crate::player::PlayCommand;
use crate::utils::wav_duration;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Sites to answer for; empty means all
    pub site_ids: Vec<String>,
    pub play_finished_timeout_ms: u64,
    pub play_finished_slack_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            site_ids: Vec::new(),
            play_finished_timeout_ms: 30_000,
            play_finished_slack_ms: 1_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl From<&ServiceConfig> for GatewayConfig {
    fn from(cfg: &ServiceConfig) -> Self {
        Self {
            site_ids: cfg.site_ids.clone(),
            play_finished_timeout_ms: cfg.play_finished_timeout_ms,
            play_finished_slack_ms: cfg.play_finished_slack_ms,
            shutdown_grace_ms: cfg.shutdown_grace_ms,
        }
    }
}

pub struct BusGateway {
    coordinator: RequestCoordinator,
    publisher: Arc<dyn Publisher>,
    player: Option<PlayCommand>,
    cfg: GatewayConfig,
    // request id -> waiter for the matching playFinished
    play_waiters: DashMap<String, oneshot::Sender<()>>,
    // one local playback at a time
    play_lock: Mutex<()>,
}

impl BusGateway {
    pub fn new(
        coordinator: RequestCoordinator,
        publisher: Arc<dyn Publisher>,
        player: Option<PlayCommand>,
        cfg: GatewayConfig,
    ) -> Self {
        Self {
            coordinator,
            publisher,
            player,
            cfg,
            play_waiters: DashMap::new(),
            play_lock: Mutex::new(()),
        }
    }

    /// Topic filters the transport must subscribe to.
    pub fn topics() -> Vec<String> {
        vec![
            hermes::TTS_SAY.to_string(),
            hermes::PLAY_FINISHED_ANY.to_string(),
            hermes::GET_VOICES.to_string(),
        ]
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    fn services_site(&self, site_id: &str) -> bool {
        self.cfg.site_ids.is_empty() || self.cfg.site_ids.iter().any(|s| s == site_id)
    }

    /// Process inbound messages until the channel closes, then drain
    /// in-flight requests for up to `shutdown_grace_ms`.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<BusMessage>) {
        info!(target: "gateway", sites = ?self.cfg.site_ids, local_play = self.player.is_some(), "Gateway started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.dispatch(msg, &mut tasks),
                    None => break,
                },
                Some(res) = tasks.join_next(), if !tasks.is_empty() => log_join(res),
            }
        }

        info!(target: "gateway", in_flight = tasks.len(), "Inbound closed; draining requests");
        // Nothing will deliver playFinished anymore
        self.play_waiters.clear();

        let grace = Duration::from_millis(self.cfg.shutdown_grace_ms);
        let drained = timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                log_join(res);
            }
        })
        .await;
        if drained.is_err() {
            warn!(target: "gateway", remaining = tasks.len(), "Shutdown grace elapsed; aborting requests");
            tasks.abort_all();
        }
        info!(target: "gateway", "Gateway stopped");
    }

    // Must not await: the transport may be blocked feeding this loop
    fn dispatch(self: &Arc<Self>, msg: BusMessage, tasks: &mut JoinSet<()>) {
        if msg.topic == hermes::TTS_SAY {
            let say: TtsSay = match serde_json::from_slice(&msg.payload) {
                Ok(say) => say,
                Err(e) => {
                    warn!(target: "gateway", topic = %msg.topic, error = %e, "Malformed say message");
                    return;
                }
            };
            if !self.services_site(&say.site_id) {
                debug!(target: "gateway", site_id = %say.site_id, "Ignoring say for other site");
                return;
            }
            tasks.spawn(Arc::clone(self).handle_say(say));
        } else if topic_matches(hermes::PLAY_FINISHED_ANY, &msg.topic) {
            match serde_json::from_slice::<AudioPlayFinished>(&msg.payload) {
                Ok(finished) => self.handle_play_finished(&msg.topic, finished),
                Err(e) => {
                    warn!(target: "gateway", topic = %msg.topic, error = %e, "Malformed playFinished message")
                }
            }
        } else if msg.topic == hermes::GET_VOICES {
            match serde_json::from_slice::<GetVoices>(&msg.payload) {
                Ok(get) if self.services_site(&get.site_id) => {
                    tasks.spawn(Arc::clone(self).handle_get_voices(get));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "gateway", topic = %msg.topic, error = %e, "Malformed getVoices message")
                }
            }
        } else {
            debug!(target: "gateway", topic = %msg.topic, "Unexpected topic");
        }
    }

    async fn handle_say(self: Arc<Self>, say: TtsSay) {
        let request_id = say
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let request = SynthesisRequest {
            text: say.text,
            site_id: say.site_id,
            request_id: Some(request_id.clone()),
            session_id: say.session_id,
            language: say.lang,
        };
        info!(target: "gateway", site_id = %request.site_id, request_id = %request_id, text = %request.text, "Say");

        if request.text.trim().is_empty() {
            debug!(target: "gateway", request_id = %request_id, "Empty text; nothing to speak");
        } else {
            match self.coordinator.handle(&request).await {
                Ok(audio) => self.deliver(&request, &request_id, audio).await,
                Err(e) => {
                    let error = TtsError {
                        error: e.to_string(),
                        context: Some(request_id.clone()),
                        site_id: request.site_id.clone(),
                        session_id: request.session_id.clone(),
                    };
                    self.publish(error.to_message()).await;
                }
            }
        }

        let finished = TtsSayFinished {
            id: Some(request_id),
            site_id: request.site_id,
            session_id: request.session_id,
        };
        self.publish(finished.to_message()).await;
    }

    async fn deliver(&self, request: &SynthesisRequest, request_id: &str, audio: Audio) {
        if let Some(player) = &self.player {
            let _playing = self.play_lock.lock().await;
            match player.play(&audio.bytes).await {
                Ok(status) if status.success() => {
                    debug!(target: "gateway", request_id = %request_id, "Local playback finished")
                }
                Ok(status) => {
                    warn!(target: "gateway", request_id = %request_id, status = %status, "Play command failed")
                }
                Err(e) => {
                    warn!(target: "gateway", request_id = %request_id, error = %e, "Play command could not run")
                }
            }
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.play_waiters.insert(request_id.to_string(), tx);

        let wait = self.play_finished_wait(&audio.bytes);
        let play_bytes = AudioPlayBytes {
            site_id: request.site_id.clone(),
            request_id: request_id.to_string(),
            wav_bytes: audio.bytes.as_ref().clone(),
            sample_rate: audio.sample_rate,
        };
        debug!(
            target: "gateway",
            topic = %play_bytes.topic(),
            bytes = play_bytes.wav_bytes.len(),
            sample_rate = play_bytes.sample_rate,
            from_cache = audio.from_cache,
            "Publishing audio"
        );

        if self.publish(Ok(play_bytes.into_message())).await {
            match timeout(wait, rx).await {
                Ok(Ok(())) => debug!(target: "gateway", request_id = %request_id, "Audio played"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(target: "gateway", request_id = %request_id, wait_ms = wait.as_millis() as u64, "Timed out waiting for playFinished")
                }
            }
        }
        self.play_waiters.remove(request_id);
    }

    /// How long to wait for `playFinished`: audio length plus slack, capped.
    fn play_finished_wait(&self, wav: &[u8]) -> Duration {
        let cap = Duration::from_millis(self.cfg.play_finished_timeout_ms);
        match wav_duration(wav) {
            Some(d) => (d + Duration::from_millis(self.cfg.play_finished_slack_ms)).min(cap),
            None => cap,
        }
    }

    fn handle_play_finished(&self, topic: &str, finished: AudioPlayFinished) {
        let Some(id) = finished.id else {
            return;
        };
        if let Some((_, waiter)) = self.play_waiters.remove(&id) {
            debug!(target: "gateway", request_id = %id, site = ?hermes::site_from_play_finished(topic), "playFinished received");
            let _ = waiter.send(());
        }
    }

    async fn handle_get_voices(self: Arc<Self>, get: GetVoices) {
        let voices = Voices {
            voices: self
                .coordinator
                .voices()
                .into_iter()
                .map(Into::into)
                .collect(),
            id: get.id,
            site_id: get.site_id,
        };
        self.publish(voices.to_message()).await;
    }

    /// Best-effort publish. Returns whether the transport accepted the message.
    async fn publish(&self, message: crate::Result<BusMessage>) -> bool {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "gateway", error = %e, "Failed to encode outbound message");
                return false;
            }
        };
        let topic = message.topic.clone();
        match self.publisher.publish(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "gateway", topic = %topic, error = %e, "Publish failed");
                false
            }
        }
    }
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            warn!(target: "gateway", error = %e, "Request task panicked");
        }
    }
}
