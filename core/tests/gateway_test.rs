mod common;

use common::{shared, silent_wav, MockSynthesizer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wavenet_core::bus::topic_matches;
use wavenet_core::config::VoiceConfig;
use wavenet_core::{
    AudioCache, BusGateway, BusMessage, GatewayConfig, MessageBus, PlayCommand,
    RequestCoordinator, SynthesisError,
};

struct Harness {
    bus: MessageBus,
    mock: Arc<MockSynthesizer>,
    events: mpsc::Receiver<BusMessage>,
    gateway_sub: String,
    gateway: JoinHandle<()>,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn start(mock: MockSynthesizer, cfg: GatewayConfig, player: Option<PlayCommand>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mock = shared(mock);
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let coordinator = RequestCoordinator::new(VoiceConfig::default(), cache, mock.clone());

        let bus = MessageBus::new();
        let (gateway_sub, inbound) = bus.subscribe(BusGateway::topics(), 64);
        let (_, events) = bus.subscribe(
            vec![
                "hermes/tts/sayFinished".into(),
                "hermes/error/#".into(),
                "hermes/audioServer/+/playBytes/+".into(),
                "rhasspy/tts/voices".into(),
            ],
            64,
        );

        let gateway = Arc::new(BusGateway::new(
            coordinator,
            Arc::new(bus.clone()),
            player,
            cfg,
        ));
        let handle = tokio::spawn(gateway.run(inbound));

        Self {
            bus,
            mock,
            events,
            gateway_sub,
            gateway: handle,
            dir,
        }
    }

    async fn send(&self, topic: &str, body: Value) {
        self.bus
            .dispatch(BusMessage::new(topic, serde_json::to_vec(&body).unwrap()))
            .await;
    }

    async fn next(&mut self) -> BusMessage {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for message")
            .expect("bus closed")
    }

    async fn quiet(&mut self, wait: Duration) -> bool {
        timeout(wait, self.events.recv()).await.is_err()
    }

    fn cached_files(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "wav").unwrap_or(false))
            .count()
    }
}

fn json_of(msg: &BusMessage) -> Value {
    serde_json::from_slice(&msg.payload).expect("json payload")
}

fn patient() -> GatewayConfig {
    GatewayConfig {
        play_finished_timeout_ms: 10_000,
        play_finished_slack_ms: 10_000,
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn say_publishes_audio_and_finishes_after_play_finished() {
    let wav = silent_wav(22_050, 2_205);
    let mut h = Harness::start(MockSynthesizer::ok(wav.clone()), patient(), None).await;

    h.send(
        "hermes/tts/say",
        json!({"text": "Good morning", "siteId": "kitchen", "id": "r1", "sessionId": "s1"}),
    )
    .await;

    let play = h.next().await;
    assert_eq!(play.topic, "hermes/audioServer/kitchen/playBytes/r1");
    assert_eq!(play.payload, wav);
    assert_eq!(h.cached_files(), 1);

    // Still waiting on the audio server
    assert!(h.quiet(Duration::from_millis(200)).await);

    h.send(
        "hermes/audioServer/kitchen/playFinished",
        json!({"id": "r1", "siteId": "kitchen"}),
    )
    .await;

    let finished = h.next().await;
    assert_eq!(finished.topic, "hermes/tts/sayFinished");
    let body = json_of(&finished);
    assert_eq!(body["id"], "r1");
    assert_eq!(body["siteId"], "kitchen");
    assert_eq!(body["sessionId"], "s1");
    assert_eq!(h.mock.calls(), 1);
}

#[tokio::test]
async fn repeated_say_is_served_from_cache() {
    let wav = silent_wav(22_050, 100);
    let cfg = GatewayConfig {
        play_finished_slack_ms: 50,
        ..GatewayConfig::default()
    };
    let mut h = Harness::start(MockSynthesizer::ok(wav.clone()), cfg, None).await;

    for id in ["r1", "r2"] {
        h.send(
            "hermes/tts/say",
            json!({"text": "Good morning", "siteId": "kitchen", "id": id}),
        )
        .await;
        let play = h.next().await;
        assert_eq!(play.topic, format!("hermes/audioServer/kitchen/playBytes/{}", id));
        assert_eq!(play.payload, wav);
        let finished = h.next().await;
        assert_eq!(finished.topic, "hermes/tts/sayFinished");
        assert_eq!(json_of(&finished)["id"], id);
    }
    assert_eq!(h.mock.calls(), 1);
    assert_eq!(h.cached_files(), 1);
}

#[tokio::test]
async fn synthesis_failure_reports_error_then_finishes() {
    let mock = MockSynthesizer::failing(SynthesisError::Http {
        status: 500,
        body: "backend error".into(),
    });
    let mut h = Harness::start(mock, GatewayConfig::default(), None).await;

    h.send(
        "hermes/tts/say",
        json!({"text": "Good morning", "siteId": "kitchen", "id": "r1"}),
    )
    .await;

    let error = h.next().await;
    assert_eq!(error.topic, "hermes/error/tts");
    let body = json_of(&error);
    assert_eq!(body["context"], "r1");
    assert_eq!(body["siteId"], "kitchen");
    assert!(body["error"].as_str().unwrap().contains("500"));

    let finished = h.next().await;
    assert_eq!(finished.topic, "hermes/tts/sayFinished");
    assert_eq!(json_of(&finished)["id"], "r1");
    assert_eq!(h.cached_files(), 0);
}

#[tokio::test]
async fn other_sites_are_ignored() {
    let cfg = GatewayConfig {
        site_ids: vec!["kitchen".into()],
        ..GatewayConfig::default()
    };
    let mut h = Harness::start(MockSynthesizer::ok(silent_wav(22_050, 10)), cfg, None).await;

    h.send(
        "hermes/tts/say",
        json!({"text": "Good morning", "siteId": "garage", "id": "r1"}),
    )
    .await;

    assert!(h.quiet(Duration::from_millis(300)).await);
    assert_eq!(h.mock.calls(), 0);
}

#[tokio::test]
async fn empty_text_only_finishes() {
    let mut h = Harness::start(
        MockSynthesizer::ok(silent_wav(22_050, 10)),
        GatewayConfig::default(),
        None,
    )
    .await;

    h.send("hermes/tts/say", json!({"text": "  ", "id": "r1"})).await;

    let finished = h.next().await;
    assert_eq!(finished.topic, "hermes/tts/sayFinished");
    assert_eq!(json_of(&finished)["siteId"], "default");
    assert_eq!(h.mock.calls(), 0);
}

#[tokio::test]
async fn missing_id_is_generated_and_echoed() {
    let cfg = GatewayConfig {
        play_finished_slack_ms: 50,
        ..GatewayConfig::default()
    };
    let mut h = Harness::start(MockSynthesizer::ok(silent_wav(22_050, 10)), cfg, None).await;

    h.send("hermes/tts/say", json!({"text": "Hello", "siteId": "kitchen"})).await;

    let play = h.next().await;
    let request_id = play
        .topic
        .strip_prefix("hermes/audioServer/kitchen/playBytes/")
        .expect("playBytes topic")
        .to_string();
    assert!(!request_id.is_empty());

    let finished = h.next().await;
    assert_eq!(json_of(&finished)["id"], request_id.as_str());
}

#[tokio::test]
async fn malformed_message_is_dropped() {
    let cfg = GatewayConfig {
        play_finished_slack_ms: 50,
        ..GatewayConfig::default()
    };
    let mut h = Harness::start(MockSynthesizer::ok(silent_wav(22_050, 10)), cfg, None).await;

    h.bus
        .dispatch(BusMessage::new("hermes/tts/say", b"not json".to_vec()))
        .await;
    h.send("hermes/tts/say", json!({"siteId": "kitchen"})).await;
    h.send("hermes/tts/say", json!({"text": "Hello", "id": "ok"})).await;

    let play = h.next().await;
    assert!(topic_matches("hermes/audioServer/default/playBytes/ok", &play.topic));
    assert_eq!(h.mock.calls(), 1);
}

#[tokio::test]
async fn play_command_plays_locally() {
    let wav = silent_wav(22_050, 100);
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("played.wav");
    let player = PlayCommand::new(format!("cat > '{}'", out.display()));
    let mut h = Harness::start(
        MockSynthesizer::ok(wav.clone()),
        GatewayConfig::default(),
        Some(player),
    )
    .await;

    h.send(
        "hermes/tts/say",
        json!({"text": "Good morning", "siteId": "kitchen", "id": "r1"}),
    )
    .await;

    // No playBytes: the first thing out is sayFinished
    let finished = h.next().await;
    assert_eq!(finished.topic, "hermes/tts/sayFinished");
    assert_eq!(std::fs::read(&out).unwrap(), wav);
}

#[tokio::test]
async fn get_voices_is_answered() {
    let mut h = Harness::start(
        MockSynthesizer::ok(silent_wav(22_050, 10)),
        GatewayConfig::default(),
        None,
    )
    .await;

    h.send("rhasspy/tts/getVoices", json!({"id": "v1", "siteId": "kitchen"})).await;

    let voices = h.next().await;
    assert_eq!(voices.topic, "rhasspy/tts/voices");
    let body = json_of(&voices);
    assert_eq!(body["id"], "v1");
    assert_eq!(body["siteId"], "kitchen");
    assert_eq!(body["voices"][0]["voiceId"], "en-US-Wavenet-C");
}

#[tokio::test]
async fn closing_inbound_stops_gateway() {
    let h = Harness::start(
        MockSynthesizer::ok(silent_wav(22_050, 10)),
        GatewayConfig::default(),
        None,
    )
    .await;

    h.bus.unsubscribe(&h.gateway_sub);
    timeout(Duration::from_secs(2), h.gateway)
        .await
        .expect("gateway did not stop")
        .unwrap();
}

#[tokio::test]
async fn shutdown_releases_pending_play_wait() {
    let mut h = Harness::start(
        MockSynthesizer::ok(silent_wav(22_050, 10)),
        patient(),
        None,
    )
    .await;

    h.send("hermes/tts/say", json!({"text": "Hello", "id": "r1"})).await;
    assert!(h.next().await.topic.contains("/playBytes/"));

    h.bus.unsubscribe(&h.gateway_sub);
    let finished = h.next().await;
    assert_eq!(finished.topic, "hermes/tts/sayFinished");
}
