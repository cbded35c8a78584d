use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use wavenet_core::{
    AudioCache, BusGateway, GatewayConfig, MessageBus, PlayCommand, RequestCoordinator,
    WavenetClient,
};
use wavenet_hermes_bridge::{init_logging, Args, BridgeConfig, MqttTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = BridgeConfig::load(Args::parse())?;
    init_logging(cfg.debug, cfg.log_format);
    cfg.validate()?;

    info!(
        target: "bridge",
        voice = %cfg.service.voice.voice_name(),
        sample_rate = cfg.service.voice.sample_rate,
        cache_dir = %cfg.service.cache_dir.display(),
        sites = ?cfg.service.site_ids,
        "Starting Wavenet TTS service"
    );

    let cache = AudioCache::open(&cfg.service.cache_dir).await?;
    let synthesizer = WavenetClient::from_credentials_file(
        &cfg.service.credentials_json,
        cfg.service.synthesis_timeout_ms,
    )?;
    let coordinator =
        RequestCoordinator::new(cfg.service.voice.clone(), cache, Arc::new(synthesizer));

    let transport = MqttTransport::new(&cfg.mqtt, BusGateway::topics())?;
    let gateway = Arc::new(BusGateway::new(
        coordinator,
        Arc::new(transport.publisher()),
        cfg.service.play_command.clone().map(PlayCommand::new),
        GatewayConfig::from(&cfg.service),
    ));

    // MQTT event loop -> bus -> gateway
    let bus = MessageBus::new();
    let (gateway_sub, inbound) = bus.subscribe(BusGateway::topics(), cfg.mqtt.inbound_capacity);
    let gateway_task = tokio::spawn(gateway.run(inbound));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let transport_task = tokio::spawn(transport.run(bus.clone(), shutdown_rx));

    wait_for_signal().await;
    info!(target: "bridge", "Shutting down");

    // Stop intake, let in-flight requests finish and publish, then disconnect
    bus.unsubscribe(&gateway_sub);
    if let Err(e) = gateway_task.await {
        warn!(target: "bridge", error = %e, "Gateway task failed");
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = transport_task.await {
        warn!(target: "bridge", error = %e, "Transport task failed");
    }

    info!(target: "bridge", "Stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(target: "bridge", error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
