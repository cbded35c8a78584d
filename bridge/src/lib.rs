//! MQTT side of the Hermes Wavenet TTS service.
//!
//! [`mqtt::MqttTransport`] connects to the broker and feeds inbound publishes
//! into a [`wavenet_core::MessageBus`]; [`mqtt::MqttPublisher`] is the
//! outbound [`wavenet_core::Publisher`] handed to the gateway.

pub mod config;
pub mod mqtt;

pub use config::{Args, BridgeConfig, LogFormat, MqttConfig};
pub use mqtt::{ConnectionState, MqttPublisher, MqttTransport};

use tracing_subscriber::EnvFilter;
use wavenet_core::WavenetError;

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Core(#[from] WavenetError),
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

// Log targets used across the service
const DEBUG_TARGETS: &str =
    "info,mqtt=debug,gateway=debug,coordinator=debug,cache=debug,wavenet=debug,player=debug,bus=debug,bridge=debug";

/// Install the global tracing subscriber. `RUST_LOG` overrides `debug`.
pub fn init_logging(debug: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { DEBUG_TARGETS } else { "info" }));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init(),
    }
}
