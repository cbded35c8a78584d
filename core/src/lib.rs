// Wavenet Hermes Core Library
// Text-to-speech request pipeline: cache, synthesis, coordination, bus gateway

pub mod bus;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod hermes;
pub mod player;
pub mod synth;
pub(crate) mod utils;

// Export core types
pub use bus::{BusMessage, MessageBus, Publisher};
pub use cache::{AudioCache, CacheKey};
pub use config::{ServiceConfig, VoiceConfig};
pub use coordinator::{Audio, RequestCoordinator, SynthesisOutcome, SynthesisRequest};
pub use gateway::{BusGateway, GatewayConfig};
pub use player::PlayCommand;
pub use synth::{SynthesisError, Synthesizer, Voice, WavenetClient};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WavenetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, WavenetError>;
