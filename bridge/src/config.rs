use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use wavenet_core::config::{ServiceConfig, VoiceConfig};

use crate::{BridgeError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_INBOUND_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command line. Every value is optional here so that a `--config` file can
/// fill the gaps; flags given on the command line always win.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "rhasspy-tts-wavenet-hermes",
    version,
    about = "Hermes MQTT text to speech service for Google Wavenet"
)]
pub struct Args {
    /// TOML file with defaults for any of the options below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Google service account credentials JSON
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials_json: Option<PathBuf>,
    /// Directory for cached WAV files
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Wavenet voice, e.g. Wavenet-C
    #[arg(long)]
    pub voice: Option<String>,
    /// MALE or FEMALE
    #[arg(long)]
    pub gender: Option<String>,
    #[arg(long)]
    pub sample_rate: Option<u32>,
    #[arg(long)]
    pub language_code: Option<String>,
    /// Synthesis endpoint
    #[arg(long)]
    pub url: Option<String>,
    /// Command that plays WAV data from stdin instead of publishing playBytes
    #[arg(long)]
    pub play_command: Option<String>,
    #[arg(long)]
    pub synthesis_timeout_ms: Option<u64>,
    #[arg(long)]
    pub play_finished_timeout_ms: Option<u64>,

    /// MQTT host
    #[arg(long)]
    pub host: Option<String>,
    /// MQTT port
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    /// Connect with TLS
    #[arg(long)]
    pub tls: bool,
    /// CA certificates (PEM) for TLS
    #[arg(long)]
    pub tls_ca_certs: Option<PathBuf>,
    /// Hermes site id to answer for (repeatable, default: all)
    #[arg(long = "site-id")]
    pub site_id: Vec<String>,

    /// Debug logging for this service
    #[arg(long)]
    pub debug: bool,
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Shape of the `--config` TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub credentials_json: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub voice: Option<String>,
    pub gender: Option<String>,
    pub sample_rate: Option<u32>,
    pub language_code: Option<String>,
    pub url: Option<String>,
    pub play_command: Option<String>,
    pub synthesis_timeout_ms: Option<u64>,
    pub play_finished_timeout_ms: Option<u64>,
    pub play_finished_slack_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub site_ids: Vec<String>,
    pub debug: Option<bool>,
    pub log_format: Option<LogFormat>,
    pub mqtt: MqttFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<bool>,
    pub tls_ca_certs: Option<PathBuf>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub inbound_capacity: Option<usize>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub tls_ca_certs: Option<PathBuf>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Queue depth between the MQTT event loop and the gateway
    pub inbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            tls: false,
            tls_ca_certs: None,
            client_id: format!("rhasspy-tts-wavenet-{}", std::process::id()),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::Config("mqtt host is empty".into()));
        }
        if self.port == 0 {
            return Err(BridgeError::Config("mqtt port must be non-zero".into()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(BridgeError::Config(
                "mqtt password given without username".into(),
            ));
        }
        if let Some(ca) = &self.tls_ca_certs {
            if !ca.is_file() {
                return Err(BridgeError::Config(format!(
                    "tls ca certificates not found: {}",
                    ca.display()
                )));
            }
        }
        Ok(())
    }
}

/// Everything the service binary needs, resolved from CLI + file
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub service: ServiceConfig,
    pub mqtt: MqttConfig,
    pub debug: bool,
    pub log_format: LogFormat,
}

impl BridgeConfig {
    /// Read `--config` if given and overlay the command line onto it.
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Precedence: command line, then file, then built-in defaults.
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self> {
        let credentials_json = args
            .credentials_json
            .or(file.credentials_json)
            .ok_or_else(|| BridgeError::Config("--credentials-json is required".into()))?;
        let cache_dir = args
            .cache_dir
            .or(file.cache_dir)
            .ok_or_else(|| BridgeError::Config("--cache-dir is required".into()))?;

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            voice: args.voice.or(file.voice).unwrap_or(defaults.voice),
            gender: args.gender.or(file.gender).unwrap_or(defaults.gender),
            language_code: args
                .language_code
                .or(file.language_code)
                .unwrap_or(defaults.language_code),
            sample_rate: args
                .sample_rate
                .or(file.sample_rate)
                .unwrap_or(defaults.sample_rate),
            url: args.url.or(file.url).unwrap_or(defaults.url),
        };

        let mut service = ServiceConfig::new(credentials_json, cache_dir);
        service.voice = voice;
        service.play_command = args.play_command.or(file.play_command);
        service.site_ids = if args.site_id.is_empty() {
            file.site_ids
        } else {
            args.site_id
        };
        if let Some(ms) = args.synthesis_timeout_ms.or(file.synthesis_timeout_ms) {
            service.synthesis_timeout_ms = ms;
        }
        if let Some(ms) = args
            .play_finished_timeout_ms
            .or(file.play_finished_timeout_ms)
        {
            service.play_finished_timeout_ms = ms;
        }
        if let Some(ms) = file.play_finished_slack_ms {
            service.play_finished_slack_ms = ms;
        }
        if let Some(ms) = file.shutdown_grace_ms {
            service.shutdown_grace_ms = ms;
        }

        let mqtt_defaults = MqttConfig::default();
        let m = file.mqtt;
        let mqtt = MqttConfig {
            host: args.host.or(m.host).unwrap_or(mqtt_defaults.host),
            port: args.port.or(m.port).unwrap_or(mqtt_defaults.port),
            username: args.username.or(m.username),
            password: args.password.or(m.password),
            tls: args.tls || m.tls.unwrap_or(false),
            tls_ca_certs: args.tls_ca_certs.or(m.tls_ca_certs),
            client_id: m.client_id.unwrap_or(mqtt_defaults.client_id),
            keep_alive_secs: m.keep_alive_secs.unwrap_or(mqtt_defaults.keep_alive_secs),
            inbound_capacity: m
                .inbound_capacity
                .unwrap_or(mqtt_defaults.inbound_capacity),
        };

        Ok(Self {
            service,
            mqtt,
            debug: args.debug || file.debug.unwrap_or(false),
            log_format: args.log_format.or(file.log_format).unwrap_or_default(),
        })
    }

    /// Fail fast on anything the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        self.mqtt.validate()?;
        if self.mqtt.tls_ca_certs.is_some() && !self.mqtt.tls {
            tracing::warn!(target: "bridge", "--tls-ca-certs given without --tls; ignoring");
        }
        Ok(())
    }
}
