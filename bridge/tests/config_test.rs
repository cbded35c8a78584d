use clap::Parser;
use std::io::Write;
use wavenet_hermes_bridge::config::FileConfig;
use wavenet_hermes_bridge::{Args, BridgeConfig, LogFormat};

fn args(extra: &[&str]) -> Args {
    let mut argv = vec!["rhasspy-tts-wavenet-hermes"];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).expect("valid args")
}

fn toml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

#[test]
fn defaults_apply_when_unset() {
    let cfg = BridgeConfig::resolve(
        args(&["--credentials-json", "creds.json", "--cache-dir", "/tmp/wavenet"]),
        FileConfig::default(),
    )
    .unwrap();

    assert_eq!(cfg.service.voice.voice, "Wavenet-C");
    assert_eq!(cfg.service.voice.gender, "FEMALE");
    assert_eq!(cfg.service.voice.language_code, "en-US");
    assert_eq!(cfg.service.voice.sample_rate, 22050);
    assert_eq!(cfg.service.synthesis_timeout_ms, 10_000);
    assert!(cfg.service.site_ids.is_empty());
    assert!(cfg.service.play_command.is_none());
    assert_eq!(cfg.mqtt.host, "localhost");
    assert_eq!(cfg.mqtt.port, 1883);
    assert!(!cfg.mqtt.tls);
    assert!(!cfg.debug);
    assert_eq!(cfg.log_format, LogFormat::Text);
}

#[test]
fn command_line_values_are_used() {
    let cfg = BridgeConfig::resolve(
        args(&[
            "--credentials-json",
            "creds.json",
            "--cache-dir",
            "/tmp/wavenet",
            "--voice",
            "Wavenet-D",
            "--gender",
            "MALE",
            "--sample-rate",
            "16000",
            "--site-id",
            "kitchen",
            "--site-id",
            "bedroom",
            "--play-command",
            "aplay -q",
            "--host",
            "broker",
            "--port",
            "8883",
            "--tls",
            "--log-format",
            "json",
            "--debug",
        ]),
        FileConfig::default(),
    )
    .unwrap();

    assert_eq!(cfg.service.voice.voice_name(), "en-US-Wavenet-D");
    assert_eq!(cfg.service.voice.gender, "MALE");
    assert_eq!(cfg.service.voice.sample_rate, 16000);
    assert_eq!(cfg.service.site_ids, vec!["kitchen", "bedroom"]);
    assert_eq!(cfg.service.play_command.as_deref(), Some("aplay -q"));
    assert_eq!(cfg.mqtt.host, "broker");
    assert_eq!(cfg.mqtt.port, 8883);
    assert!(cfg.mqtt.tls);
    assert!(cfg.debug);
    assert_eq!(cfg.log_format, LogFormat::Json);
}

#[test]
fn file_fills_gaps_and_flags_win() {
    let file = toml_file(
        r#"
credentials_json = "from-file.json"
cache_dir = "/var/cache/wavenet"
voice = "Wavenet-A"
language_code = "de-DE"
site_ids = ["garage"]
play_finished_slack_ms = 250

[mqtt]
host = "file-broker"
port = 1884
username = "hermes"
password = "secret"
"#,
    );
    let path = file.path().to_str().unwrap().to_string();

    let cfg = BridgeConfig::load(args(&[
        "--config",
        &path,
        "--voice",
        "Wavenet-B",
        "--port",
        "1999",
    ]))
    .unwrap();

    assert_eq!(cfg.service.credentials_json.to_str(), Some("from-file.json"));
    assert_eq!(cfg.service.cache_dir.to_str(), Some("/var/cache/wavenet"));
    assert_eq!(cfg.service.voice.voice, "Wavenet-B");
    assert_eq!(cfg.service.voice.language_code, "de-DE");
    assert_eq!(cfg.service.site_ids, vec!["garage"]);
    assert_eq!(cfg.service.play_finished_slack_ms, 250);
    assert_eq!(cfg.mqtt.host, "file-broker");
    assert_eq!(cfg.mqtt.port, 1999);
    assert_eq!(cfg.mqtt.username.as_deref(), Some("hermes"));
    assert_eq!(cfg.mqtt.password.as_deref(), Some("secret"));
}

#[test]
fn missing_required_paths_are_errors() {
    assert!(BridgeConfig::resolve(args(&["--cache-dir", "/tmp/x"]), FileConfig::default()).is_err());
    assert!(BridgeConfig::resolve(
        args(&["--credentials-json", "creds.json"]),
        FileConfig::default()
    )
    .is_err());
}

#[test]
fn unknown_file_keys_are_rejected() {
    let file = toml_file("credentials_json = \"c.json\"\nvoise = \"typo\"\n");
    let path = file.path().to_str().unwrap().to_string();
    assert!(BridgeConfig::load(args(&["--config", &path])).is_err());
}

#[test]
fn validate_checks_files_and_mqtt() {
    let dir = tempfile::tempdir().unwrap();
    let creds = dir.path().join("creds.json");
    std::fs::write(&creds, "{}").unwrap();
    let cache = dir.path().join("cache");

    let ok = BridgeConfig::resolve(
        args(&[
            "--credentials-json",
            creds.to_str().unwrap(),
            "--cache-dir",
            cache.to_str().unwrap(),
        ]),
        FileConfig::default(),
    )
    .unwrap();
    assert!(ok.validate().is_ok());

    let missing_creds = BridgeConfig::resolve(
        args(&[
            "--credentials-json",
            dir.path().join("nope.json").to_str().unwrap(),
            "--cache-dir",
            cache.to_str().unwrap(),
        ]),
        FileConfig::default(),
    )
    .unwrap();
    assert!(missing_creds.validate().is_err());

    let zero_timeout = BridgeConfig::resolve(
        args(&[
            "--credentials-json",
            creds.to_str().unwrap(),
            "--cache-dir",
            cache.to_str().unwrap(),
            "--synthesis-timeout-ms",
            "0",
        ]),
        FileConfig::default(),
    )
    .unwrap();
    assert!(zero_timeout.validate().is_err());

    let password_only = BridgeConfig::resolve(
        args(&[
            "--credentials-json",
            creds.to_str().unwrap(),
            "--cache-dir",
            cache.to_str().unwrap(),
            "--password",
            "secret",
        ]),
        FileConfig::default(),
    )
    .unwrap();
    assert!(password_only.validate().is_err());
}
