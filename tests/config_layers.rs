use std::collections::HashMap;
use std::io::Write;

use sms2mqtt::config::{Config, ConfigOverlay, ConfigSource};
use sms2mqtt::errors::ConfigError;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_cli_beats_env_beats_file_beats_defaults() {
    let file = write_config(
        r#"
[modem]
device = "/dev/ttyUSB2"
baud_rate = 9600

[mqtt]
host = "file-host"
port = 1884
prefix = "file"
"#,
    );
    let vars: HashMap<&str, &str> = [("MQTT_HOST", "env-host"), ("MQTT_PORT", "1885")]
        .into_iter()
        .collect();
    let env = ConfigOverlay::from_env(|key| vars.get(key).map(|v| v.to_string())).unwrap();
    let cli = ConfigOverlay {
        mqtt_port: Some(1886),
        ..Default::default()
    };

    let path = file.path().to_str().unwrap();
    let (config, source) = tokio_test::assert_ok!(Config::resolve(path, &env, &cli).await);
    assert_eq!(source, ConfigSource::File(path.to_string()));

    assert_eq!(config.modem.device, "/dev/ttyUSB2");
    assert_eq!(config.modem.baud_rate, 9600);
    assert_eq!(config.mqtt.prefix, "file");
    assert_eq!(config.mqtt.host, "env-host");
    assert_eq!(config.mqtt.port, 1886);
    assert_eq!(config.mqtt.client_id, "simplesms2mqtt");
}

#[tokio::test]
async fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let path = path.to_str().unwrap();
    let (config, source) =
        Config::resolve(path, &ConfigOverlay::default(), &ConfigOverlay::default())
            .await
            .unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(
        source,
        ConfigSource::Defaults {
            missing: path.to_string()
        }
    );
}

#[tokio::test]
async fn test_unparseable_file_is_an_error() {
    let file = write_config("[mqtt\nhost = ");
    let err = Config::resolve(
        file.path().to_str().unwrap(),
        &ConfigOverlay::default(),
        &ConfigOverlay::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[tokio::test]
async fn test_init_file_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();
    tokio_test::assert_ok!(Config::create_default(path).await);
    let config = tokio_test::assert_ok!(Config::load(path).await);
    assert_eq!(config, Config::default());
}

#[tokio::test]
async fn test_example_config_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.toml");
    let config = tokio_test::assert_ok!(Config::load(path).await);
    assert_eq!(config, Config::default());
}
