use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use super::settings::Settings;
use super::{ClientConfig, load_config};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.client.url, "ws://127.0.0.1:8080");
    assert_eq!(settings.client.tick_interval_ms, 5);
    assert_eq!(settings.client.reconnect_interval_ms, 1000);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn test_load_config_defaults_without_sources() {
    temp_env::with_vars_unset(
        [
            "TICKWIRE__CLIENT__URL",
            "TICKWIRE__CLIENT__TICK_INTERVAL_MS",
            "TICKWIRE__LOGGING__LEVEL",
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg, Settings::default());
        },
    );
}

#[test]
#[serial]
fn test_environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("TICKWIRE__CLIENT__URL", Some("ws://example.test:9000")),
            ("TICKWIRE__CLIENT__TICK_INTERVAL_MS", Some("20")),
            ("TICKWIRE__LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.client.url, "ws://example.test:9000");
            assert_eq!(cfg.client.tick_interval_ms, 20);
            assert_eq!(cfg.client.reconnect_interval_ms, 1000);
            assert_eq!(cfg.logging.level, "debug");
        },
    );
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [client]
        url = "ws://file.test:7000"
        reconnect_interval_ms = 250
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.client.url, "ws://file.test:7000");
    assert_eq!(cfg.client.reconnect_interval_ms, 250);
    assert_eq!(cfg.client.tick_interval_ms, 5);
}

#[test]
fn test_client_config_from_settings() {
    let settings = Settings::default();
    let config = ClientConfig::from(&settings.client);

    assert_eq!(config.url, "ws://127.0.0.1:8080");
    assert_eq!(config.tick_interval, Duration::from_millis(5));
    assert_eq!(config.reconnect_interval, Duration::from_secs(1));
    assert!(config.subscribers.is_empty());
}
