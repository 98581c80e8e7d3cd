use std::env;
use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::Settings;
use super::{Properties, load_config};
use crate::utils::Error;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.log_level, "info");
    assert_eq!(settings.broker.host, "127.0.0.1");
    assert_eq!(settings.broker.port, 50000);
    assert!(settings.broker.auth_token.is_none());
    assert!(settings.bindings.is_empty());
    assert_eq!(settings.broker_address(), "127.0.0.1:50000");
}

#[test]
fn test_properties_typed_access() {
    let props = Properties::new()
        .with("channel", "  orders ")
        .with("blank", "   ")
        .with("sources", "4")
        .with("flag", "Yes");

    assert_eq!(props.get("channel"), Some("orders"));
    assert_eq!(props.get("blank"), None);
    assert_eq!(props.parse_string("missing", "x"), "x");
    assert_eq!(props.parse_int_with_range("sources", 1, 1, 8).unwrap(), 4);
    assert_eq!(props.parse_int_with_range("missing", 3, 1, 8).unwrap(), 3);
    assert!(props.parse_bool("flag", false).unwrap());
    assert!(props.must_parse_string("blank").is_err());
}

#[test]
fn test_properties_range_and_format_errors() {
    let props = Properties::new()
        .with("sources", "0")
        .with("batch", "ten")
        .with("flag", "maybe");

    assert!(matches!(
        props.parse_int_with_range("sources", 1, 1, 8),
        Err(Error::InvalidOptions(_))
    ));
    assert!(props.parse_int_with_range("batch", 1, 1, 8).is_err());
    assert!(props.parse_bool("flag", false).is_err());
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config reads config/default.* relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        log_level = "debug"

        [broker]
        host = "0.0.0.0"
        port = 9000

        [[bindings]]
        name = "orders"

        [bindings.source]
        kind = "command"
        properties = { address = "localhost:9000", channel = "orders", sources = "2" }

        [bindings.target]
        kind = "echo"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.broker.host, "0.0.0.0");
    assert_eq!(cfg.broker.port, 9000);
    assert_eq!(cfg.bindings.len(), 1);
    let binding = &cfg.bindings[0];
    assert_eq!(binding.name, "orders");
    assert_eq!(binding.source.kind, "command");
    assert_eq!(binding.source.properties.get("channel"), Some("orders"));
    assert_eq!(binding.target.kind, "echo");
    assert!(binding.target.properties.get("delay_ms").is_none());
}

#[test]
#[serial]
fn load_config_from_environment() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let cfg = temp_env::with_vars(
        [
            ("RELAYHUB_BROKER__PORT", Some("9100")),
            ("RELAYHUB_BROKER__AUTH_TOKEN", Some("secret")),
        ],
        load_config,
    );
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.broker.port, 9100);
    assert_eq!(cfg.broker.auth_token.as_deref(), Some("secret"));
    assert_eq!(cfg.broker.host, "127.0.0.1");
}
