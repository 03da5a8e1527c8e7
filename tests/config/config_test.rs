//! Tests for config defaults, file parsing and env-override precedence.

use std::time::Duration;

use switchboard::config::Config;

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.storage.db_path, "switchboard.db");
    assert_eq!(config.reconnect.base_ms, 30_000);
    assert_eq!(config.reconnect.cap_ms, 120_000);
    assert_eq!(config.reconnect.max_attempts, 3);
    assert_eq!(config.reconnect.extended_cooldown_ms, 600_000);
    assert_eq!(config.dispatch.log_ring_capacity, 200);
    assert_eq!(config.dispatch.bulk_delay_ms, 2000);
}

#[test]
fn partial_toml_keeps_defaults_elsewhere() {
    let config = Config::from_toml(
        r#"
        [reconnect]
        base_ms = 1000
        max_attempts = 5

        [gateway]
        base_url = "https://gw.test"
        "#,
    )
    .expect("parse");

    assert_eq!(config.reconnect.base_ms, 1000);
    assert_eq!(config.reconnect.max_attempts, 5);
    assert_eq!(config.reconnect.cap_ms, 120_000, "untouched field keeps default");
    assert_eq!(config.gateway.base_url, "https://gw.test");
    assert_eq!(config.storage.db_path, "switchboard.db");
}

#[test]
fn invalid_toml_is_an_error() {
    assert!(Config::from_toml("reconnect = \"not a table\"").is_err());
}

#[test]
fn env_overrides_beat_file_values() {
    let mut config = Config::from_toml(
        r#"
        [storage]
        db_path = "from-file.db"
        "#,
    )
    .expect("parse");

    config.apply_overrides(|key| match key {
        "SWITCHBOARD_DB_PATH" => Some("from-env.db".to_owned()),
        "SWITCHBOARD_RECONNECT_BASE_MS" => Some("5000".to_owned()),
        "SWITCHBOARD_GATEWAY_CLIENT_TOKEN" => Some("tok".to_owned()),
        _ => None,
    });

    assert_eq!(config.storage.db_path, "from-env.db");
    assert_eq!(config.reconnect.base_ms, 5000);
    assert_eq!(config.gateway.client_token.as_deref(), Some("tok"));
}

#[test]
fn invalid_numeric_overrides_are_ignored() {
    let mut config = Config::default();
    config.apply_overrides(|key| match key {
        "SWITCHBOARD_RECONNECT_BASE_MS" => Some("definitely not a number".to_owned()),
        _ => None,
    });
    assert_eq!(config.reconnect.base_ms, 30_000);
}

#[test]
fn policy_and_cooldown_derive_from_reconnect_section() {
    let config = Config::from_toml(
        r#"
        [reconnect]
        base_ms = 2000
        cap_ms = 8000
        max_attempts = 2
        extended_cooldown_ms = 60000
        "#,
    )
    .expect("parse");

    let policy = config.reconnect.policy();
    assert_eq!(policy.base, Duration::from_millis(2000));
    assert_eq!(policy.cap, Duration::from_millis(8000));
    assert_eq!(policy.max_attempts, 2);
    assert_eq!(policy.extended_cooldown, Duration::from_millis(60_000));
    assert_eq!(config.reconnect.connect_cooldown(), Duration::from_millis(2000));
}
