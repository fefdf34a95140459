//! Tests for configuration parsing, validation and layering

use std::io::Write as _;
use std::time::Duration;

use relaycast::config::{Config, ConfigManager, Endpoint, EndpointRole, RelayConfig, RelayMode};

fn sample_relay(mode: RelayMode) -> RelayConfig {
    RelayConfig {
        name: "sample".to_string(),
        upstream: Endpoint::new("127.0.0.1", 4001),
        downstream: Endpoint::new("0.0.0.0", 5000),
        mode,
        dump: false,
        retry_interval: Duration::from_secs(5),
    }
}

#[test]
fn endpoint_parses_host_and_port() {
    let endpoint: Endpoint = "127.0.0.1:4001".parse().unwrap();
    assert_eq!(endpoint.host, "127.0.0.1");
    assert_eq!(endpoint.port, 4001);
    assert_eq!(endpoint.to_string(), "127.0.0.1:4001");
}

#[test]
fn endpoint_parses_bracketed_ipv6() {
    let endpoint: Endpoint = "[::1]:9000".parse().unwrap();
    assert_eq!(endpoint.host, "::1");
    assert_eq!(endpoint.port, 9000);
}

#[test]
fn endpoint_rejects_malformed_input() {
    assert!("localhost".parse::<Endpoint>().is_err());
    assert!(":4001".parse::<Endpoint>().is_err());
    assert!("localhost:notaport".parse::<Endpoint>().is_err());
    assert!("localhost:0".parse::<Endpoint>().is_err());
    assert!("localhost:99999".parse::<Endpoint>().is_err());
}

#[test]
fn mode_parses_all_four_combinations() {
    assert_eq!(
        "connect-listen".parse::<RelayMode>().unwrap(),
        RelayMode::ConnectListen
    );
    assert_eq!(
        "listen-connect".parse::<RelayMode>().unwrap(),
        RelayMode::ListenConnect
    );
    assert_eq!(
        "connect-connect".parse::<RelayMode>().unwrap(),
        RelayMode::ConnectConnect
    );
    assert_eq!(
        "listen-listen".parse::<RelayMode>().unwrap(),
        RelayMode::ListenListen
    );
    assert!("listen".parse::<RelayMode>().is_err());
}

#[test]
fn default_mode_is_connect_listen() {
    assert_eq!(RelayMode::default(), RelayMode::ConnectListen);
}

#[test]
fn mode_projects_roles_per_side() {
    let relay = sample_relay(RelayMode::ListenConnect);
    assert!(matches!(relay.upstream_role(), EndpointRole::Listen(_)));
    assert!(matches!(relay.downstream_role(), EndpointRole::Connect(_)));

    let relay = sample_relay(RelayMode::ConnectListen);
    assert!(matches!(relay.upstream_role(), EndpointRole::Connect(_)));
    assert!(matches!(relay.downstream_role(), EndpointRole::Listen(_)));
}

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.general.buffer_size, 8192);
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn zero_retry_interval_is_rejected() {
    let mut config = Config::default();
    let mut relay = sample_relay(RelayMode::ConnectListen);
    relay.retry_interval = Duration::from_secs(0);
    config.relays.push(relay);
    assert!(config.validate().is_err());
}

#[test]
fn double_listen_on_one_endpoint_is_rejected() {
    let mut relay = sample_relay(RelayMode::ListenListen);
    relay.downstream = relay.upstream.clone();
    let mut config = Config::default();
    config.relays.push(relay);
    assert!(config.validate().is_err());
}

#[test]
fn tiny_buffer_size_is_rejected() {
    let mut config = Config::default();
    config.general.buffer_size = 16;
    assert!(config.validate().is_err());
}

#[test]
fn config_round_trips_through_toml() {
    let mut config = Config::default();
    config.relays.push(sample_relay(RelayMode::ListenConnect));

    let rendered = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&rendered).unwrap();

    assert_eq!(parsed.relays.len(), 1);
    assert_eq!(parsed.relays[0].mode, RelayMode::ListenConnect);
    assert_eq!(parsed.relays[0].upstream, config.relays[0].upstream);
    assert_eq!(parsed.general.buffer_size, config.general.buffer_size);
}

#[test]
fn load_from_file_parses_relay_entries() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[general]
log_level = "debug"
buffer_size = 4096
shutdown_timeout = "5s"

[[relay]]
name = "feed"
upstream = "127.0.0.1:4001"
downstream = "0.0.0.0:5000"
mode = "connect-listen"
dump = true
retry_interval = "2s"
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.buffer_size, 4096);
    assert_eq!(config.general.shutdown_timeout, Duration::from_secs(5));

    assert_eq!(config.relays.len(), 1);
    let relay = &config.relays[0];
    assert_eq!(relay.name, "feed");
    assert_eq!(relay.upstream.to_string(), "127.0.0.1:4001");
    assert_eq!(relay.mode, RelayMode::ConnectListen);
    assert!(relay.dump);
    assert_eq!(relay.retry_interval, Duration::from_secs(2));
}

#[test]
fn relay_entry_defaults_apply() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[relay]]
upstream = "127.0.0.1:4001"
downstream = "0.0.0.0:5000"
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    let relay = &config.relays[0];
    assert_eq!(relay.name, "relay");
    assert_eq!(relay.mode, RelayMode::ConnectListen);
    assert!(!relay.dump);
    assert_eq!(relay.retry_interval, Duration::from_secs(5));
}

#[test]
fn load_from_missing_file_falls_back_to_defaults() {
    let config =
        ConfigManager::load_from_file(std::path::Path::new("/nonexistent/relaycast.toml")).unwrap();
    assert!(config.relays.is_empty());
    assert_eq!(config.general.buffer_size, 8192);
}

#[test]
fn malformed_endpoint_in_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[relay]]
upstream = "not-an-endpoint"
downstream = "0.0.0.0:5000"
"#
    )
    .unwrap();

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn cli_overrides_apply() {
    let mut config = Config::default();
    config.merge_with_cli_args(Some(65536), Some(3));
    assert_eq!(config.general.buffer_size, 65536);
    assert_eq!(config.general.shutdown_timeout, Duration::from_secs(3));
}
