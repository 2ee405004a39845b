use procwatch_daemon::config::{Config, ENV_HOST, ENV_PORT, ENV_TOKEN};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8088);
    assert_eq!(config.server.token, "change-me-please");
    assert_eq!(config.restart.terminate_timeout(), Duration::from_secs(5));
    assert_eq!(config.bind_addr(), "127.0.0.1:8088");
}

#[test]
fn test_load_from_toml() {
    let toml_content = r#"
[server]
host = "0.0.0.0"
port = 9000
token = "s3cret"

[restart]
terminate_timeout_secs = 2
poll_interval_ms = 50
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml_content.as_bytes()).unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.token, "s3cret");
    assert_eq!(config.restart.terminate_timeout(), Duration::from_secs(2));
    assert_eq!(config.restart.poll_interval(), Duration::from_millis(50));
}

#[test]
fn test_missing_sections_use_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[server]\nhost = \"::1\"\nport = 1\ntoken = \"t\"\n").unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.server.host, "::1");
    assert_eq!(config.restart.terminate_timeout_secs, 5);
}

#[test]
fn test_save_config() {
    let mut config = Config::default();
    config.server.port = 8123;
    let file = NamedTempFile::new().unwrap();
    config.save(file.path()).unwrap();
    let loaded = Config::load(file.path()).unwrap();
    assert_eq!(loaded.server.port, 8123);
    assert_eq!(loaded.server.token, config.server.token);
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = [(ENV_TOKEN, "from-env"), (ENV_HOST, "0.0.0.0"), (ENV_PORT, "9999")]
        .into_iter()
        .collect();
    let mut config = Config::default();
    config.apply_env(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(config.server.token, "from-env");
    assert_eq!(config.bind_addr(), "0.0.0.0:9999");
}

#[test]
fn test_bad_port_override_is_ignored() {
    let mut config = Config::default();
    config.apply_env(|key| (key == ENV_PORT).then(|| "not-a-port".to_string()));
    assert_eq!(config.server.port, 8088);
}
