//! Tests for config loading: TOML files, environment upstreams, CLI overrides

use anyhow::Result;
use clap::Parser;
use redis_local_proxy::config::{LogFormat, load_config, upstreams_from_vars};
use redis_local_proxy::network::{BindAddress, Network};
use redis_local_proxy::pool::Family;
use redis_local_proxy::Args;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> Result<NamedTempFile> {
    let mut temp_file = NamedTempFile::new()?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.flush()?;
    Ok(temp_file)
}

/// Test loading a complete file
#[test]
fn test_load_config_from_file() -> Result<()> {
    let file = write_config(
        r#"
network = "unix"
local_socket_prefix = "/run/redis/"
local_socket_suffix = ".socket"
unlink = false
stats_interval_secs = 30

[logging]
level = "debug"
format = "json"

[[upstreams]]
address = "10.0.0.5:6379"
label = "sessions"
database = 4
max_pool_size = 25
checkout_timeout_ms = 250

[[upstreams]]
address = "/var/run/redis.sock"
family = "unix"
database = -1
"#,
    )?;

    let config = load_config(file.path())?;
    config.validate()?;

    assert_eq!(config.network, Network::Unix);
    assert!(!config.unlink);
    assert_eq!(config.stats_interval, Duration::from_secs(30));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);

    let sessions = &config.upstreams[0];
    assert_eq!(sessions.display_label(), "sessions");
    assert_eq!(sessions.database, Some(4));
    assert_eq!(sessions.max_pool_size.get(), 25);
    assert_eq!(sessions.checkout_timeout, Duration::from_millis(250));
    assert_eq!(
        config.bind_address(sessions),
        Some(BindAddress::Unix(PathBuf::from("/run/redis/10.0.0.5-6379-4.socket")))
    );

    let local = &config.upstreams[1];
    assert_eq!(local.family, Family::Unix);
    assert_eq!(local.database, None);
    Ok(())
}

/// Omitted settings fall back to defaults
#[test]
fn test_minimal_file_uses_defaults() -> Result<()> {
    let file = write_config(
        r#"
[[upstreams]]
address = "127.0.0.1:6379"
"#,
    )?;

    let config = load_config(file.path())?;
    assert_eq!(config.network, Network::Unix);
    assert!(config.unlink);
    assert_eq!(config.local_socket_suffix, ".sock");
    assert_eq!(config.upstreams[0].family, Family::Tcp);
    assert_eq!(config.upstreams[0].max_pool_size.get(), 10);
    assert_eq!(config.logging.format, LogFormat::Compact);
    Ok(())
}

#[test]
fn test_invalid_toml_returns_error() -> Result<()> {
    let file = write_config("this is not valid TOML [[[")?;
    let result = load_config(file.path());

    assert!(result.unwrap_err().to_string().contains("Failed to parse"));
    Ok(())
}

#[test]
fn test_missing_file_returns_error() {
    let result = load_config("/nonexistent/path.toml");
    assert!(result.unwrap_err().to_string().contains("Failed to read"));
}

#[test]
fn test_zero_pool_size_rejected() -> Result<()> {
    let file = write_config(
        r#"
[[upstreams]]
address = "127.0.0.1:6379"
max_pool_size = 0
"#,
    )?;
    assert!(load_config(file.path()).is_err());
    Ok(())
}

/// Environment upstreams replace the file's, in index order
#[test]
fn test_env_upstreams_override_file() -> Result<()> {
    let file = write_config(
        r#"
[[upstreams]]
address = "file-host:6379"
"#,
    )?;
    let mut config = load_config(file.path())?;

    config.apply_env_upstreams([
        ("PROXY_UPSTREAM_10".to_string(), "redis://third:6379".to_string()),
        ("HOME".to_string(), "/root".to_string()),
        ("PROXY_UPSTREAM_0".to_string(), "redis://first:6379?db=1".to_string()),
        ("PROXY_UPSTREAM_2".to_string(), "unix:///tmp/second.sock".to_string()),
    ])?;

    let addresses: Vec<_> = config.upstreams.iter().map(|u| u.address.as_str()).collect();
    assert_eq!(addresses, ["first:6379", "/tmp/second.sock", "third:6379"]);
    assert_eq!(config.upstreams[0].database, Some(1));
    assert_eq!(config.upstreams[1].family, Family::Unix);
    Ok(())
}

#[test]
fn test_no_env_upstreams_keeps_file() -> Result<()> {
    let vars = [("PATH".to_string(), "/usr/bin".to_string())];
    assert!(upstreams_from_vars(vars)?.is_none());
    Ok(())
}

#[test]
fn test_bad_env_upstream_is_an_error() {
    let vars = [("PROXY_UPSTREAM_0".to_string(), "ftp://nope".to_string())];
    assert!(upstreams_from_vars(vars).is_err());
}

/// Command-line URIs win over both the file and the environment
#[test]
fn test_cli_overrides_everything() -> Result<()> {
    let file = write_config(
        r#"
network = "unix"

[[upstreams]]
address = "file-host:6379"
"#,
    )?;
    let mut config = load_config(file.path())?;
    config.apply_env_upstreams([(
        "PROXY_UPSTREAM_0".to_string(),
        "redis://env-host:6379".to_string(),
    )])?;

    let args = Args::try_parse_from([
        "redis-local-proxy",
        "--network",
        "tcp",
        "redis://cli-host:7000?listen=127.0.0.1:17000&label=cli",
    ])?;
    args.apply_to(&mut config)?;
    config.validate()?;

    assert_eq!(config.network, Network::Tcp);
    assert_eq!(config.upstreams.len(), 1);
    assert_eq!(config.upstreams[0].address, "cli-host:7000");
    assert_eq!(
        config.bind_address(&config.upstreams[0]),
        Some(BindAddress::Tcp("127.0.0.1:17000".into()))
    );
    Ok(())
}

#[test]
fn test_validation_catches_bad_combinations() -> Result<()> {
    // TCP listeners need an explicit address for standalone upstreams
    let file = write_config(
        r#"
network = "tcp"

[[upstreams]]
address = "127.0.0.1:6379"
"#,
    )?;
    assert!(load_config(file.path())?.validate().is_err());

    // A cluster cannot be pinned to a database
    let file = write_config(
        r#"
[[upstreams]]
address = "127.0.0.1:7000"
cluster = true
database = 1
"#,
    )?;
    assert!(load_config(file.path())?.validate().is_err());
    Ok(())
}
