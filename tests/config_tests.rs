//! Configuration loading tests: TOML files, defaults, validation and
//! environment variable overrides.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tempfile::NamedTempFile;

use sockpool::{PoolConfig, load_config};

/// Serializes the tests that read or write SOCKPOOL_* environment variables
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_config_file(contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    write!(file, "{}", contents)?;
    Ok(file)
}

#[test]
fn test_load_full_config() -> Result<()> {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config_file(
        "idle_timeout = 2500\nmax_idle = 3\nmax_total = 12\nconnect_timeout = 4000\n",
    )?;

    let config = load_config(file.path().to_str().unwrap())?;
    assert_eq!(config.idle_timeout, Duration::from_millis(2500));
    assert_eq!(config.max_idle, 3);
    assert_eq!(config.max_total, 12);
    assert_eq!(config.connect_timeout, Duration::from_secs(4));
    Ok(())
}

#[test]
fn test_load_partial_config_fills_defaults() -> Result<()> {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config_file("max_idle = 2\n")?;

    let config = load_config(file.path().to_str().unwrap())?;
    assert_eq!(config.max_idle, 2);
    assert_eq!(config.max_total, PoolConfig::default().max_total);
    assert_eq!(config.idle_timeout, PoolConfig::default().idle_timeout);
    Ok(())
}

#[test]
fn test_load_missing_file() {
    let result = load_config("/nonexistent/path/sockpool.toml");
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_load_invalid_toml() -> Result<()> {
    let file = write_config_file("invalid toml content [[[")?;
    let result = load_config(file.path().to_str().unwrap());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
    Ok(())
}

#[test]
fn test_load_rejects_invalid_values() -> Result<()> {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config_file("max_idle = 10\nmax_total = 2\n")?;
    let result = load_config(file.path().to_str().unwrap());
    assert!(result.is_err());
    Ok(())
}

#[test]
fn test_env_overrides_take_precedence() -> Result<()> {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config_file("max_idle = 2\nmax_total = 8\nidle_timeout = 9000\n")?;

    // SAFETY: ENV_LOCK serializes every test touching process environment
    unsafe {
        std::env::set_var("SOCKPOOL_MAX_IDLE", "5");
        std::env::set_var("SOCKPOOL_IDLE_TIMEOUT_MS", "1234");
    }
    let config = load_config(file.path().to_str().unwrap());
    unsafe {
        std::env::remove_var("SOCKPOOL_MAX_IDLE");
        std::env::remove_var("SOCKPOOL_IDLE_TIMEOUT_MS");
    }

    let config = config?;
    assert_eq!(config.max_idle, 5);
    assert_eq!(config.idle_timeout, Duration::from_millis(1234));
    assert_eq!(config.max_total, 8, "untouched knobs come from the file");
    Ok(())
}

#[test]
fn test_unparseable_env_override_is_ignored() -> Result<()> {
    let _env = ENV_LOCK.lock().unwrap();
    let file = write_config_file("max_idle = 2\n")?;

    // SAFETY: ENV_LOCK serializes every test touching process environment
    unsafe {
        std::env::set_var("SOCKPOOL_MAX_IDLE", "not-a-number");
    }
    let config = load_config(file.path().to_str().unwrap());
    unsafe {
        std::env::remove_var("SOCKPOOL_MAX_IDLE");
    }

    assert_eq!(config?.max_idle, 2);
    Ok(())
}
