//! Environment-driven configuration.
//!
//! Everything has a sensible default so `notevox-server` starts with no
//! environment at all; durations accept humantime strings (`24h`, `30s`).

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use notevox_core::{cache::MediaCacheLimits, relay::RelayConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub cache_dir: PathBuf,
    pub cache_limits: MediaCacheLimits,
    pub origin_base_url: String,
    pub origin_timeout: Duration,
    pub transcribe_url: String,
    pub relay: RelayConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("NOTEVOX_BIND_ADDR", "127.0.0.1:3900")
            .parse()
            .context("invalid NOTEVOX_BIND_ADDR")?;

        let cache_dir = PathBuf::from(env_or("NOTEVOX_CACHE_DIR", "./cache/audio"));

        let defaults = MediaCacheLimits::defaults();
        let cache_limits = MediaCacheLimits {
            max_total_bytes: env_or("NOTEVOX_CACHE_MAX_BYTES", "104857600")
                .parse()
                .context("invalid NOTEVOX_CACHE_MAX_BYTES")?,
            ttl: duration_env("NOTEVOX_CACHE_TTL", defaults.ttl)?,
            sweep_interval: duration_env("NOTEVOX_SWEEP_INTERVAL", defaults.sweep_interval)?,
        };

        let relay_defaults = RelayConfig::defaults();
        let relay = RelayConfig {
            dial_timeout: duration_env("NOTEVOX_DIAL_TIMEOUT", relay_defaults.dial_timeout)?,
            ..relay_defaults
        };

        Ok(Self {
            bind_addr,
            cache_dir,
            cache_limits,
            origin_base_url: env_or("NOTEVOX_ORIGIN_BASE_URL", "http://localhost:8020"),
            origin_timeout: duration_env("NOTEVOX_ORIGIN_TIMEOUT", Duration::from_secs(30))?,
            transcribe_url: env_or("NOTEVOX_TRANSCRIBE_URL", "ws://localhost:8021/stream"),
            relay,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn duration_env(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => humantime::parse_duration(&raw).with_context(|| format!("invalid {key}")),
        Err(_) => Ok(default),
    }
}
