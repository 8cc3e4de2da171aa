// src/config/ticker.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::ticker::cache::{Cadence, Cadences};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8787";

pub const ENV_CONFIG_PATH: &str = "TICKER_CONFIG_PATH";
pub const ENV_API_URL: &str = "TICKER_API_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TICKER_REQUEST_TIMEOUT_MS";
pub const ENV_RELAY_ADDR: &str = "TICKER_RELAY_ADDR";

/// Base URL baked in at build time, if `TICKER_API_URL` was set for the build.
pub fn build_time_base_url() -> &'static str {
    option_env!("TICKER_API_URL").unwrap_or(DEFAULT_BASE_URL)
}

fn default_base_url() -> String {
    build_time_base_url().to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    4_000
}
fn default_log_capacity() -> usize {
    crate::ticker::engagement::DEFAULT_LOG_CAPACITY
}
fn default_relay_addr() -> String {
    DEFAULT_RELAY_ADDR.to_string()
}

/// Freshness / refresh pair in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceSecs {
    pub stale_after: u64,
    pub refresh_every: u64,
}

/// Optional per-family overrides of the built-in cadences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceSection {
    #[serde(default)]
    pub general: Option<CadenceSecs>,
    #[serde(default)]
    pub insights: Option<CadenceSecs>,
    #[serde(default)]
    pub performance: Option<CadenceSecs>,
    #[serde(default)]
    pub feed: Option<CadenceSecs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_log_capacity")]
    pub engagement_log_capacity: usize,
    #[serde(default = "default_relay_addr")]
    pub relay_addr: String,
    #[serde(default)]
    pub cadence: CadenceSection,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            engagement_log_capacity: default_log_capacity(),
            relay_addr: default_relay_addr(),
            cadence: CadenceSection::default(),
        }
    }
}

impl TickerConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ticker config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing ticker config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $TICKER_CONFIG_PATH
    /// 2) config/ticker.toml
    /// 3) config/ticker.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/ticker.toml");
            let json_p = PathBuf::from("config/ticker.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        base.with_env_overrides()
    }

    /// Runtime env wins over files and the build-time default.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Ok(ms) = env::var(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("{ENV_REQUEST_TIMEOUT_MS} must be an integer"))?;
        }
        if let Ok(addr) = env::var(ENV_RELAY_ADDR) {
            self.relay_addr = addr.trim().to_string();
        }
        Ok(self.sanitized())
    }

    fn sanitized(mut self) -> Self {
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = default_request_timeout_ms();
        }
        if self.connect_timeout_ms == 0 {
            self.connect_timeout_ms = default_connect_timeout_ms();
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Built-in cadences with any configured overrides applied.
    pub fn cadences(&self) -> Cadences {
        let mut out = Cadences::default();
        let apply = |slot: &mut Cadence, secs: Option<CadenceSecs>| {
            if let Some(c) = secs {
                if let Some(cad) = cadence_from_secs(c) {
                    *slot = cad;
                }
            }
        };
        apply(&mut out.general, self.cadence.general);
        apply(&mut out.insights, self.cadence.insights);
        apply(&mut out.performance, self.cadence.performance);
        apply(&mut out.feed, self.cadence.feed);
        out
    }
}

/// A zero refresh interval is ignored; freshness never outlives the refresh interval.
fn cadence_from_secs(c: CadenceSecs) -> Option<Cadence> {
    if c.refresh_every == 0 {
        return None;
    }
    Some(Cadence::new(
        Duration::from_secs(c.stale_after.min(c.refresh_every)),
        Duration::from_secs(c.refresh_every),
    ))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<TickerConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    if hint_ext == "toml" {
        return Ok(toml::from_str(s)?);
    }
    if let Ok(v) = toml::from_str(s) {
        return Ok(v);
    }
    serde_json::from_str(s).map_err(|_| anyhow!("unsupported ticker config format"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_with_partial_fields_keeps_defaults() {
        let cfg: TickerConfig = parse_config(
            r#"
base_url = "https://ticker.example.com/api/"

[cadence.insights]
stale_after = 100
refresh_every = 120
"#,
            "toml",
        )
        .unwrap()
        .sanitized();
        assert_eq!(cfg.base_url, "https://ticker.example.com/api");
        assert_eq!(cfg.request_timeout_ms, 10_000);
        let cad = cfg.cadences();
        assert_eq!(cad.insights.refresh_every, Duration::from_secs(120));
        assert_eq!(cad.general, Cadences::default().general);
    }

    #[test]
    fn stale_after_is_clamped_to_refresh_interval() {
        let c = cadence_from_secs(CadenceSecs {
            stale_after: 90,
            refresh_every: 30,
        })
        .unwrap();
        assert_eq!(c.stale_after, Duration::from_secs(30));
        assert!(cadence_from_secs(CadenceSecs {
            stale_after: 1,
            refresh_every: 0
        })
        .is_none());
    }

    #[test]
    fn json_is_accepted_without_hint() {
        let cfg = parse_config(r#"{"request_timeout_ms": 2500}"#, "").unwrap();
        assert_eq!(cfg.request_timeout_ms, 2500);
    }
}
