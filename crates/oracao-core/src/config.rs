//! Worker configuration.
//!
//! The version string, scope and app shell manifest are fixed for the life of
//! a worker instance. They are loaded once at startup from
//! `~/.config/oracao-sw/config.json` (defaults from the deployed worker when
//! the file is absent) and then overridden from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::WorkerError;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "oracao-sw";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Bump on every change to any app file so clients pick up a new generation.
pub const DEFAULT_CACHE_VERSION: &str = "v1.1.0";

const DEFAULT_APP_NAME: &str = "oracao";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/";

/// Upper bound on a navigation network fetch before falling back to cache.
const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 5_000;

/// Timeout for any other request sent by the network client.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Essential app files, relative to the scope.
const DEFAULT_APP_SHELL: &[&str] = &[
    "./",
    "./index.html",
    "./manifest.webmanifest",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
    "./icons/icon-maskable.png",
    "./icons/canal.png",
];

/// How GET requests are routed between cache and network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Navigations are network-first, everything else stale-while-revalidate.
    #[default]
    Split,
    /// Every GET is served from cache when present (refreshed in the
    /// background), else network, else the cached offline fallback document.
    /// Documents are never revalidated before being served.
    Uniform,
}

impl FromStr for RoutingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "split" | "network-first" => Ok(RoutingPolicy::Split),
            "uniform" | "cache-first" => Ok(RoutingPolicy::Uniform),
            other => Err(anyhow::anyhow!("Unknown routing policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub app_name: String,
    pub version: String,
    /// Worker scope; manifest paths are resolved against it.
    pub base_url: String,
    pub app_shell: Vec<String>,
    /// Cache key that network-first navigations are stored under.
    pub document_path: String,
    /// Document served by the uniform policy when a request fails offline.
    pub offline_fallback: String,
    pub routing: RoutingPolicy,
    pub skip_waiting_on_install: bool,
    pub reply_with_version: bool,
    pub navigation_preload: bool,
    pub navigation_timeout_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            version: DEFAULT_CACHE_VERSION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            app_shell: DEFAULT_APP_SHELL.iter().map(|p| p.to_string()).collect(),
            document_path: "./".to_string(),
            offline_fallback: "./index.html".to_string(),
            routing: RoutingPolicy::default(),
            skip_waiting_on_install: true,
            reply_with_version: true,
            navigation_preload: true,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl WorkerConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `ORACAO_BASE_URL`, `ORACAO_CACHE_VERSION` and `ORACAO_ROUTING`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base_url) = lookup("ORACAO_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(version) = lookup("ORACAO_CACHE_VERSION") {
            self.version = version;
        }
        if let Some(routing) = lookup("ORACAO_ROUTING") {
            self.routing = routing.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Name of the cache bucket for this generation: `<app>-cache-<version>`.
    pub fn cache_name(&self) -> String {
        format!("{}-cache-{}", self.app_name, self.version)
    }

    /// The scope URL, always ending in `/` so relative paths resolve inside it.
    pub fn scope(&self) -> std::result::Result<Url, WorkerError> {
        let mut scope = Url::parse(&self.base_url)?;
        if !scope.path().ends_with('/') {
            let path = format!("{}/", scope.path());
            scope.set_path(&path);
        }
        Ok(scope)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
