//! The Offline Cache Manager.
//!
//! One worker instance serves exactly one cache generation, named from the
//! configured version. It reacts to four events:
//! - install: precache the app shell, best effort
//! - activate: drop every other generation
//! - fetch: route GET requests between cache and network
//! - message: let the page force a pending update to activate
//!
//! Handlers never touch the registration themselves; they report the side
//! effects they want (skip waiting, claim clients, navigation preload) and
//! the host applies them.

mod routing;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::models::{CacheMode, ClientMessage, NavigationPreload, Request, Response, WorkerReply};
use crate::net::Network;
use crate::storage::CacheStorage;
use crate::tasks::BackgroundTasks;

pub use routing::FetchOutcome;

/// What the install step managed to precache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub cached: Vec<String>,
    /// (path, reason) for each entry that could not be stored.
    pub failed: Vec<(String, String)>,
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub cache_name: String,
    pub deleted: Vec<String>,
    pub claim_clients: bool,
    pub enable_navigation_preload: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOutcome {
    pub skip_waiting: bool,
    pub reply: Option<WorkerReply>,
}

pub struct OfflineCacheManager {
    config: Arc<WorkerConfig>,
    scope: Url,
    cache_name: String,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    tasks: BackgroundTasks,
}

impl OfflineCacheManager {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self> {
        let scope = config.scope()?;
        let cache_name = config.cache_name();
        crate::storage::validate_cache_name(&cache_name)?;

        Ok(Self {
            config: Arc::new(config),
            scope,
            cache_name,
            storage,
            network,
            tasks: BackgroundTasks::new(),
        })
    }

    /// Worker for another generation of the same app, sharing this one's
    /// storage, network and background tasks. Pages controlled by an older
    /// generation are served through it until the newer one activates.
    pub fn for_generation(&self, version: &str, cache_name: &str) -> Result<Self> {
        crate::storage::validate_cache_name(cache_name)?;
        let config = WorkerConfig {
            version: version.to_string(),
            ..(*self.config).clone()
        };

        Ok(Self {
            config: Arc::new(config),
            scope: self.scope.clone(),
            cache_name: cache_name.to_string(),
            storage: Arc::clone(&self.storage),
            network: Arc::clone(&self.network),
            tasks: self.tasks.clone(),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Resolve a path relative to the scope.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.scope.join(path)?)
    }

    // =========================================================================
    // Install
    // =========================================================================

    /// Precache the app shell into this generation's bucket.
    ///
    /// Every manifest entry is attempted concurrently. A failed entry is
    /// logged and reported, never fatal.
    pub async fn install(&self) -> InstallReport {
        info!(cache = %self.cache_name, entries = self.config.app_shell.len(), "Installing app shell");

        if let Err(e) = self.storage.open(&self.cache_name).await {
            warn!(cache = %self.cache_name, error = %e, "Failed to open cache bucket");
        }

        let attempts = self
            .config
            .app_shell
            .iter()
            .map(|path| async move { (path.clone(), self.precache(path).await) });
        let results = join_all(attempts).await;

        let mut report = InstallReport {
            cache_name: self.cache_name.clone(),
            skip_waiting: self.config.skip_waiting_on_install,
            ..Default::default()
        };
        for (path, result) in results {
            match result {
                Ok(()) => report.cached.push(path),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to cache app shell entry");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        info!(
            cache = %self.cache_name,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Install complete"
        );
        report
    }

    async fn precache(&self, path: &str) -> Result<()> {
        let request = Request::get(self.resolve(path)?);
        let response = self.network.fetch(&request, CacheMode::NoCache).await?;
        if !response.is_ok() {
            debug!(
                path,
                status = response.status,
                body = %WorkerError::truncate_body(&response.body),
                "App shell entry rejected"
            );
            return Err(WorkerError::Status {
                status: response.status,
                url: request.url.to_string(),
            });
        }
        self.storage
            .put(&self.cache_name, &request.cache_key(), &response)
            .await
    }

    // =========================================================================
    // Activate
    // =========================================================================

    /// Delete every bucket that does not belong to this generation.
    pub async fn activate(&self) -> ActivateReport {
        let mut report = ActivateReport {
            cache_name: self.cache_name.clone(),
            claim_clients: true,
            enable_navigation_preload: self.config.navigation_preload,
            ..Default::default()
        };

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list cache buckets");
                return report;
            }
        };

        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| *name != self.cache_name)
            .collect();
        let deletions = stale.iter().map(|name| async move {
            (name.clone(), self.storage.delete(name).await)
        });

        for (name, result) in join_all(deletions).await {
            match result {
                Ok(true) => {
                    info!(cache = %name, "Deleted old cache generation");
                    report.deleted.push(name);
                }
                Ok(false) => debug!(cache = %name, "Cache bucket already gone"),
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }

        report
    }

    // =========================================================================
    // Message
    // =========================================================================

    /// Handle a control message posted by a page. Unrecognized data is ignored.
    pub fn message(&self, data: &Value) -> MessageOutcome {
        match ClientMessage::parse(data) {
            Some(message) => {
                info!(?message, version = %self.config.version, "Skip waiting requested");
                MessageOutcome {
                    skip_waiting: true,
                    reply: self.config.reply_with_version.then(|| WorkerReply::Version {
                        version: self.config.version.clone(),
                    }),
                }
            }
            None => {
                debug!(%data, "Ignoring unrecognized message");
                MessageOutcome::default()
            }
        }
    }

    // =========================================================================
    // Navigation preload
    // =========================================================================

    /// The network fetch a host starts for a navigation while the worker
    /// boots, bounded by the navigation timeout.
    pub async fn preload(&self, request: &Request) -> NavigationPreload {
        match self.fetch_with_timeout(request).await {
            Ok(response) => NavigationPreload::Ready(response),
            Err(e) => NavigationPreload::Failed(e.to_string()),
        }
    }

    async fn fetch_with_timeout(&self, request: &Request) -> Result<Response> {
        let limit = self.config.navigation_timeout();
        match tokio::time::timeout(limit, self.network.fetch(request, CacheMode::Default)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout {
                url: request.url.to_string(),
                elapsed: limit,
            }),
        }
    }
}
