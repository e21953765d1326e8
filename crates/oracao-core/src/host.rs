//! Host side of the worker: delivers events through the dispatch table and
//! applies the lifecycle effects the handlers report.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatch::{DispatchTable, EventOutcome, WorkerEvent};
use crate::lifecycle::{Generation, Registration};
use crate::models::{CacheMode, NavigationPreload, Request, Response, WorkerReply};
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, OfflineCacheManager};

pub struct WorkerHost {
    worker: Arc<OfflineCacheManager>,
    dispatch: DispatchTable,
    registration: Registration,
}

impl WorkerHost {
    pub fn new(worker: Arc<OfflineCacheManager>, registration: Registration) -> Self {
        Self {
            worker,
            dispatch: DispatchTable::new(),
            registration,
        }
    }

    /// Fresh registration scoped to the worker's base URL.
    pub fn register(worker: Arc<OfflineCacheManager>) -> Self {
        let registration = Registration::new(worker.scope().clone());
        Self::new(worker, registration)
    }

    pub fn worker(&self) -> &OfflineCacheManager {
        &self.worker
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn into_registration(self) -> Registration {
        self.registration
    }

    /// True when this worker's generation is the active one.
    pub fn is_current(&self) -> bool {
        self.registration.active_version() == Some(self.worker.version())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Install this worker's generation, then activate it if allowed.
    pub async fn install(&mut self) -> Result<(InstallReport, Option<ActivateReport>)> {
        self.registration.begin_install(Generation::new(
            self.worker.version(),
            self.worker.cache_name(),
        ));

        let report = match self.dispatch.dispatch(&self.worker, WorkerEvent::Install).await {
            EventOutcome::Installed(report) => report,
            other => {
                self.registration.install_failed();
                return Err(anyhow::anyhow!("Install handler returned {:?}", other));
            }
        };

        self.registration.install_complete();
        if report.skip_waiting {
            self.registration.request_skip_waiting();
        }

        let activated = self.try_activate().await?;
        Ok((report, activated))
    }

    /// Activate the waiting generation if skip-waiting was requested or no
    /// page is still controlled by the current one.
    pub async fn try_activate(&mut self) -> Result<Option<ActivateReport>> {
        if !self.registration.can_activate() {
            if self.registration.waiting.is_some() {
                info!(
                    clients = self.registration.clients_of_active(),
                    "New version waiting for open pages to close"
                );
            }
            return Ok(None);
        }

        self.registration.begin_activate();
        let report = match self.dispatch.dispatch(&self.worker, WorkerEvent::Activate).await {
            EventOutcome::Activated(report) => report,
            other => return Err(anyhow::anyhow!("Activate handler returned {:?}", other)),
        };
        self.registration.activate_complete();

        if report.enable_navigation_preload {
            self.registration.navigation_preload_enabled = true;
        }
        if report.claim_clients {
            let claimed = self.registration.claim();
            debug!(claimed, "Claimed open pages");
        }

        info!(
            version = %self.worker.version(),
            deleted = report.deleted.len(),
            "Activated"
        );
        Ok(Some(report))
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Answer a page request. Uncontrolled requests and anything the worker
    /// passes through go straight to the network.
    pub async fn fetch(&self, mut request: Request) -> Result<Response> {
        let Some(controller) = self.controller()? else {
            debug!(url = %request.url, "No active worker, using network");
            return self.send(&request).await;
        };

        if self.registration.navigation_preload_enabled
            && request.is_navigation()
            && matches!(request.preload, NavigationPreload::NotRequested)
        {
            request.preload = controller.preload(&request).await;
        }

        match self.dispatch.dispatch(&controller, WorkerEvent::Fetch(request)).await {
            EventOutcome::Fetched(FetchOutcome::Respond(response)) => Ok(response),
            EventOutcome::Fetched(FetchOutcome::Passthrough(request)) => self.send(&request).await,
            other => Err(anyhow::anyhow!("Fetch handler returned {:?}", other)),
        }
    }

    /// Worker of the active generation. Until this host's generation
    /// activates, pages keep being served by the older one and its bucket.
    fn controller(&self) -> Result<Option<Arc<OfflineCacheManager>>> {
        let Some(active) = self.registration.active.as_ref() else {
            return Ok(None);
        };
        if active.version == self.worker.version() {
            return Ok(Some(Arc::clone(&self.worker)));
        }

        debug!(active = %active.version, current = %self.worker.version(), "Serving through the active generation");
        let worker = self.worker.for_generation(&active.version, &active.cache_name)?;
        Ok(Some(Arc::new(worker)))
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        Ok(self.worker.network().fetch(request, CacheMode::Default).await?)
    }

    // =========================================================================
    // Messages and clients
    // =========================================================================

    /// Deliver a message posted by a page; returns the worker's reply.
    pub async fn message(&mut self, data: Value) -> Result<Option<WorkerReply>> {
        let outcome = match self.dispatch.dispatch(&self.worker, WorkerEvent::Message(data)).await {
            EventOutcome::Messaged(outcome) => outcome,
            other => return Err(anyhow::anyhow!("Message handler returned {:?}", other)),
        };

        if outcome.skip_waiting {
            if self.registration.request_skip_waiting() {
                self.try_activate().await?;
            } else {
                debug!("Skip waiting requested with nothing waiting");
            }
        }
        Ok(outcome.reply)
    }

    pub fn open_client(&mut self, url: Url) -> String {
        self.registration.open_client(url)
    }

    /// Close a page; the last page of the old generation closing lets a
    /// waiting generation activate.
    pub async fn close_client(&mut self, id: &str) -> Result<Option<ActivateReport>> {
        if self.registration.close_client(id).is_none() {
            warn!(client = id, "Unknown client closed");
        }
        self.try_activate().await
    }

    /// Wait for in-flight events and background refreshes to settle.
    pub async fn shutdown(&self) {
        self.worker.tasks().flush().await;
    }
}
