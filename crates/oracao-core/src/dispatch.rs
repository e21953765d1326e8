//! Explicit event dispatch: each lifecycle event kind maps to one handler.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, trace};

use crate::models::Request;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, MessageOutcome, OfflineCacheManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
}

/// An event delivered by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(Value),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Message(_) => EventKind::Message,
        }
    }
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    Fetched(FetchOutcome),
    Messaged(MessageOutcome),
    /// The handler did not recognize the event it was given.
    Ignored,
}

pub type Handler = for<'a> fn(&'a OfflineCacheManager, WorkerEvent) -> BoxFuture<'a, EventOutcome>;

fn on_install(worker: &OfflineCacheManager, _event: WorkerEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move { EventOutcome::Installed(worker.install().await) })
}

fn on_activate(worker: &OfflineCacheManager, _event: WorkerEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move { EventOutcome::Activated(worker.activate().await) })
}

fn on_fetch(worker: &OfflineCacheManager, event: WorkerEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        match event {
            WorkerEvent::Fetch(request) => EventOutcome::Fetched(worker.fetch(request).await),
            _ => EventOutcome::Ignored,
        }
    })
}

fn on_message(worker: &OfflineCacheManager, event: WorkerEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        match event {
            WorkerEvent::Message(data) => EventOutcome::Messaged(worker.message(&data)),
            _ => EventOutcome::Ignored,
        }
    })
}

pub struct DispatchTable {
    handlers: HashMap<EventKind, Handler>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    /// Table with the worker's four handlers registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<EventKind, Handler> = HashMap::new();
        handlers.insert(EventKind::Install, on_install);
        handlers.insert(EventKind::Activate, on_activate);
        handlers.insert(EventKind::Fetch, on_fetch);
        handlers.insert(EventKind::Message, on_message);
        Self { handlers }
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn remove(&mut self, kind: EventKind) -> Option<Handler> {
        self.handlers.remove(&kind)
    }

    /// Run the handler for `event`. The worker's task tracker is held open
    /// until the handler settles.
    pub async fn dispatch(&self, worker: &OfflineCacheManager, event: WorkerEvent) -> EventOutcome {
        let kind = event.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            debug!(?kind, "No handler registered");
            return EventOutcome::Ignored;
        };

        trace!(?kind, "Dispatching event");
        let _guard = worker.tasks().hold();
        handler(worker, event).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::storage::MemoryStorage;
    use crate::testing::{url, StubNetwork, BASE_URL};
    use serde_json::json;

    fn worker() -> OfflineCacheManager {
        let config = WorkerConfig {
            base_url: BASE_URL.to_string(),
            ..Default::default()
        };
        OfflineCacheManager::new(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(StubNetwork::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_table_registers_all_kinds() {
        let table = DispatchTable::new();
        assert_eq!(table.len(), 4);
        for kind in [EventKind::Install, EventKind::Activate, EventKind::Fetch, EventKind::Message] {
            assert!(table.handles(kind));
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_kind() {
        let worker = worker();
        let table = DispatchTable::new();

        let outcome = table
            .dispatch(&worker, WorkerEvent::Message(json!({"type": "SKIP_WAITING"})))
            .await;
        assert!(matches!(outcome, EventOutcome::Messaged(m) if m.skip_waiting));

        let outcome = table
            .dispatch(&worker, WorkerEvent::Fetch(Request::get(url("./app.js"))))
            .await;
        assert!(matches!(
            outcome,
            EventOutcome::Fetched(FetchOutcome::Respond(r)) if r.status == 504
        ));

        let outcome = table.dispatch(&worker, WorkerEvent::Activate).await;
        assert!(matches!(outcome, EventOutcome::Activated(_)));
        assert_eq!(worker.tasks().pending(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_ignored() {
        let worker = worker();
        let mut table = DispatchTable::new();
        assert!(table.remove(EventKind::Message).is_some());

        let outcome = table
            .dispatch(&worker, WorkerEvent::Message(json!({"type": "SKIP_WAITING"})))
            .await;
        assert!(matches!(outcome, EventOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_handler_given_wrong_event_ignores_it() {
        let worker = worker();
        let outcome = on_fetch(&worker, WorkerEvent::Install).await;
        assert!(matches!(outcome, EventOutcome::Ignored));
    }
}
