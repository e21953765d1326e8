//! Fetch routing: which of cache and network answers a request.

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info, warn};

use super::OfflineCacheManager;
use crate::config::RoutingPolicy;
use crate::error::WorkerError;
use crate::models::{cache_key_for, CacheMode, NavigationPreload, Request, Response, ResponseSource};
use crate::net::Network;
use crate::storage::CacheStorage;

/// Result of intercepting one request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker answers with this response.
    Respond(Response),
    /// Not intercepted: the host sends the request as if no worker existed.
    Passthrough(Request),
}

impl OfflineCacheManager {
    /// Route one intercepted request. Only GETs are intercepted; every GET
    /// gets some response, degraded to a placeholder if need be.
    pub async fn fetch(&self, request: Request) -> FetchOutcome {
        if request.method != Method::GET {
            debug!(method = %request.method, url = %request.url, "Passing request through");
            return FetchOutcome::Passthrough(request);
        }

        let response = match self.config.routing {
            RoutingPolicy::Split if request.is_navigation() => self.network_first(request).await,
            RoutingPolicy::Split => self.stale_while_revalidate(request).await,
            RoutingPolicy::Uniform => self.cache_first(request).await,
        };
        FetchOutcome::Respond(response)
    }

    /// Navigations: live response if the network answers in time, else the
    /// cached document, else the offline page.
    async fn network_first(&self, mut request: Request) -> Response {
        let live = match std::mem::take(&mut request.preload) {
            NavigationPreload::Ready(response) => Ok(response.with_source(ResponseSource::Preload)),
            NavigationPreload::Failed(reason) => Err(reason),
            NavigationPreload::NotRequested => self
                .fetch_with_timeout(&request)
                .await
                .map_err(|e| e.to_string()),
        };

        let document_key = match self.resolve(&self.config.document_path) {
            Ok(url) => cache_key_for(&url),
            Err(e) => {
                warn!(path = %self.config.document_path, error = %e, "Invalid document path");
                request.cache_key()
            }
        };

        match live {
            Ok(response) if response.is_ok() => {
                self.store(&document_key, &response).await;
                response
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Navigation answered with error status");
                response
            }
            Err(reason) => {
                warn!(url = %request.url, error = %reason, "Navigation failed, serving from cache");
                let mut candidates = vec![request.cache_key()];
                if !candidates.contains(&document_key) {
                    candidates.push(document_key);
                }
                for key in &candidates {
                    if let Some(cached) = self.lookup(key).await {
                        return cached;
                    }
                }
                info!(url = %request.url, "No cached document, serving offline page");
                Response::offline_document()
            }
        }
    }

    /// Static assets: cached copy now, refreshed in the background; on a miss
    /// wait for the network.
    async fn stale_while_revalidate(&self, request: Request) -> Response {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key).await {
            self.revalidate_in_background(request);
            return cached;
        }

        match self.network.fetch(&request, CacheMode::Default).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store(&key, &response).await;
                }
                response
            }
            Err(e) => {
                self.log_network_failure(&request, &e);
                Response::gateway_timeout()
            }
        }
    }

    /// One policy for every GET. The document is only ever refreshed in the
    /// background, so a stale page may be served until the next visit.
    async fn cache_first(&self, request: Request) -> Response {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key).await {
            self.revalidate_in_background(request);
            return cached;
        }

        match self.network.fetch(&request, CacheMode::Default).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store(&key, &response).await;
                }
                response
            }
            Err(e) => {
                self.log_network_failure(&request, &e);
                let fallback = match self.resolve(&self.config.offline_fallback) {
                    Ok(url) => self.lookup(&cache_key_for(&url)).await,
                    Err(_) => None,
                };
                fallback.unwrap_or_else(Response::gateway_timeout)
            }
        }
    }

    /// Current-generation lookup. Storage failures count as a miss.
    async fn lookup(&self, key: &str) -> Option<Response> {
        match self.storage.match_entry(&self.cache_name, key).await {
            Ok(entry) => entry.map(|cached| cached.data.with_source(ResponseSource::Cache)),
            Err(e) => {
                warn!(cache = %self.cache_name, key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn store(&self, key: &str, response: &Response) {
        if let Err(e) = self.storage.put(&self.cache_name, key, response).await {
            warn!(cache = %self.cache_name, key, error = %e, "Failed to store response");
        }
    }

    fn log_network_failure(&self, request: &Request, error: &WorkerError) {
        if error.is_offline() {
            debug!(url = %request.url, error = %error, "Network unavailable");
        } else {
            warn!(url = %request.url, error = %error, "Network fetch failed");
        }
    }

    /// Refresh a cached entry without holding up the response already
    /// returned. Only a 2xx answer overwrites the entry.
    fn revalidate_in_background(&self, request: Request) {
        let storage: Arc<dyn CacheStorage> = Arc::clone(&self.storage);
        let network: Arc<dyn Network> = Arc::clone(&self.network);
        let cache_name = self.cache_name.clone();

        self.tasks.spawn(async move {
            let key = request.cache_key();
            match network.fetch(&request, CacheMode::Default).await {
                Ok(fresh) if fresh.is_ok() => {
                    match storage.put(&cache_name, &key, &fresh).await {
                        Ok(()) => debug!(key = %key, "Revalidated cache entry"),
                        Err(e) => warn!(key = %key, error = %e, "Failed to store revalidated entry"),
                    }
                }
                Ok(fresh) => debug!(key = %key, status = fresh.status, "Revalidation kept cached entry"),
                Err(e) => debug!(key = %key, error = %e, "Revalidation failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::storage::MemoryStorage;
    use crate::testing::{url, StubNetwork, BASE_URL};

    const CACHE: &str = "oracao-cache-v1.1.0";

    fn config() -> WorkerConfig {
        WorkerConfig {
            base_url: BASE_URL.to_string(),
            ..Default::default()
        }
    }

    fn worker_with(
        config: WorkerConfig,
        storage: &Arc<MemoryStorage>,
        network: &Arc<StubNetwork>,
    ) -> OfflineCacheManager {
        OfflineCacheManager::new(config, storage.clone(), network.clone()).unwrap()
    }

    fn respond(outcome: FetchOutcome) -> Response {
        match outcome {
            FetchOutcome::Respond(response) => response,
            FetchOutcome::Passthrough(request) => panic!("unexpected passthrough of {}", request.url),
        }
    }

    async fn seed(storage: &MemoryStorage, path: &str, body: &str) {
        storage
            .put(CACHE, url(path).as_str(), &Response::new(200, body))
            .await
            .unwrap();
    }

    async fn cached_body(storage: &MemoryStorage, path: &str) -> Option<Vec<u8>> {
        storage
            .match_entry(CACHE, url(path).as_str())
            .await
            .unwrap()
            .map(|c| c.data.body)
    }

    #[tokio::test]
    async fn test_non_get_passes_through_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        let worker = worker_with(config(), &storage, &network);

        let request = Request::new(Method::POST, url("./tts"))
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"text":"Ave Maria"}"#);

        match worker.fetch(request).await {
            FetchOutcome::Passthrough(request) => {
                assert_eq!(request.method, Method::POST);
                assert_eq!(request.body.as_deref(), Some(br#"{"text":"Ave Maria"}"#.as_slice()));
                assert_eq!(request.headers.len(), 1);
            }
            FetchOutcome::Respond(_) => panic!("POST must not be intercepted"),
        }
        assert!(network.calls().is_empty());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_asset_served_without_waiting_on_network() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.hang("./icons/icon-192.png");
        seed(&storage, "./icons/icon-192.png", "cached-png").await;
        let worker = worker_with(config(), &storage, &network);

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            worker.fetch(Request::get(url("./icons/icon-192.png"))),
        )
        .await
        .expect("cached response must not wait on the network");

        let response = respond(outcome);
        assert_eq!(response.body, b"cached-png");
        assert_eq!(response.source, ResponseSource::Cache);
        // refresh is still in flight
        assert_eq!(worker.tasks().pending(), 1);
    }

    #[tokio::test]
    async fn test_background_refresh_updates_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./manifest.webmanifest", 200, "fresh");
        seed(&storage, "./manifest.webmanifest", "stale").await;
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::get(url("./manifest.webmanifest"))).await);
        assert_eq!(response.body, b"stale");

        worker.tasks().flush().await;
        assert_eq!(network.calls_to("./manifest.webmanifest"), 1);
        assert_eq!(cached_body(&storage, "./manifest.webmanifest").await, Some(b"fresh".to_vec()));

        // the next request sees the refreshed copy
        let response = respond(worker.fetch(Request::get(url("./manifest.webmanifest"))).await);
        assert_eq!(response.body, b"fresh");
    }

    #[tokio::test]
    async fn test_background_refresh_ignores_error_status() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./icons/canal.png", 500, "oops");
        seed(&storage, "./icons/canal.png", "good").await;
        let worker = worker_with(config(), &storage, &network);

        respond(worker.fetch(Request::get(url("./icons/canal.png"))).await);
        worker.tasks().flush().await;

        assert_eq!(cached_body(&storage, "./icons/canal.png").await, Some(b"good".to_vec()));
    }

    #[tokio::test]
    async fn test_asset_miss_fetches_and_stores() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./icons/icon-512.png", 200, "png");
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::get(url("./icons/icon-512.png"))).await);
        assert_eq!(response.status, 200);
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(cached_body(&storage, "./icons/icon-512.png").await, Some(b"png".to_vec()));
    }

    #[tokio::test]
    async fn test_asset_miss_error_status_not_stored() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./missing.js", 404, "not found");
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::get(url("./missing.js"))).await);
        assert_eq!(response.status, 404);
        assert!(cached_body(&storage, "./missing.js").await.is_none());
    }

    #[tokio::test]
    async fn test_asset_miss_offline_is_504() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::get(url("./icons/icon-512.png"))).await);
        assert_eq!(response.status, 504);
        assert_eq!(response.source, ResponseSource::Placeholder);
    }

    #[tokio::test]
    async fn test_navigation_online_stores_document() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./", 200, "<html>live</html>");
        seed(&storage, "./", "<html>old</html>").await;
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::navigate(url("./"))).await);
        assert_eq!(response.body, b"<html>live</html>");
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(cached_body(&storage, "./").await, Some(b"<html>live</html>".to_vec()));
        assert_eq!(worker.tasks().pending(), 0);
    }

    #[tokio::test]
    async fn test_navigation_offline_serves_cached_document() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        seed(&storage, "./", "<html>saved</html>").await;
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::navigate(url("./?dia=domingo"))).await);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<html>saved</html>");
        assert_eq!(response.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_navigation_offline_cold_is_503() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::navigate(url("./"))).await);
        assert_eq!(response.status, 503);
        assert!(String::from_utf8_lossy(&response.body).contains("offline"));
    }

    #[tokio::test]
    async fn test_navigation_hung_network_times_out_to_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.hang("./");
        seed(&storage, "./", "<html>saved</html>").await;
        let config = WorkerConfig {
            navigation_timeout_ms: 50,
            ..config()
        };
        let worker = worker_with(config, &storage, &network);

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            worker.fetch(Request::navigate(url("./"))),
        )
        .await
        .expect("navigation must be bounded by the timeout");
        assert_eq!(respond(response).body, b"<html>saved</html>");
    }

    #[tokio::test]
    async fn test_navigation_uses_preload_response() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        let worker = worker_with(config(), &storage, &network);

        let mut request = Request::navigate(url("./"));
        request.preload = NavigationPreload::Ready(Response::new(200, "<html>preloaded</html>"));

        let response = respond(worker.fetch(request).await);
        assert_eq!(response.source, ResponseSource::Preload);
        assert!(network.calls().is_empty());
        assert_eq!(cached_body(&storage, "./").await, Some(b"<html>preloaded</html>".to_vec()));
    }

    #[tokio::test]
    async fn test_navigation_failed_preload_falls_back_without_refetch() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        seed(&storage, "./", "<html>saved</html>").await;
        let worker = worker_with(config(), &storage, &network);

        let mut request = Request::navigate(url("./"));
        request.preload = NavigationPreload::Failed("connection refused".to_string());

        let response = respond(worker.fetch(request).await);
        assert_eq!(response.body, b"<html>saved</html>");
        assert!(network.calls().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_error_status_returned_unstored() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./", 500, "server error");
        seed(&storage, "./", "<html>saved</html>").await;
        let worker = worker_with(config(), &storage, &network);

        let response = respond(worker.fetch(Request::navigate(url("./"))).await);
        assert_eq!(response.status, 500);
        assert_eq!(cached_body(&storage, "./").await, Some(b"<html>saved</html>".to_vec()));
    }

    #[tokio::test]
    async fn test_uniform_policy_serves_cached_document_offline() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        seed(&storage, "./index.html", "<html>index</html>").await;
        let config = WorkerConfig {
            routing: RoutingPolicy::Uniform,
            ..config()
        };
        let worker = worker_with(config, &storage, &network);

        let response = respond(worker.fetch(Request::navigate(url("./oracoes"))).await);
        assert_eq!(response.body, b"<html>index</html>");

        let response = respond(worker.fetch(Request::get(url("./app.js"))).await);
        assert_eq!(response.body, b"<html>index</html>");
    }

    #[tokio::test]
    async fn test_uniform_policy_serves_cached_document_first() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        network.respond("./", 200, "<html>new</html>");
        seed(&storage, "./", "<html>old</html>").await;
        let config = WorkerConfig {
            routing: RoutingPolicy::Uniform,
            ..config()
        };
        let worker = worker_with(config, &storage, &network);

        let response = respond(worker.fetch(Request::navigate(url("./"))).await);
        assert_eq!(response.body, b"<html>old</html>");

        worker.tasks().flush().await;
        assert_eq!(cached_body(&storage, "./").await, Some(b"<html>new</html>".to_vec()));
    }

    #[tokio::test]
    async fn test_uniform_policy_cold_offline_is_504() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(StubNetwork::new());
        let config = WorkerConfig {
            routing: RoutingPolicy::Uniform,
            ..config()
        };
        let worker = worker_with(config, &storage, &network);

        let response = respond(worker.fetch(Request::get(url("./app.js"))).await);
        assert_eq!(response.status, 504);
    }
}
