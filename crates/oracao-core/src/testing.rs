//! Scripted network for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{Result, WorkerError};
use crate::models::{CacheMode, Request, Response};
use crate::net::Network;

pub const BASE_URL: &str = "http://localhost:8080/";

pub fn url(path: &str) -> Url {
    Url::parse(BASE_URL).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Route {
    Respond(Response),
    /// Fails the way an unreachable host does.
    Offline,
    /// Never answers.
    Hang,
}

/// Answers from a fixed routing table; unknown URLs behave as offline.
#[derive(Default)]
pub struct StubNetwork {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<(String, CacheMode)>>,
}

impl StubNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) -> &Self {
        self.route(path, Route::Respond(Response::new(status, body)))
    }

    pub fn offline(&self, path: &str) -> &Self {
        self.route(path, Route::Offline)
    }

    pub fn hang(&self, path: &str) -> &Self {
        self.route(path, Route::Hang)
    }

    fn route(&self, path: &str, route: Route) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), route);
        self
    }

    pub fn calls(&self) -> Vec<(String, CacheMode)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls().iter().filter(|(u, _)| *u == target).count()
    }
}

#[async_trait]
impl Network for StubNetwork {
    async fn fetch(&self, request: &Request, cache: CacheMode) -> Result<Response> {
        let key = request.url.to_string();
        self.calls.lock().unwrap().push((key.clone(), cache));
        let route = self.routes.lock().unwrap().get(&key).cloned();

        match route {
            Some(Route::Respond(response)) => Ok(response),
            Some(Route::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Some(Route::Offline) | None => Err(WorkerError::Timeout {
                url: key,
                elapsed: Duration::ZERO,
            }),
        }
    }
}
