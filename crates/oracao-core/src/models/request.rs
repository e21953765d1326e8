use reqwest::Method;
use url::Url;

use super::Response;

/// Whether a request is a page navigation or a subresource load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    #[default]
    Subresource,
}

/// How the network client should treat intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Revalidate with the origin (`Cache-Control: no-cache`).
    NoCache,
}

/// Result of a network fetch the host started for a navigation before the
/// worker saw the request.
#[derive(Debug, Clone, Default)]
pub enum NavigationPreload {
    #[default]
    NotRequested,
    Ready(Response),
    Failed(String),
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub preload: NavigationPreload,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::Subresource,
            headers: Vec::new(),
            body: None,
            preload: NavigationPreload::NotRequested,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A GET for a page the user navigated to.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Cache key: the absolute URL without its fragment. Only GETs are
    /// stored, so the method is not part of the key.
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.url)
    }
}

pub fn cache_key_for(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_drops_fragment() {
        let url = Url::parse("http://localhost:8080/index.html#oracao-da-manha").unwrap();
        let request = Request::get(url);
        assert_eq!(request.cache_key(), "http://localhost:8080/index.html");
    }

    #[test]
    fn test_cache_key_keeps_query() {
        let url = Url::parse("http://localhost:8080/icons/icon-192.png?v=2").unwrap();
        assert_eq!(
            Request::get(url).cache_key(),
            "http://localhost:8080/icons/icon-192.png?v=2"
        );
    }

    #[test]
    fn test_navigate_is_get() {
        let request = Request::navigate(Url::parse("http://localhost:8080/").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
    }
}
