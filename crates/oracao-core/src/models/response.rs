use serde::{Deserialize, Serialize};

/// Where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    #[default]
    Network,
    Preload,
    Cache,
    /// Synthesized by the worker because nothing else could answer.
    Placeholder,
}

/// A response body plus the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    /// Stored as base64 so binary assets stay compact on disk.
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    #[serde(skip)]
    pub source: ResponseSource,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: Vec::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Status in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Served for a navigation when neither network nor cache can answer.
    pub fn offline_document() -> Self {
        let body = "<!doctype html>\
            <html lang=\"pt-BR\"><head><meta charset=\"utf-8\"><title>Offline</title></head>\
            <body><h1>Sem conexão</h1>\
            <p>You are offline and this page has not been saved on this device yet.</p>\
            </body></html>";
        Self::new(503, body)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_source(ResponseSource::Placeholder)
    }

    /// Served for a static asset missing from cache while offline.
    pub fn gateway_timeout() -> Self {
        Self::new(504, "Offline: resource unavailable")
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_source(ResponseSource::Placeholder)
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
