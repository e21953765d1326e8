use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control messages a page may post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SkipWaiting,
    CheckVersion,
}

impl ClientMessage {
    /// Parse posted message data. Anything that is not a recognized
    /// `{ "type": ... }` object yields `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Messages the worker posts back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerReply {
    #[serde(rename = "SW_VERSION")]
    Version { version: String },
}
