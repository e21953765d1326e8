//! Network access for the worker.
//!
//! The worker only needs one primitive: send a request, get a response back
//! (any status) or an error when the network could not answer.

pub mod client;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CacheMode, Request, Response};

pub use client::HttpNetwork;

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request, cache: CacheMode) -> Result<Response>;
}
