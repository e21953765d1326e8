//! Core library for the oracao offline cache worker.
//!
//! The worker keeps a versioned cache of the app shell and answers the
//! application's requests from cache, network, or a blend of both, so the
//! app keeps working without a connection.
//!
//! - `worker`: the `OfflineCacheManager` and its install/activate/fetch/message handlers
//! - `dispatch`: explicit event kind → handler table
//! - `host`: drives a worker through its registration lifecycle
//! - `lifecycle`: registration state (installing, waiting, active, clients)
//! - `storage`: cache storage collaborator (memory and disk backed)
//! - `net`: network collaborator (reqwest backed)
//! - `tasks`: completion tracking for events and background refreshes

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod models;
pub mod net;
pub mod storage;
pub mod tasks;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{RoutingPolicy, WorkerConfig};
pub use error::WorkerError;
pub use host::WorkerHost;
pub use worker::OfflineCacheManager;
