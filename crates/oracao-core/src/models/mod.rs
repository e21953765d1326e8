//! Request, response and message types exchanged between the host and the
//! worker.

pub mod message;
pub mod request;
pub mod response;

pub use message::{ClientMessage, WorkerReply};
pub use request::{cache_key_for, CacheMode, NavigationPreload, Request, RequestMode};
pub use response::{Response, ResponseSource};
