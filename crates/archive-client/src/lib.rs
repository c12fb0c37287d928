//! HTTP client for the remote archive endpoint.
//!
//! One [`ArchiveClient`] wraps one pooled `reqwest::Client`. Every call goes
//! through [`ArchiveClient::send`], which retries within the call up to a
//! bound with capped exponential backoff; the named operations are thin
//! bindings that fix the method and resource path.

pub mod client;
pub mod retry;

pub use client::{ArchiveClient, ClientConfig, Error, Response};
pub use retry::RetryPolicy;
