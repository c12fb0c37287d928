//! Wire protocol for the remote archive endpoint.
//!
//! Every request is JSON over HTTP against a configured base URL. Resource
//! paths are built by [`paths`]; request and response bodies live in
//! [`messages`]; status-code rules and header names in [`constants`].

pub mod constants;
pub mod messages;
pub mod paths;

// Re-export primary types for convenience.
pub use constants::{Method, SESSION_HEADER, is_data_success, is_liveness_success};
pub use messages::{
    BackupResource, ChunkStatus, ChunkUpload, CreatedResource, SessionRequest, SessionResponse,
};
