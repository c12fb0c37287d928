//! Transfer driver: moves records through the chunked send loop.
//!
//! This crate holds the **business logic** of a backup run. It has no HTTP
//! dependency of its own; the binary hands it an [`ArchiveConnection`]
//! (implemented for `ArchiveClient`) and tests use scripted mocks.
//!
//! # Pass
//!
//! 1. **Cleanup**: close finished transfers: mark the remote resource
//!    finished, confirm the last chunk, remove the staged copy and record
//! 2. **Prune**: drop pending records whose source disappeared
//! 3. **Stage**: make a verified private copy of each source
//! 4. **Advance**: send chunks in order, persisting after each one

pub mod cleanup;
pub mod connection;
pub mod driver;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod types;

#[cfg(test)]
mod testing;

pub use cleanup::cleanup_record;
pub use connection::ArchiveConnection;
pub use driver::TransferDriver;
pub use error::TransferFailure;
pub use locks::{RecordGuard, RecordLocks};
pub use orchestrator::Orchestrator;
pub use types::{Advance, Completion, OrchestratorConfig, PassSummary, TransferEvent};
