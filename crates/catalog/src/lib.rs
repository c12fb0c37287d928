//! Backup catalog: where transfer records live between passes.
//!
//! The catalog is the only shared mutable state of a transfer run. Every
//! update replaces one whole record; [`JsonCatalog`] rewrites its file
//! atomically on each change so a crash never leaves a torn catalog.
//!
//! Staging copies live next to it in [`staging`]: a private, verified copy
//! of each source file that the driver reads chunks from.

pub mod error;
pub mod register;
pub mod staging;
pub mod store;

pub use error::{CatalogError, StagingError};
pub use register::register_source;
pub use staging::{DirStaging, StagingArea};
pub use store::{BackupCatalog, JsonCatalog, MemoryCatalog};
