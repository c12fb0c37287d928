//! Resource-path conventions of the archive endpoint.
//!
//! Paths are relative to the base URL and carry no leading slash; the client
//! joins them as `base_url + "/" + path`. Identifiers are appended directly to
//! the collection name (`backup<id>`, `chunks<id>/<index>`), which is what the
//! endpoint routes on.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters escaped inside an identifier segment. Unreserved URL
/// characters stay as-is so UUIDs and hashes are sent verbatim.
const ID_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Liveness / connectivity resource.
pub const TEST: &str = "test";

/// Session resource.
pub const SESSIONS: &str = "sessions";

/// Backup collection (create).
pub const BACKUP: &str = "backup";

fn encode_id(id: &str) -> String {
    utf8_percent_encode(id, ID_ESCAPE).to_string()
}

/// `backup<id>`: read or update one backup resource.
pub fn backup(id: &str) -> String {
    format!("{BACKUP}{}", encode_id(id))
}

/// `chunks<id>`: most recent chunk status of a backup.
pub fn chunks(id: &str) -> String {
    format!("chunks{}", encode_id(id))
}

/// `chunks<id>/<index>`: one chunk of a backup.
pub fn chunk(id: &str, index: u64) -> String {
    format!("chunks{}/{index}", encode_id(id))
}
