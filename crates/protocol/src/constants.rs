use std::fmt;

use serde::{Deserialize, Serialize};

/// Header carrying the session token on authenticated requests.
pub const SESSION_HEADER: &str = "X-Session-Token";

/// Content type of every request body.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP status that marks a data operation (backup/chunk) as successful.
pub const STATUS_OK: u16 = 200;

/// Additional status accepted by the liveness check.
pub const STATUS_ACCEPTED: u16 = 202;

/// HTTP method used against an archive resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Returns the canonical upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data operations succeed on exactly HTTP 200.
pub fn is_data_success(status: u16) -> bool {
    status == STATUS_OK
}

/// The liveness check succeeds on HTTP 200 or 202.
pub fn is_liveness_success(status: u16) -> bool {
    status == STATUS_OK || status == STATUS_ACCEPTED
}
