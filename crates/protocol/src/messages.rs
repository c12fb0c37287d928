use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Starts an authenticated session (`POST /sessions`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub hash: String,
    pub username: String,
}

/// Session token returned by the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    #[serde(alias = "session")]
    pub token: String,
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

/// A backup resource on the remote side, one per transferred file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub file_hash: String,
    pub size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub total_chunks: u64,
    #[serde(default)]
    pub finished: bool,
}

/// Response to a create request (`POST /backup`).
///
/// Some deployments return the id as a JSON number; both forms are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedResource {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Body of `PUT /chunks<id>/<index>`.
///
/// `data` is already transport-encoded (base64) and `checksum` is computed
/// over that encoded text, so the receiver verifies before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkUpload {
    pub index: u64,
    pub size: u64,
    pub data: String,
    pub checksum: String,
}

/// Most recent chunk received for a backup (`GET /chunks<id>`).
///
/// `index` is absent until the first chunk has been stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
}

impl ChunkStatus {
    /// Returns `true` once the remote side holds every chunk of a backup
    /// with `total_chunks` chunks.
    pub fn covers(&self, total_chunks: u64) -> bool {
        match (total_chunks, self.index) {
            (0, _) => true,
            (total, Some(index)) => index.saturating_add(1) >= total,
            (_, None) => false,
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
