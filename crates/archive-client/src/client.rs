//! Archive endpoint client.
//!
//! Async HTTP client using `reqwest`, with the session token carried in
//! [`SESSION_HEADER`] on authenticated requests.

use std::time::Duration;

use chunkferry_protocol::constants::CONTENT_TYPE_JSON;
use chunkferry_protocol::{
    BackupResource, ChunkStatus, ChunkUpload, CreatedResource, Method, SESSION_HEADER,
    SessionRequest, SessionResponse, is_data_success, is_liveness_success, paths,
};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::retry::RetryPolicy;

/// Errors from the archive client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session token")]
    InvalidToken,

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Connection settings consumed by the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the archive endpoint, without trailing slash.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Attempts per request (the in-call retry budget). Zero is treated as one.
    pub request_retries: u32,
    pub retry_policy: RetryPolicy,
}

impl ClientConfig {
    /// Settings with default timeouts and retry budget for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            request_retries: 3,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Raw response of the last attempt of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    /// Exactly HTTP 200.
    pub fn is_success(&self) -> bool {
        is_data_success(self.status)
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Converts a non-200 response into [`Error::Api`].
    fn require_success(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_api_error())
        }
    }

    fn into_api_error(self) -> Error {
        Error::Api {
            status: self.status,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// Archive endpoint client. Cheap to share behind an `Arc`; the inner
/// `reqwest::Client` pools connections.
pub struct ArchiveClient {
    http: reqwest::Client,
    base_url: String,
    request_retries: u32,
    retry_policy: RetryPolicy,
    session_token: Option<String>,
}

impl ArchiveClient {
    /// Creates a new client from connection settings.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidBaseUrl(config.base_url));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            request_retries: config.request_retries.max(1),
            retry_policy: config.retry_policy,
            session_token: None,
        })
    }

    /// Attaches a session token to every authenticated operation.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Session token currently attached, if any.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Attempts per request used by the named operations.
    pub fn request_retries(&self) -> u32 {
        self.request_retries
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a JSON request to `base_url + "/" + resource_path`.
    ///
    /// Retries up to `max_attempts` times within this call while the response
    /// is not exactly HTTP 200 or no response arrived at all, sleeping per the
    /// retry policy between attempts. HTTP-level failure is reported through
    /// [`Response::status`]; `Err` means no attempt produced a response.
    pub async fn send(
        &self,
        resource_path: &str,
        body: Option<&serde_json::Value>,
        method: Method,
        auth_token: Option<&str>,
        max_attempts: u32,
    ) -> Result<Response, Error> {
        self.send_until(
            resource_path,
            body,
            method,
            auth_token,
            max_attempts,
            is_data_success,
        )
        .await
    }

    async fn send_until(
        &self,
        resource_path: &str,
        body: Option<&serde_json::Value>,
        method: Method,
        auth_token: Option<&str>,
        max_attempts: u32,
        accept: fn(u16) -> bool,
    ) -> Result<Response, Error> {
        let url = format!("{}/{}", self.base_url, resource_path);
        let payload = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        let token = match auth_token {
            Some(t) => Some(HeaderValue::from_str(t).map_err(|_| Error::InvalidToken)?),
            None => None,
        };

        let attempts = max_attempts.max(1);
        let mut last_response: Option<Response> = None;
        let mut last_error: Option<reqwest::Error> = None;

        for attempt in 1..=attempts {
            let mut request = self
                .http
                .request(to_reqwest_method(method), &url)
                .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
                .header(CONTENT_LENGTH, payload.len())
                .body(payload.clone());
            if let Some(ref value) = token {
                request = request.header(SESSION_HEADER, value.clone());
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = match resp.bytes().await {
                        Ok(b) => b.to_vec(),
                        Err(e) => {
                            warn!(%method, path = resource_path, attempt, error = %e, "failed to read response body");
                            Vec::new()
                        }
                    };
                    trace!(%method, path = resource_path, attempt, status, "archive response");
                    let response = Response { status, body };
                    if accept(status) {
                        return Ok(response);
                    }
                    debug!(%method, path = resource_path, attempt, attempts, status, "request rejected");
                    last_response = Some(response);
                }
                Err(e) => {
                    debug!(%method, path = resource_path, attempt, attempts, error = %e, "request failed");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                let delay = self.retry_policy.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        match (last_response, last_error) {
            (Some(response), _) => Ok(response),
            (None, Some(e)) => Err(Error::Http(e)),
            (None, None) => unreachable!("at least one attempt is always made"),
        }
    }

    // -----------------------------------------------------------------------
    // Named operations
    // -----------------------------------------------------------------------

    /// Checks that the endpoint answers at all (no session header).
    pub async fn check_connectivity(&self) -> Result<(), Error> {
        self.liveness(None).await
    }

    /// Checks that the endpoint answers and accepts the session.
    pub async fn check_liveness(&self) -> Result<(), Error> {
        self.liveness(self.session_token.as_deref()).await
    }

    async fn liveness(&self, token: Option<&str>) -> Result<(), Error> {
        let resp = self
            .send_until(
                paths::TEST,
                None,
                Method::Get,
                token,
                self.request_retries,
                is_liveness_success,
            )
            .await?;
        if is_liveness_success(resp.status) {
            Ok(())
        } else {
            Err(resp.into_api_error())
        }
    }

    /// Starts a session with a credential hash and identity; returns the token.
    pub async fn start_session(&self, hash: &str, username: &str) -> Result<String, Error> {
        let body = serde_json::to_value(SessionRequest {
            hash: hash.to_string(),
            username: username.to_string(),
        })?;
        let resp = self
            .send(
                paths::SESSIONS,
                Some(&body),
                Method::Post,
                None,
                self.request_retries,
            )
            .await?
            .require_success()?;
        let session: SessionResponse = resp.json()?;
        Ok(session.token)
    }

    /// Creates a backup resource; returns its id.
    pub async fn create_backup(&self, resource: &BackupResource) -> Result<String, Error> {
        let body = serde_json::to_value(resource)?;
        let resp = self
            .authenticated(paths::BACKUP, Some(&body), Method::Post)
            .await?;
        let created: CreatedResource = resp.json()?;
        Ok(created.id)
    }

    /// Reads a backup resource.
    pub async fn read_backup(&self, id: &str) -> Result<BackupResource, Error> {
        let resp = self
            .authenticated(&paths::backup(id), None, Method::Get)
            .await?;
        resp.json()
    }

    /// Replaces a backup resource.
    pub async fn update_backup(&self, id: &str, resource: &BackupResource) -> Result<(), Error> {
        let body = serde_json::to_value(resource)?;
        self.authenticated(&paths::backup(id), Some(&body), Method::Put)
            .await?;
        Ok(())
    }

    /// Reads the most recent chunk status of a backup.
    pub async fn read_chunk_status(&self, id: &str) -> Result<ChunkStatus, Error> {
        let resp = self
            .authenticated(&paths::chunks(id), None, Method::Get)
            .await?;
        if resp.body.is_empty() {
            return Ok(ChunkStatus::default());
        }
        resp.json()
    }

    /// Transfers one chunk; HTTP 200 is the endpoint's confirmation.
    pub async fn write_chunk(&self, id: &str, chunk: &ChunkUpload) -> Result<(), Error> {
        let body = serde_json::to_value(chunk)?;
        self.authenticated(&paths::chunk(id, chunk.index), Some(&body), Method::Put)
            .await?;
        Ok(())
    }

    /// Removes one chunk so it is sent again.
    pub async fn delete_chunk(&self, id: &str, index: u64) -> Result<(), Error> {
        self.authenticated(&paths::chunk(id, index), None, Method::Delete)
            .await?;
        Ok(())
    }

    async fn authenticated(
        &self,
        resource_path: &str,
        body: Option<&serde_json::Value>,
        method: Method,
    ) -> Result<Response, Error> {
        self.send(
            resource_path,
            body,
            method,
            self.session_token.as_deref(),
            self.request_retries,
        )
        .await?
        .require_success()
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}
