//! HTTP request value handed to rooms and hooks.
//!
//! [`RoomRequest`] is transport-neutral: the server crate builds one from an
//! axum request, and party stubs build them directly when one room calls
//! another.

use bytes::Bytes;
use url::Url;

use partyroom_common::PartyError;

/// An HTTP request addressed to a room.
#[derive(Debug, Clone)]
pub struct RoomRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Request headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Bytes,
}

impl RoomRequest {
    /// Create a new request with no headers and an empty body.
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Create a `GET` request.
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    /// Create a WebSocket upgrade request.
    pub fn websocket(url: &str) -> Self {
        Self::get(url)
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing any existing values (case-insensitive).
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if this request asks for a WebSocket upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// Parse the request URL.
    ///
    /// # Errors
    ///
    /// Returns a request error if the URL is not absolute or malformed.
    pub fn parsed_url(&self) -> Result<Url, PartyError> {
        Url::parse(&self.url).map_err(|e| PartyError::Request {
            message: format!("Invalid request URL '{}': {e}", self.url),
            code: Some(400),
        })
    }

    /// Value of a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let url = self.parsed_url().ok()?;
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Body as UTF-8 text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
