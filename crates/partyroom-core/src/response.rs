//! HTTP response value returned by rooms and hooks.

use std::fmt;

use bytes::Bytes;

use crate::socket::SocketHandle;

/// Status code of a successful WebSocket upgrade.
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// An HTTP response produced by a room, a hook or the edge router.
///
/// Upgrade responses carry the `client` end of a socket pair in
/// `web_socket`; the HTTP layer bridges it onto the real connection.
#[derive(Clone)]
pub struct RoomResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// Socket to hand to the client on upgrade.
    pub web_socket: Option<SocketHandle>,
}

impl RoomResponse {
    /// Create a simple text response.
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Bytes::from(body.to_string()),
            web_socket: None,
        }
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
            web_socket: None,
        }
    }

    /// Create an error response with JSON body.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Create an empty response with just a status code.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            web_socket: None,
        }
    }

    /// Create a `101 Switching Protocols` response carrying `socket`.
    pub fn upgrade(socket: SocketHandle) -> Self {
        Self {
            web_socket: Some(socket),
            ..Self::empty(SWITCHING_PROTOCOLS)
        }
    }

    /// Add a header to the response.
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

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns `true` for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Default for RoomResponse {
    fn default() -> Self {
        Self::text(200, "OK")
    }
}

impl fmt::Debug for RoomResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("web_socket", &self.web_socket)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::WebSocketPair;

    #[test]
    fn test_text_response() {
        let resp = RoomResponse::text(200, "Hello, World!");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body_text(), "Hello, World!");
        assert_eq!(resp.header("Content-Type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_error_response() {
        let resp = RoomResponse::error(404, "Not found");
        assert_eq!(resp.status, 404);
        assert!(resp.body_text().contains("Not found"));
        assert!(!resp.is_success());
    }

    #[test]
    fn test_with_header() {
        let resp = RoomResponse::text(200, "OK")
            .with_header("X-Request-Id", "123")
            .with_header("X-Custom", "value");

        assert_eq!(resp.headers.len(), 3);
        assert_eq!(resp.header("x-request-id"), Some("123"));
    }

    #[test]
    fn test_upgrade_response() {
        let pair = WebSocketPair::new();
        let resp = RoomResponse::upgrade(pair.client.clone());
        assert_eq!(resp.status, SWITCHING_PROTOCOLS);
        assert_eq!(resp.web_socket, Some(pair.client));
    }
}
