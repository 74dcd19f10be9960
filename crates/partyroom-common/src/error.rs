//! Error types for partyroom.
//!
//! This module defines the error taxonomy shared by every crate:
//! - [`PartyError`]: Errors raised by the runtime, router and host
//! - [`HandlerError`]: Errors returned by user-supplied worker handlers and hooks
//!
//! Only [`PartyError::Configuration`] is allowed to stop a room from ever
//! serving traffic. Every other variant is recovered at the boundary where it
//! occurs (a close frame, a 500, or a 401) and logged.

use std::io;

use thiserror::Error;

/// Top-level partyroom errors.
#[derive(Error, Debug)]
pub enum PartyError {
    /// A worker definition or binding is malformed.
    ///
    /// Detected when the host is built, before any request is served.
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Description of what is malformed.
        reason: String,
    },

    /// Accepting a socket or running `onConnect` failed.
    ///
    /// Surfaced to the client as a close frame, never as an HTTP status.
    #[error("Connect error: {message}")]
    Connect {
        /// Message carried as the close reason.
        message: String,
    },

    /// `onRequest` failed.
    #[error("Request error: {message}")]
    Request {
        /// Message carried in the response body.
        message: String,
        /// Status code supplied by the handler, if any.
        code: Option<u16>,
    },

    /// An edge hook (`onBeforeConnect` / `onBeforeRequest`) rejected the request.
    #[error("Unauthorized: {message}")]
    AuthHook {
        /// Message carried in the 401 body.
        message: String,
    },

    /// The path named a party that has no binding.
    #[error("Party not found: {party}")]
    PartyNotFound {
        /// The party name from the path.
        party: String,
    },

    /// The host could not produce an instance for an address.
    #[error("Room unavailable: {address}")]
    RoomUnavailable {
        /// The address that could not be served.
        address: String,
    },

    /// A socket operation failed (send on a closed socket, double accept).
    #[error("Socket error: {reason}")]
    Socket {
        /// Description of the failure.
        reason: String,
    },

    /// An attachment or storage value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PartyError {
    /// Create a new `Configuration` error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a new `Connect` error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a new `Request` error without an explicit status.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new `AuthHook` error.
    pub fn auth_hook(message: impl Into<String>) -> Self {
        Self::AuthHook {
            message: message.into(),
        }
    }

    /// Create a new `PartyNotFound` error.
    pub fn party_not_found(party: impl Into<String>) -> Self {
        Self::PartyNotFound {
            party: party.into(),
        }
    }

    /// Create a new `RoomUnavailable` error.
    pub fn room_unavailable(address: impl Into<String>) -> Self {
        Self::RoomUnavailable {
            address: address.into(),
        }
    }

    /// Create a new `Socket` error.
    pub fn socket(reason: impl Into<String>) -> Self {
        Self::Socket {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is a load-time configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// The message a client should see for this error.
    ///
    /// Unlike `Display`, this omits the variant prefix so that handler
    /// messages reach close reasons and response bodies verbatim.
    pub fn client_message(&self) -> String {
        match self {
            Self::Configuration { reason } | Self::Socket { reason } => reason.clone(),
            Self::Connect { message }
            | Self::Request { message, .. }
            | Self::AuthHook { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// HTTP status used when this error is turned into a response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Request { code: Some(code), .. } => *code,
            Self::AuthHook { .. } => 401,
            Self::PartyNotFound { .. } => 404,
            Self::RoomUnavailable { .. } => 503,
            _ => 500,
        }
    }
}

/// Error returned from user handlers and edge hooks.
///
/// The optional `code` is honoured when the error escapes `onRequest`,
/// letting a handler choose the status of the recovered response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable message.
    pub message: String,
    /// Optional numeric status code.
    pub code: Option<u16>,
}

impl HandlerError {
    /// Create a handler error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a status code.
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Error used when a worker has no handler for a required event.
    pub fn missing_handler(name: &str) -> Self {
        Self::new(format!("No {name} handler defined for party"))
    }

    /// Recover as a [`PartyError::Request`].
    pub fn into_request_error(self) -> PartyError {
        PartyError::Request {
            message: self.message,
            code: self.code,
        }
    }

    /// Recover as a [`PartyError::Connect`].
    pub fn into_connect_error(self) -> PartyError {
        PartyError::connect(self.message)
    }

    /// Recover as a [`PartyError::AuthHook`].
    pub fn into_auth_error(self) -> PartyError {
        PartyError::auth_hook(self.message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<PartyError> for HandlerError {
    fn from(err: PartyError) -> Self {
        let code = match &err {
            PartyError::Request { code, .. } => *code,
            _ => None,
        };
        Self {
            message: err.client_message(),
            code,
        }
    }
}
