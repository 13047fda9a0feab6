//! Error types shared by the hosted (PostgREST + Realtime) storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`RestDaoError`] failures.
pub type RestResult<T> = Result<T, RestDaoError>;

/// Failures that can occur while talking to the hosted store.
#[derive(Debug, Error)]
pub enum RestDaoError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build store HTTP client")]
    ClientBuilder {
        /// Underlying failure.
        #[source]
        source: reqwest::Error,
    },
    /// The configured endpoint is not an http(s) URL.
    #[error("invalid store url `{url}`")]
    InvalidUrl {
        /// Offending value.
        url: String,
    },
    /// A request could not be sent.
    #[error("failed to send store request to `{path}`")]
    RequestSend {
        /// Request path below the REST root.
        path: String,
        /// Underlying failure.
        #[source]
        source: reqwest::Error,
    },
    /// The store answered with an error status; `message` is its own description.
    #[error("store returned {status} for `{path}`: {message}")]
    RequestStatus {
        /// Request path below the REST root.
        path: String,
        /// HTTP status returned.
        status: StatusCode,
        /// Error message from the response body.
        message: String,
    },
    /// Response payload could not be parsed into the expected rows.
    #[error("failed to decode store response for `{path}`")]
    DecodeResponse {
        /// Request path below the REST root.
        path: String,
        /// Underlying failure.
        #[source]
        source: reqwest::Error,
    },
    /// A write asked for the representation back but none was returned.
    #[error("store returned no row for `{path}`")]
    EmptyRepresentation {
        /// Request path below the REST root.
        path: String,
    },
    /// The realtime websocket could not be opened.
    #[error("failed to open realtime channel `{topic}`")]
    RealtimeConnect {
        /// Channel topic.
        topic: String,
        /// Underlying failure.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// A frame could not be written to the realtime websocket.
    #[error("failed to write to realtime channel `{topic}`")]
    RealtimeSend {
        /// Channel topic.
        topic: String,
        /// Underlying failure.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

impl RestDaoError {
    /// Whether the store itself refused the request (as opposed to being unreachable).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RestDaoError::RequestStatus { status, .. }
                if status.is_client_error()
                    && *status != StatusCode::UNAUTHORIZED
                    && *status != StatusCode::FORBIDDEN
        )
    }

    /// The store's own error message, when it sent one.
    pub fn store_message(&self) -> Option<&str> {
        match self {
            RestDaoError::RequestStatus { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}
