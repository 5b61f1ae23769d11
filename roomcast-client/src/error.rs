//! Error types for the session client
//!
//! `SignalError` covers talking to the signaling server, `EngineError` covers
//! the media engine, and `ClientError` is what public operations return.
//! Notifications whose failure must never abort the caller return
//! [`BestEffort`] instead of a `Result`.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ConnectionState, Direction, MediaTag, PeerId};

/// Maximum accepted signaling response body (16 MB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Failure talking to the signaling server.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: reqwest::StatusCode, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Server rejected {endpoint}: {message}")]
    Server { endpoint: &'static str, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Response too large ({size} bytes, max {MAX_RESPONSE_SIZE})")]
    ResponseTooLarge { size: u64 },
}

impl From<reqwest::Error> for SignalError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Failure reported by the media engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unsupported platform: {0}")]
    Unsupported(String),

    #[error("Router capabilities already loaded")]
    AlreadyLoaded,

    #[error("Router capabilities not loaded")]
    NotLoaded,

    #[error("Negotiation rejected: {0}")]
    Negotiation(String),

    #[error("Object closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Signaling error: {0}")]
    Signal(#[from] SignalError),

    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Media engine cannot run on this platform: {0}")]
    UnsupportedDevice(String),

    #[error("Not joined to a room")]
    NotJoined,

    #[error("Already subscribed to {media_tag} of peer {peer_id}")]
    AlreadySubscribed { peer_id: PeerId, media_tag: MediaTag },

    #[error("Media tag {media_tag} is already published")]
    AlreadyPublished { media_tag: MediaTag },

    #[error("{direction} transport lost (state {state})")]
    TransportFailure {
        direction: Direction,
        state: ConnectionState,
    },

    #[error("{direction} transport did not connect within {waited:?}")]
    ConnectionTimeout { direction: Direction, waited: Duration },

    #[error("Session left while the operation was in flight")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Outcome of an operation whose failure is logged but never escalated.
///
/// Deliberately not a `Result`: `?` cannot turn it into a hard error.
#[derive(Debug)]
pub enum BestEffort {
    /// Every step completed
    Done,
    /// Nothing to do (e.g. leaving while not joined)
    Skipped,
    /// At least one step failed; local state was updated anyway
    Failed(ClientError),
}

impl BestEffort {
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    #[must_use]
    pub const fn error(&self) -> Option<&ClientError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Keep the first failure of two sequential steps
    pub(crate) fn and(self, next: Self) -> Self {
        match (self, next) {
            (Self::Failed(err), _) | (_, Self::Failed(err)) => Self::Failed(err),
            (Self::Skipped, Self::Skipped) => Self::Skipped,
            _ => Self::Done,
        }
    }
}

impl<E: Into<ClientError>> From<std::result::Result<(), E>> for BestEffort {
    fn from(result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(err) => Self::Failed(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_server() {
        let err = SignalError::Server {
            endpoint: "recv-track",
            message: "no producer".to_string(),
        };
        assert_eq!(err.to_string(), "Server rejected recv-track: no producer");
    }

    #[test]
    fn test_error_display_http() {
        let err = SignalError::Http {
            status: reqwest::StatusCode::NOT_FOUND,
            url: "http://localhost:3000/signaling/sync".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP error 404 Not Found for http://localhost:3000/signaling/sync"
        );
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        let err: SignalError = json_err.into();
        assert!(matches!(err, SignalError::Parse(_)));
    }

    #[test]
    fn test_already_subscribed_display() {
        let err = ClientError::AlreadySubscribed {
            peer_id: PeerId::from("p1"),
            media_tag: MediaTag::cam_video(),
        };
        assert_eq!(err.to_string(), "Already subscribed to cam-video of peer p1");
    }

    #[test]
    fn test_best_effort_and_keeps_first_failure() {
        let failed = BestEffort::Failed(ClientError::NotJoined);
        let combined = failed.and(BestEffort::Done);
        assert!(matches!(combined.error(), Some(ClientError::NotJoined)));

        assert!(BestEffort::Done.and(BestEffort::Skipped).is_done());
        assert!(BestEffort::Skipped.and(BestEffort::Skipped).is_skipped());
    }

    #[test]
    fn test_best_effort_from_result() {
        let ok: std::result::Result<(), EngineError> = Ok(());
        assert!(BestEffort::from(ok).is_done());

        let err: std::result::Result<(), EngineError> = Err(EngineError::Closed);
        assert!(matches!(
            BestEffort::from(err),
            BestEffort::Failed(ClientError::Engine(EngineError::Closed))
        ));
    }
}
