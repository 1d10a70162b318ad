//! Library error type.

/// Errors surfaced by the SDK's fallible entry points.
///
/// Recoverable transport conditions (drops, liveness timeouts, malformed
/// frames) never show up here; they degrade to reconnects or dropped frames
/// inside the transport.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("credential must be a non-empty string")]
    EmptyCredential,

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),
}
